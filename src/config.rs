//! Command-line interface of the driver.

use clap::Parser;
use std::path::PathBuf;

/// kefir: a C17 compiler.
#[derive(Parser, Debug, Clone)]
#[command(name = "kefir", version, about = "Kefir C17 compiler")]
pub struct DriverConfig {
    /// Stop after producing object files.
    #[arg(short = 'c', long = "compile")]
    pub compile_only: bool,

    /// Stop after producing assembly.
    #[arg(short = 'S')]
    pub assembly_only: bool,

    /// Preprocess only.
    #[arg(short = 'E')]
    pub preprocess_only: bool,

    /// Output file path.
    #[arg(short = 'o')]
    pub output: Option<PathBuf>,

    /// Target triple selecting the ABI variant and toolchain configuration.
    #[arg(long = "target")]
    pub target: Option<String>,

    /// Include directory.
    #[arg(short = 'I', action = clap::ArgAction::Append)]
    pub include_dirs: Vec<PathBuf>,

    /// System include directory.
    #[arg(long = "isystem", action = clap::ArgAction::Append)]
    pub system_include_dirs: Vec<PathBuf>,

    /// Quoted include directory.
    #[arg(long = "iquote", action = clap::ArgAction::Append)]
    pub quote_include_dirs: Vec<PathBuf>,

    /// Preprocessor definition (NAME or NAME=VALUE).
    #[arg(short = 'D', action = clap::ArgAction::Append)]
    pub defines: Vec<String>,

    /// Preprocessor undefinition.
    #[arg(short = 'U', action = clap::ArgAction::Append)]
    pub undefines: Vec<String>,

    /// File included before the main source.
    #[arg(long = "include", action = clap::ArgAction::Append)]
    pub include_files: Vec<PathBuf>,

    /// Deterministic value for `__TIMESTAMP__` (seconds since the epoch).
    #[arg(long = "preprocessor-timestamp")]
    pub preprocessor_timestamp: Option<i64>,

    /// Echo every sub-tool invocation.
    #[arg(long = "verbose")]
    pub verbose: bool,

    /// Emit machine-readable JSON error reports.
    #[arg(long = "json-errors")]
    pub json_errors: bool,

    /// Disable debug information generation.
    #[arg(long = "no-debug-info")]
    pub no_debug_info: bool,

    /// Input files.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

/// Kind of an input file, decided by extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InputKind {
    CSource,
    Assembly,
    Object,
}

impl DriverConfig {
    pub fn input_kind(path: &std::path::Path) -> InputKind {
        match path.extension().and_then(|e| e.to_str()) {
            Some("s") | Some("S") | Some("asm") => InputKind::Assembly,
            Some("o") | Some("a") => InputKind::Object,
            _ => InputKind::CSource,
        }
    }
}
