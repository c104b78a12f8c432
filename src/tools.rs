//! External assembler and linker invocation.

use crate::externals::ExternalsConfig;
use anyhow::{bail, Context, Result};
use log::info;
use std::path::Path;
use std::process::Command;

fn echo(verbose: bool, command: &Command) {
    if verbose {
        eprintln!("+ {command:?}");
    }
    info!("running {command:?}");
}

/// Assemble `input` into `output` with the configured assembler.
pub fn run_assembler(
    externals: &ExternalsConfig,
    input: &Path,
    output: &Path,
    verbose: bool,
) -> Result<()> {
    let mut command = Command::new(&externals.assembler);
    command.arg("-o").arg(output).arg(input);
    if let Some(workdir) = &externals.workdir {
        command.current_dir(workdir);
    }
    echo(verbose, &command);
    let status = command
        .status()
        .with_context(|| format!("failed to spawn assembler {}", externals.assembler))?;
    if !status.success() {
        bail!("assembler exited with status {status}");
    }
    Ok(())
}

/// Link `inputs` into `output` with the configured linker.
pub fn run_linker(
    externals: &ExternalsConfig,
    inputs: &[std::path::PathBuf],
    output: &Path,
    verbose: bool,
) -> Result<()> {
    let mut command = Command::new(&externals.linker);
    command.arg("-o").arg(output);
    for input in inputs {
        command.arg(input);
    }
    if let Some(rtlib) = &externals.runtime_library {
        command.arg(rtlib);
    }
    if let Some(libdir) = &externals.platform_library {
        command.arg("-L").arg(libdir);
    }
    if let Some(dynamic_linker) = &externals.dynamic_linker {
        command.arg("--dynamic-linker").arg(dynamic_linker);
    }
    if let Some(workdir) = &externals.workdir {
        command.current_dir(workdir);
    }
    echo(verbose, &command);
    let status = command
        .status()
        .with_context(|| format!("failed to spawn linker {}", externals.linker))?;
    if !status.success() {
        bail!("linker exited with status {status}");
    }
    Ok(())
}
