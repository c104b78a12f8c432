//! Driver orchestration: sources through the pipeline to the final output.
//!
//! The front-end (preprocessor, parser, analyzer, IR translator) is a
//! separate component wired in through [`Driver::set_frontend`]; the driver
//! itself owns sequencing, temporary files and external tools. Assembly and
//! object inputs skip the missing stages.

use crate::config::{DriverConfig, InputKind};
use crate::externals::{ExternalsConfig, PlatformVariant};
use crate::session::CompilerSession;
use crate::tools;
use anyhow::{anyhow, bail, Context, Result};
use kefir_codegen::opt::{OptModule, PipelineConfig};
use kefir_codegen::xasmgen::{AsmSyntax, XasmGen};
use kefir_codegen::CodegenConfig;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Hook producing an optimizer module from a C source file. Installed by
/// the front-end component.
pub type Frontend = Box<dyn Fn(&Path, &DriverConfig) -> Result<OptModule>>;

pub struct Driver {
    config: DriverConfig,
    externals: ExternalsConfig,
    frontend: Option<Frontend>,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        let variant = PlatformVariant::from_target(config.target.as_deref());
        let externals = ExternalsConfig::from_env(variant);
        Self {
            config,
            externals,
            frontend: None,
        }
    }

    /// Install the front-end translation hook.
    pub fn set_frontend(&mut self, frontend: Frontend) {
        self.frontend = Some(frontend);
    }

    fn translate(&self, input: &Path) -> Result<OptModule> {
        match &self.frontend {
            Some(frontend) => frontend(input, &self.config),
            None => bail!(
                "no C front-end is linked into this driver build; \
                 input {} cannot be translated",
                input.display()
            ),
        }
    }

    /// Compile one translated module to assembly text.
    pub fn compile_module_to_assembly(&self, module: &mut OptModule) -> Result<String> {
        let mut sink = XasmGen::new(Vec::new(), AsmSyntax::IntelNoprefix);
        let pipeline_config = PipelineConfig::default();
        let codegen_config = CodegenConfig {
            debug_info: !self.config.no_debug_info,
            ..CodegenConfig::default()
        };
        kefir_codegen::compile_module(module, &mut sink, &pipeline_config, &codegen_config)
            .map_err(|err| anyhow!("compilation failed: {err}"))?;
        String::from_utf8(sink.into_inner()).context("generated assembly is not valid UTF-8")
    }

    fn compile_to_assembly_file(&self, input: &Path, output: &Path) -> Result<()> {
        let mut module = self.translate(input)?;
        let assembly = self.compile_module_to_assembly(&mut module)?;
        fs::write(output, assembly)
            .with_context(|| format!("failed to write assembly to {}", output.display()))
    }

    fn default_output(&self, input: &Path, extension: &str) -> PathBuf {
        let mut path = input
            .file_stem()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("a"));
        path.set_extension(extension);
        path
    }

    /// Run the full driver flow; returns the process exit code.
    pub fn run(&self) -> Result<()> {
        if let Some(target) = &self.config.target {
            let triple: target_lexicon::Triple = target
                .parse()
                .map_err(|err| anyhow!("invalid target triple {target}: {err}"))?;
            if triple.architecture != target_lexicon::Architecture::X86_64 {
                bail!("unsupported target architecture in {target}; only x86_64 is available");
            }
        }
        if self.config.preprocess_only {
            bail!("the preprocessor is part of the front-end component");
        }

        let session = CompilerSession::new(&self.externals.tmpdir)?;
        let mut objects: Vec<PathBuf> = Vec::new();

        for input in &self.config.inputs {
            match DriverConfig::input_kind(input) {
                InputKind::CSource => {
                    debug!("compiling {}", input.display());
                    if self.config.assembly_only {
                        let output = self
                            .config
                            .output
                            .clone()
                            .unwrap_or_else(|| self.default_output(input, "s"));
                        self.compile_to_assembly_file(input, &output)?;
                        continue;
                    }
                    let asm_file = session.new_file("s");
                    self.compile_to_assembly_file(input, &asm_file)?;
                    let object = if self.config.compile_only {
                        self.config
                            .output
                            .clone()
                            .unwrap_or_else(|| self.default_output(input, "o"))
                    } else {
                        session.new_file("o")
                    };
                    tools::run_assembler(&self.externals, &asm_file, &object, self.config.verbose)?;
                    objects.push(object);
                }
                InputKind::Assembly => {
                    if self.config.assembly_only {
                        continue;
                    }
                    let object = if self.config.compile_only {
                        self.config
                            .output
                            .clone()
                            .unwrap_or_else(|| self.default_output(input, "o"))
                    } else {
                        session.new_file("o")
                    };
                    tools::run_assembler(&self.externals, input, &object, self.config.verbose)?;
                    objects.push(object);
                }
                InputKind::Object => objects.push(input.clone()),
            }
        }

        if self.config.assembly_only || self.config.compile_only {
            return Ok(());
        }

        let output = self
            .config
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from("a.out"));
        tools::run_linker(&self.externals, &objects, &output, self.config.verbose)
    }
}
