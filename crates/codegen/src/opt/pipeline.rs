//! Optimizer pass pipeline.
//!
//! A pass reports whether it changed the function; the pipeline iterates its
//! configured pass list until a full sweep reports no change, bounded by an
//! iteration cap.

use crate::error::Result;
use crate::opt::code::OirFunction;
use crate::opt::OptModule;
use log::trace;

/// Tunables consumed by individual passes.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_inline_depth: usize,
    pub max_inlines_per_function: usize,
    /// Upper bound on full pipeline sweeps per function.
    pub max_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_inline_depth: 10,
            max_inlines_per_function: 64,
            max_iterations: 16,
        }
    }
}

/// A single optimization pass.
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Apply the pass; returns whether the function changed.
    fn apply(
        &self,
        module: &mut OptModule,
        func: &mut OirFunction,
        config: &PipelineConfig,
    ) -> Result<bool>;
}

/// An ordered list of passes iterated to a fixed point.
#[derive(Default)]
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pass: Box<dyn Pass>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    /// Run all passes over one function until no pass reports a change.
    pub fn run(
        &self,
        module: &mut OptModule,
        func: &mut OirFunction,
        config: &PipelineConfig,
    ) -> Result<()> {
        for iteration in 0..config.max_iterations {
            let mut changed = false;
            for pass in &self.passes {
                let pass_changed = pass.apply(module, func, config)?;
                trace!(
                    "pass {} iteration {}: {}",
                    pass.name(),
                    iteration,
                    if pass_changed { "changed" } else { "no change" }
                );
                changed |= pass_changed;
                debug_assert!(func.verify().is_ok(), "pass {} broke invariants", pass.name());
            }
            if !changed {
                break;
            }
        }
        Ok(())
    }

    /// Run the pipeline over every defined function of the module.
    pub fn run_module(&self, module: &mut OptModule, config: &PipelineConfig) -> Result<()> {
        for decl in module.function_ids() {
            let mut func = module.take_function(decl)?;
            let result = self.run(module, &mut func, config);
            module.put_function(func);
            result?;
        }
        Ok(())
    }
}
