//! Optimization passes other than the inliner.

mod branch_thread;
mod compare_branch;
mod const_fold;
mod dce;
mod mem2reg;
mod tail_calls;

pub use self::branch_thread::BranchThreadPass;
pub use self::compare_branch::CompareBranchPass;
pub use self::const_fold::ConstFoldPass;
pub use self::dce::DeadCodePass;
pub use self::mem2reg::Mem2RegPass;
pub use self::tail_calls::TailCallPass;

use crate::opt::Pipeline;

/// The default pass order used by the driver: structural simplification
/// first, inlining, then cleanup.
pub fn default_pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline
        .push(Box::new(Mem2RegPass))
        .push(Box::new(ConstFoldPass))
        .push(Box::new(BranchThreadPass))
        .push(Box::new(CompareBranchPass))
        .push(Box::new(crate::opt::inline::InlineFuncPass))
        .push(Box::new(TailCallPass))
        .push(Box::new(DeadCodePass));
    pipeline
}
