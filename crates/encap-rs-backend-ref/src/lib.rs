pub mod compiler;
pub mod hashing;

pub use compiler::{PlanStep, RefCompiler, RefPlan};
