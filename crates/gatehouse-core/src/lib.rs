pub mod classify;
pub mod config;
pub mod hash;
pub mod plan;
pub mod types;

pub use classify::{Classifier, RuleClassifier};
pub use config::{GatehouseConfig, RetryStrategy};
pub use plan::{build_plan, render_plan_markdown};
pub use types::*;
