pub mod backoff;
pub mod executor;
pub mod performer;

pub use backoff::BackoffPolicy;
pub use executor::{RetryingExecutor, StepSuccess};
pub use performer::{ActionOutcome, ActionPerformer, MockPerformer};
