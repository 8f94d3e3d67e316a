pub mod machine;
pub mod persist;

pub use machine::{transition, RunState, RunStatus, StepProgress, StepUpdate};
pub use persist::{load_run, save_run};
