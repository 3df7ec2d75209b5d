mod failure_list;
mod report;
mod step;

pub use failure_list::{FailureList, remove_if_exists, retry_input_path};
pub use report::{RunReport, StepReport, StepStatus};
pub use step::{StepAction, StepOutcome, SyncStep, TablePair};
