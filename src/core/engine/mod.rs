//! Plan execution:
//! - `executor` - step state machine, runner seam, event stream
//! - `format` - output glyphs and failure classification

pub mod executor;
pub mod format;

pub use executor::{
    default_limits, spawn_plan, validate_command, CommandResult, CommandRunner, Engine,
    ExecOutput, ExecutionEvent, ExecutionReport, ExecutionSummary, ProcessRunner, StepStatus,
    StepUpdate, MAX_OUTPUT_BYTES, STEP_TIMEOUT,
};
pub use format::{classify_failure, format_output, FailureKind, StepFailure};
