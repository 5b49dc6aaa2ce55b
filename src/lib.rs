/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// Usage:
/// ```ignore
/// log_status!("plan", "Resolved {} artifacts for {}", count, workload);
/// log_status!("run", "Step {} finished", index);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

pub mod core;
pub mod logging;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `deckhand::plan` instead of `deckhand::core::plan`
pub use core::*;
pub use utils::*;
