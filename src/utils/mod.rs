//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Process execution with timeout and output cap
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell quoting, operator detection and argv splitting

pub mod command;
pub mod io;
pub mod shell;
