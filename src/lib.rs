//! Task Sequencer — sequential, weighted task execution with cooperative cancellation.

pub mod config;
pub mod error;
pub mod worker;
