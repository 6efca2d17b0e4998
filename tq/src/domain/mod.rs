//! Domain types for TaskQueue

mod task;

pub use task::{Task, TaskId, TaskStatus, format_duration};
