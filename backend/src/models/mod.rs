//! Database models (SQLx).

pub mod project;
pub mod task;
pub mod task_run;
pub mod user;
