pub mod export;
pub mod health;
pub mod new_task;
pub mod task_runs;
