pub mod contributions_guard;
pub mod event_bus;
pub mod stamp_store;
pub mod task_run_service;
pub mod task_scheduler;
