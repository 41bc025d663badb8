pub mod executor;
pub mod monitor;
pub mod size_cache;
pub mod size_tracker;
pub mod task_queue;
pub mod warnings;
