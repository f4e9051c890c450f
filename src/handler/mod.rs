pub mod prices;
pub mod sync_task;
