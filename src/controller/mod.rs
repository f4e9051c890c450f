pub mod update;
pub mod version;
