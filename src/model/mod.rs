//! Domain models module
//!
//! All domain entity structs are consolidated in models.rs.

mod models;

pub use models::*;
