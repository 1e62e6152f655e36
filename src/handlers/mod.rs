//! handlers/mod.rs
pub mod scheduler_handler;
pub mod tracking_handler;
