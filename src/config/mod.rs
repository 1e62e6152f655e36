//! config/mod.rs

pub mod scheduler_config;
