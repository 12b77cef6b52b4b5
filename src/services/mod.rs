// src/services/mod.rs

pub mod catalog;
pub mod dispatcher;
pub mod matcher;
pub mod progress;
pub mod scheduler;
