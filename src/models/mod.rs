// src/models/mod.rs

pub mod admin;
pub mod progress;
pub mod question;
pub mod quiz;
