// src/import/mod.rs

pub mod qti;
