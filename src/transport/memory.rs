// src/transport/memory.rs

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{error::AppError, transport::Transport};

/// Transport that keeps everything in memory.
///
/// Rooms listed in `failing_rooms` reject sends, which lets callers exercise
/// delivery failures.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    joined: Arc<Mutex<Vec<String>>>,
    failing_rooms: Arc<Mutex<HashSet<String>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_room(&self, room: &str) {
        lock(&self.failing_rooms).insert(room.to_string());
    }

    /// All `(room, text)` pairs sent so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    pub fn sent_to(&self, room: &str) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter(|(r, _)| r == room)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn joined(&self) -> Vec<String> {
        lock(&self.joined).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, room: &str, text: &str) -> Result<(), AppError> {
        if lock(&self.failing_rooms).contains(room) {
            return Err(AppError::Transport(format!("room {} is unreachable", room)));
        }
        lock(&self.sent).push((room.to_string(), text.to_string()));
        Ok(())
    }

    async fn join(&self, room: &str) -> Result<(), AppError> {
        lock(&self.joined).push(room.to_string());
        Ok(())
    }
}
