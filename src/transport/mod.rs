// src/transport/mod.rs

pub mod matrix;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{error::AppError, services::dispatcher::Dispatcher};

/// Outbound side of a chat network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, room: &str, text: &str) -> Result<(), AppError>;

    async fn join(&self, room: &str) -> Result<(), AppError>;
}

/// Something that happened on the chat network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message {
        sender: String,
        room: String,
        text: String,
    },
    Invite {
        room: String,
    },
}

/// Consumes inbound events one at a time until the channel closes or
/// `cancel` fires.
///
/// Replies go back through `transport`. A failing event is logged and the
/// loop moves on.
pub async fn run_event_loop(
    mut events: mpsc::Receiver<InboundEvent>,
    dispatcher: Dispatcher,
    transport: &dyn Transport,
    own_user: &str,
    cancel: CancellationToken,
) {
    tracing::info!("Chat event loop started");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            InboundEvent::Invite { room } => {
                match transport.join(&room).await {
                    Ok(()) => tracing::info!(room, "Joined room"),
                    Err(e) => tracing::warn!(room, error = %e, "Failed to join room"),
                }
            }
            InboundEvent::Message { sender, room, text } => {
                if sender == own_user {
                    continue;
                }
                let reply = dispatcher.handle(&text, &room, &sender).await;
                if let Err(e) = transport.send(&room, &reply).await {
                    tracing::warn!(room, learner = sender, error = %e, "Failed to send reply");
                }
            }
        }
    }

    tracing::info!("Chat event loop stopped");
}
