//! Owns every channel and merges their message streams.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream;
use tracing::{error, info, warn};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, StatusUpdate};
use crate::error::ChannelError;

#[derive(Default)]
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. A channel with the same name is replaced.
    pub fn add(&mut self, channel: Arc<dyn Channel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Start every channel and merge their streams. Channels that fail to
    /// start are logged and skipped; it is an error only if none start.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::new();
        for (name, channel) in &self.channels {
            match channel.start().await {
                Ok(s) => {
                    info!(channel = %name, "Channel started");
                    streams.push(s);
                }
                Err(e) => error!(channel = %name, error = %e, "Channel failed to start"),
            }
        }

        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".into(),
                reason: "no channel started".into(),
            });
        }
        Ok(Box::pin(stream::select_all(streams)))
    }

    /// Reply through the channel the message came from.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let channel = self.lookup(&msg.channel)?;
        channel.respond(msg, response).await
    }

    pub async fn send_status(
        &self,
        channel: &str,
        status: StatusUpdate,
        metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        self.lookup(channel)?.send_status(status, metadata).await
    }

    /// Health of each channel, by name.
    pub async fn health_check_all(&self) -> HashMap<String, Result<(), ChannelError>> {
        let mut results = HashMap::new();
        for (name, channel) in &self.channels {
            results.insert(name.clone(), channel.health_check().await);
        }
        results
    }

    pub async fn shutdown_all(&self) -> Result<(), ChannelError> {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.shutdown().await {
                warn!(channel = %name, error = %e, "Channel shutdown failed");
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<&Arc<dyn Channel>, ChannelError> {
        self.channels.get(name).ok_or_else(|| ChannelError::SendFailed {
            name: name.to_string(),
            reason: "unknown channel".into(),
        })
    }
}
