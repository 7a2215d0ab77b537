// Push channel: typed inbound events plus the WebSocket transport that produces them.

use async_trait::async_trait;
use flume::Sender;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::state::{GroupMessage, Message};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    /// Authoritative one-to-one message record (incoming, or the ack of our own send).
    Message { peer: String, message: Message },
    GroupMessage {
        group_id: String,
        message: GroupMessage,
    },
    Notification {
        notification_type: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Synthesized locally when the transport drops; never sent by the server.
    #[serde(skip)]
    Closed,
}

/// An inbound event tagged with the channel instance that produced it, so events from a channel
/// that has since been torn down can be discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEnvelope {
    pub channel_id: u64,
    pub event: PushEvent,
}

pub fn parse_frame(text: &str) -> Option<PushEvent> {
    match serde_json::from_str::<PushEvent>(text) {
        Ok(ev) => Some(ev),
        Err(e) => {
            tracing::debug!(%e, "push: ignoring undecodable frame");
            None
        }
    }
}

/// Owning handle for one live channel. Closing (or dropping) it stops the reader task.
#[derive(Debug)]
pub struct ChannelHandle {
    pub id: u64,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ChannelHandle {
    pub fn new(id: u64, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            id,
            shutdown: Some(shutdown),
        }
    }

    pub fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Open a channel. Decoded events for its lifetime go to `sink`; when the transport dies
    /// on its own a final `PushEvent::Closed` is delivered.
    async fn connect(
        &self,
        channel_id: u64,
        token: Option<String>,
        sink: Sender<PushEnvelope>,
    ) -> anyhow::Result<ChannelHandle>;
}

pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn connect_url(&self, token: Option<&str>) -> anyhow::Result<url::Url> {
        let mut url = url::Url::parse(&self.url)?;
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn connect(
        &self,
        channel_id: u64,
        token: Option<String>,
        sink: Sender<PushEnvelope>,
    ) -> anyhow::Result<ChannelHandle> {
        let url = self.connect_url(token.as_deref())?;
        let (stream, _resp) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut write, mut read) = stream.split();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let closed_by_us = loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break true,
                    frame = read.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(event) = parse_frame(&text) {
                                if sink.send(PushEnvelope { channel_id, event }).is_err() {
                                    break true;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if let Err(e) = write.send(WsMessage::Pong(payload)).await {
                                tracing::warn!(%e, channel_id, "push: pong failed");
                                break false;
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break false,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(%e, channel_id, "push: transport error");
                            break false;
                        }
                    },
                }
            };
            if closed_by_us {
                let _ = write.send(WsMessage::Close(None)).await;
                tracing::info!(channel_id, "push: channel closed");
            } else {
                tracing::info!(channel_id, "push: channel dropped by transport");
                let _ = sink.send(PushEnvelope {
                    channel_id,
                    event: PushEvent::Closed,
                });
            }
        });

        tracing::info!(channel_id, "push: channel open");
        Ok(ChannelHandle::new(channel_id, shutdown_tx))
    }
}

/// Used when networking is disabled in config; every connect attempt fails and the session
/// stays Disconnected.
pub struct OfflineTransport;

#[async_trait]
impl PushTransport for OfflineTransport {
    async fn connect(
        &self,
        channel_id: u64,
        _token: Option<String>,
        _sink: Sender<PushEnvelope>,
    ) -> anyhow::Result<ChannelHandle> {
        anyhow::bail!("network disabled; channel {channel_id} not opened")
    }
}
