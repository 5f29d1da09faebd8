//! Generic WebSocket venue adapter.
//!
//! One instance handles one venue's stream. The URL and subscription
//! message shape are venue-specific and supplied by the caller; the
//! reconnect/backoff/circuit policy lives entirely in
//! [`crate::feed::manager::FeedManager`], so this adapter only needs to
//! know how to speak to one socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::feed::adapter::{Channel, RawEvent, VenueAdapter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds the venue-specific subscribe message from the requested symbols
/// and channels. Each venue's wire protocol differs here; everything else
/// about the adapter is shared.
pub trait SubscriptionBuilder: Send + Sync {
    fn build(&self, symbols: &[String], channels: &[Channel]) -> Value;
}

pub struct WebSocketAdapter {
    venue: String,
    url: String,
    subscription: Box<dyn SubscriptionBuilder>,
    socket: Option<WsStream>,
}

impl WebSocketAdapter {
    pub fn new(venue: impl Into<String>, url: impl Into<String>, subscription: Box<dyn SubscriptionBuilder>) -> Self {
        Self {
            venue: venue.into(),
            url: url.into(),
            subscription,
            socket: None,
        }
    }

    fn classify(payload: &Value) -> RawEvent {
        let is_heartbeat = payload
            .get("type")
            .and_then(Value::as_str)
            .map(|t| t.eq_ignore_ascii_case("heartbeat") || t.eq_ignore_ascii_case("ping"))
            .unwrap_or(false);
        if is_heartbeat {
            return RawEvent::Heartbeat { at: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) };
        }
        if payload.get("bids").is_some() || payload.get("asks").is_some() {
            let is_snapshot = payload.get("snapshot").and_then(Value::as_bool).unwrap_or(false);
            RawEvent::Depth { payload: payload.clone(), is_snapshot }
        } else {
            RawEvent::Trade { payload: payload.clone() }
        }
    }
}

#[async_trait]
impl VenueAdapter for WebSocketAdapter {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn connect(&mut self) -> Result<()> {
        let (stream, _response) = connect_async(&self.url)
            .await
            .map_err(|e| Error::Transient(format!("websocket connect to {} failed: {e}", self.url)))?;
        self.socket = Some(stream);
        Ok(())
    }

    async fn subscribe(&mut self, symbols: &[String], channels: &[Channel]) -> Result<()> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::StateConflict("subscribe called before connect".into()))?;
        let msg = self.subscription.build(symbols, channels);
        socket
            .send(Message::Text(msg.to_string()))
            .await
            .map_err(|e| Error::Transient(format!("subscribe send failed: {e}")))
    }

    async fn next_event(&mut self) -> Result<Option<RawEvent>> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::StateConflict("next_event called before connect".into()))?;
        match socket.next().await {
            None => Ok(None),
            Some(Ok(Message::Text(text))) => {
                let payload: Value = serde_json::from_str(&text)
                    .map_err(|e| Error::InvalidInput(format!("malformed frame: {e}")))?;
                Ok(Some(Self::classify(&payload)))
            }
            Some(Ok(Message::Binary(bytes))) => {
                let payload: Value = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::InvalidInput(format!("malformed frame: {e}")))?;
                Ok(Some(Self::classify(&payload)))
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                Ok(Some(RawEvent::Heartbeat { at: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) }))
            }
            Some(Ok(Message::Close(_))) => Ok(None),
            Some(Ok(Message::Frame(_))) => Ok(Some(RawEvent::Heartbeat { at: 0 })),
            Some(Err(e)) => Err(Error::Transient(format!("websocket read error: {e}"))),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }
}
