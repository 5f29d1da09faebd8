//! FIX session adapter stub.
//!
//! No FIX engine is wired into this crate (spec.md Non-goals exclude binary
//! wire protocols); this type exists so `FeedManager` callers can register a
//! FIX venue without a special case, and so the rest of the engine compiles
//! against the full set of adapter kinds named in spec.md §4.3. It always
//! reports `Degraded` until a real session is injected via
//! [`FixAdapter::with_session`].
//!
//! TODO: wire in a real FIX 4.2/4.4 initiator once a target venue requires
//! it; until then `next_event` simply blocks forever rather than busy-polling.

use async_trait::async_trait;
use std::future::pending;

use crate::error::{Error, Result};
use crate::feed::adapter::{Channel, RawEvent, VenueAdapter};

/// Placeholder for an injected FIX session (QuickFIX-style initiator, socket
/// handle, etc). No implementation ships in this crate.
pub trait FixSession: Send + Sync {}

pub struct FixAdapter {
    venue: String,
    session: Option<Box<dyn FixSession>>,
}

impl FixAdapter {
    pub fn new(venue: impl Into<String>) -> Self {
        Self { venue: venue.into(), session: None }
    }

    pub fn with_session(venue: impl Into<String>, session: Box<dyn FixSession>) -> Self {
        Self { venue: venue.into(), session: Some(session) }
    }
}

#[async_trait]
impl VenueAdapter for FixAdapter {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Err(Error::Unavailable(format!(
                "FIX adapter for venue '{}' has no session injected",
                self.venue
            )));
        }
        Ok(())
    }

    async fn subscribe(&mut self, _symbols: &[String], _channels: &[Channel]) -> Result<()> {
        Err(Error::Unavailable(format!("FIX adapter for venue '{}' cannot subscribe: no session", self.venue)))
    }

    async fn next_event(&mut self) -> Result<Option<RawEvent>> {
        // No session means no events will ever arrive; park instead of
        // returning immediately so the connection loop doesn't spin.
        pending::<()>().await;
        Ok(None)
    }

    async fn disconnect(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_without_session_is_unavailable() {
        let mut adapter = FixAdapter::new("lmax");
        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }
}
