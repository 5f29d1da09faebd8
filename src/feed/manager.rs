//! Feed manager: owns venue adapters, reconnects them with backoff, applies
//! backpressure, and drains their output through the normalizer into the
//! order book engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{info, warn};

use crate::clock::Nanos;
use crate::feed::adapter::{Channel, RawEvent, VenueAdapter};
use crate::normalize::{normalize_depth, normalize_trade, SymbolTable};
use crate::orderbook::engine::OrderBookEngine;
use crate::types::Venue;

const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const CIRCUIT_FAILURE_THRESHOLD: u32 = 10;
const CIRCUIT_WINDOW: Duration = Duration::from_secs(5 * 60);
const DEFAULT_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Connected,
    Degraded,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct AdapterHealth {
    pub state: AdapterState,
    pub consecutive_failures: u32,
    pub last_heartbeat: Option<Nanos>,
    pub dropped_count: u64,
}

impl Default for AdapterHealth {
    fn default() -> Self {
        Self {
            state: AdapterState::Disconnected,
            consecutive_failures: 0,
            last_heartbeat: None,
            dropped_count: 0,
        }
    }
}

/// A per-adapter bounded inbox. On overflow the oldest incremental update
/// is dropped in preference to dropping a snapshot, per spec.md §4.3.
struct Inbox {
    queue: Mutex<VecDeque<RawEvent>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Inbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, event: RawEvent) {
        let mut q = self.queue.lock();
        if q.len() < self.capacity {
            q.push_back(event);
            return;
        }
        if event.is_snapshot_depth() {
            // Make room by evicting the oldest non-snapshot entry if one
            // exists; otherwise fall back to evicting the oldest entry.
            if let Some(pos) = q.iter().position(|e| !e.is_snapshot_depth()) {
                q.remove(pos);
            } else {
                q.pop_front();
            }
            q.push_back(event);
        } else {
            // Prefer dropping the incoming increment over evicting
            // anything already resting (which may be a snapshot).
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn pop(&self) -> Option<RawEvent> {
        self.queue.lock().pop_front()
    }
}

struct AdapterEntry {
    inbox: Arc<Inbox>,
    health: RwLock<AdapterHealth>,
    stop: Arc<AtomicBool>,
}

/// Owns a set of named venue adapters and pumps their events into the
/// order book engine via the normalizer.
pub struct FeedManager {
    adapters: DashMap<Venue, Arc<AdapterEntry>>,
    engine: Arc<OrderBookEngine>,
    symbols: Arc<SymbolTable>,
}

impl FeedManager {
    pub fn new(engine: Arc<OrderBookEngine>, symbols: Arc<SymbolTable>) -> Self {
        Self {
            adapters: DashMap::new(),
            engine,
            symbols,
        }
    }

    /// Register and start an adapter. Spawns one task that owns the
    /// connection lifecycle (connect -> subscribe -> stream -> reconnect on
    /// failure) and one dispatcher task that drains its inbox.
    pub fn start_adapter(
        &self,
        mut adapter: Box<dyn VenueAdapter>,
        symbols_to_subscribe: Vec<String>,
        channels: Vec<Channel>,
    ) {
        let venue = adapter.venue().to_string();
        let entry = Arc::new(AdapterEntry {
            inbox: Arc::new(Inbox::new(DEFAULT_QUEUE_CAPACITY)),
            health: RwLock::new(AdapterHealth::default()),
            stop: Arc::new(AtomicBool::new(false)),
        });
        self.adapters.insert(venue.clone(), entry.clone());

        let connection_entry = entry.clone();
        tokio::spawn(async move {
            run_connection_loop(adapter.as_mut(), connection_entry, symbols_to_subscribe, channels).await;
        });

        let dispatch_entry = entry;
        let engine = self.engine.clone();
        let symbols = self.symbols.clone();
        let dispatch_venue = venue;
        tokio::spawn(async move {
            run_dispatch_loop(dispatch_venue, dispatch_entry, engine, symbols).await;
        });
    }

    pub fn health(&self, venue: &str) -> Option<AdapterHealth> {
        self.adapters.get(venue).map(|e| e.health.read().clone())
    }

    pub fn dropped_count(&self, venue: &str) -> u64 {
        self.adapters
            .get(venue)
            .map(|e| e.inbox.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Cooperative shutdown: adapters observe the flag on their next poll
    /// and disconnect.
    pub fn stop(&self, venue: &str) {
        if let Some(entry) = self.adapters.get(venue) {
            entry.stop.store(true, Ordering::SeqCst);
        }
    }

    pub fn stop_all(&self) {
        for entry in self.adapters.iter() {
            entry.stop.store(true, Ordering::SeqCst);
        }
    }
}

async fn run_connection_loop(
    adapter: &mut dyn VenueAdapter,
    entry: Arc<AdapterEntry>,
    symbols_to_subscribe: Vec<String>,
    channels: Vec<Channel>,
) {
    let venue = adapter.venue().to_string();
    let mut backoff = BACKOFF_FLOOR;
    let mut window_start = std::time::Instant::now();

    loop {
        if entry.stop.load(Ordering::SeqCst) {
            adapter.disconnect().await;
            entry.health.write().state = AdapterState::Disconnected;
            return;
        }

        match adapter.connect().await {
            Ok(()) => {
                if let Err(e) = adapter.subscribe(&symbols_to_subscribe, &channels).await {
                    warn!(venue = %venue, error = %e, "subscribe failed");
                    adapter.disconnect().await;
                    record_failure(&entry, &mut backoff, &mut window_start);
                    sleep_with_jitter(backoff).await;
                    continue;
                }
                {
                    let mut h = entry.health.write();
                    h.state = AdapterState::Connected;
                    h.consecutive_failures = 0;
                }
                backoff = BACKOFF_FLOOR;

                loop {
                    if entry.stop.load(Ordering::SeqCst) {
                        adapter.disconnect().await;
                        entry.health.write().state = AdapterState::Disconnected;
                        return;
                    }
                    match adapter.next_event().await {
                        Ok(Some(RawEvent::Heartbeat { at })) => {
                            entry.health.write().last_heartbeat = Some(at);
                        }
                        Ok(Some(event)) => entry.inbox.push(event),
                        Ok(None) => {
                            info!(venue = %venue, "adapter stream ended");
                            break;
                        }
                        Err(e) => {
                            warn!(venue = %venue, error = %e, "adapter stream error, reconnecting");
                            break;
                        }
                    }
                }
                adapter.disconnect().await;
            }
            Err(e) => {
                warn!(venue = %venue, error = %e, "connect failed");
                record_failure(&entry, &mut backoff, &mut window_start);
            }
        }

        sleep_with_jitter(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

fn record_failure(entry: &Arc<AdapterEntry>, _backoff: &mut Duration, window_start: &mut std::time::Instant) {
    let mut h = entry.health.write();
    if window_start.elapsed() > CIRCUIT_WINDOW {
        h.consecutive_failures = 0;
        *window_start = std::time::Instant::now();
    }
    h.consecutive_failures += 1;
    if h.consecutive_failures >= CIRCUIT_FAILURE_THRESHOLD {
        h.state = AdapterState::Degraded;
    }
}

async fn sleep_with_jitter(base: Duration) {
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
}

async fn run_dispatch_loop(
    venue: Venue,
    entry: Arc<AdapterEntry>,
    engine: Arc<OrderBookEngine>,
    symbols: Arc<SymbolTable>,
) {
    loop {
        if entry.stop.load(Ordering::SeqCst) {
            // Drain whatever remains before exiting.
            while let Some(event) = entry.inbox.pop() {
                dispatch_one(&venue, &symbols, &engine, event);
            }
            return;
        }
        match entry.inbox.pop() {
            Some(event) => dispatch_one(&venue, &symbols, &engine, event),
            None => tokio::time::sleep(Duration::from_millis(1)).await,
        }
    }
}

fn dispatch_one(venue: &str, symbols: &SymbolTable, engine: &OrderBookEngine, event: RawEvent) {
    match event {
        RawEvent::Depth { payload, .. } => match normalize_depth(venue, symbols, &payload) {
            Ok(update) => engine.apply_update(update),
            Err(e) => warn!(venue, error = %e, "failed to normalize depth payload"),
        },
        RawEvent::Trade { payload } => {
            if let Err(e) = normalize_trade(venue, symbols, &payload) {
                warn!(venue, error = %e, "failed to normalize trade payload");
            }
            // Normalized trades are currently consumed only for
            // diagnostics; strategies act on book state, not the tape.
        }
        RawEvent::Heartbeat { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_drops_incoming_increment_when_full() {
        let inbox = Inbox::new(2);
        inbox.push(RawEvent::Trade { payload: serde_json::json!({}) });
        inbox.push(RawEvent::Trade { payload: serde_json::json!({}) });
        inbox.push(RawEvent::Trade { payload: serde_json::json!({}) });
        assert_eq!(inbox.dropped.load(Ordering::Relaxed), 1);
        assert_eq!(inbox.queue.lock().len(), 2);
    }

    #[test]
    fn inbox_prefers_keeping_snapshot_over_increment() {
        let inbox = Inbox::new(1);
        inbox.push(RawEvent::Trade { payload: serde_json::json!({}) });
        inbox.push(RawEvent::Depth { payload: serde_json::json!({}), is_snapshot: true });
        // Snapshot should have displaced the resting increment.
        let popped = inbox.pop().unwrap();
        assert!(popped.is_snapshot_depth());
    }
}
