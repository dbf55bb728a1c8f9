//! Synchronous publish/subscribe event bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Everything observable in the simulation flows through one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BlockProposed,
    BlockFinalized,
    IbcPacketSend,
    IbcPacketRecv,
    IbcAckSend,
    IbcAckRecv,
    ConsensusRound,
    NetworkDrop,
    Error,
}

/// A published event. `detail` carries a kind-specific payload; for
/// `IbcPacketSend`/`IbcAckSend` it is the encoded packet.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub chain_id: String,
    pub node_id: String,
    pub detail: String,
}

impl Event {
    pub fn new(kind: EventKind, chain_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Event {
            kind,
            chain_id: chain_id.into(),
            node_id: String::new(),
            detail: detail.into(),
        }
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct BusState {
    next_token: u64,
    subs: HashMap<EventKind, Vec<(u64, Handler)>>,
}

/// Thread-safe publish/subscribe over [`EventKind`].
///
/// `publish` dispatches synchronously on the caller's thread, in subscription
/// order, over a snapshot of the handler list taken under the bus lock and
/// invoked outside it. A handler that subscribes or unsubscribes during
/// dispatch therefore does not affect the dispatch in progress, and handlers
/// may publish recursively.
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            state: Mutex::new(BusState {
                next_token: 1,
                subs: HashMap::new(),
            }),
        }
    }

    /// Register a handler for one event kind. Returns a token for
    /// [`unsubscribe`](Self::unsubscribe); tokens are strictly increasing.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> u64 {
        let mut state = self.state.lock().unwrap();
        let token = state.next_token;
        state.next_token += 1;
        state
            .subs
            .entry(kind)
            .or_default()
            .push((token, Arc::new(handler)));
        token
    }

    /// Remove at most one subscription across all kinds. Silent if the token
    /// is unknown.
    pub fn unsubscribe(&self, token: u64) {
        let mut state = self.state.lock().unwrap();
        for handlers in state.subs.values_mut() {
            if let Some(pos) = handlers.iter().position(|(t, _)| *t == token) {
                handlers.remove(pos);
                return;
            }
        }
    }

    /// Invoke every handler currently subscribed for `event.kind`.
    pub fn publish(&self, event: &Event) {
        // Snapshot under the lock, invoke outside it: handlers must never run
        // with the bus lock held.
        let handlers: Vec<Handler> = {
            let state = self.state.lock().unwrap();
            state
                .subs
                .get(&event.kind)
                .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
