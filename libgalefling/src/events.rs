//! Progress events
//!
//! In-process event bus built on `tokio::sync::broadcast`. The dispatcher and
//! the browser session drivers emit events; front ends subscribe to render
//! progress. Emitting never blocks and never fails: with no subscribers the
//! event is dropped, and a lagging subscriber loses its oldest events.
//!
//! ```
//! use libgalefling::events::{Event, EventBus};
//!
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//! bus.emit(Event::DispatchStarted {
//!     dispatch_id: "d1".to_string(),
//!     account_ids: vec!["bluesky_1".to_string()],
//! });
//! assert!(rx.try_recv().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::browser::SessionState;
use crate::types::PostResult;

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    DispatchStarted {
        dispatch_id: String,
        account_ids: Vec<String>,
    },

    /// One account reached its terminal result
    AccountCompleted {
        dispatch_id: String,
        result: Box<PostResult>,
    },

    /// A confirm-click session moved to a new state
    SessionStateChanged {
        account_id: String,
        state: SessionState,
    },

    DispatchCompleted {
        dispatch_id: String,
        succeeded: usize,
        failed: usize,
    },
}
