//! Change notification boundary.
//!
//! Every `Created`, `Updated`, or `Closed` decision emits one
//! `FocusChange` on a broadcast channel. Emission is fire-and-forget:
//! delivery guarantees belong to whatever real-time layer subscribes.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use vigil_core::models::FocusSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusChange {
    pub change_type: ChangeType,
    pub focus: Option<FocusSnapshot>,
}

/// Thin wrapper around a broadcast sender. Sending with no subscribers
/// is fine.
#[derive(Clone)]
pub struct ChangePublisher {
    tx: broadcast::Sender<FocusChange>,
}

impl ChangePublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FocusChange> {
        self.tx.subscribe()
    }

    pub fn publish(&self, change: FocusChange) {
        // Err only means no live subscribers
        let _ = self.tx.send(change);
    }
}

impl Default for ChangePublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
