use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::jobs::MediaType;

/// Whether a generation is in flight, and of which kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationState {
    pub is_active: bool,
    pub media_type: MediaType,
}

impl Default for GenerationState {
    fn default() -> Self {
        Self {
            is_active: false,
            media_type: MediaType::Image,
        }
    }
}

/// Shared in-flight flag. Clones observe and mutate the same state, and
/// subscribers are woken on every change.
#[derive(Debug, Clone)]
pub struct GenerationStore {
    tx: watch::Sender<GenerationState>,
}

impl Default for GenerationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GenerationState::default());
        Self { tx }
    }

    pub fn start(&self, media_type: MediaType) {
        self.tx.send_replace(GenerationState {
            is_active: true,
            media_type,
        });
    }

    /// Set the flag only if it is clear. Returns whether this call set it.
    pub fn try_start(&self, media_type: MediaType) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_active {
                return false;
            }
            *state = GenerationState {
                is_active: true,
                media_type,
            };
            true
        })
    }

    /// Clears the flag; the last media type is kept.
    pub fn stop(&self) {
        self.tx.send_if_modified(|state| {
            let was_active = state.is_active;
            state.is_active = false;
            was_active
        });
    }

    pub fn snapshot(&self) -> GenerationState {
        *self.tx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.tx.borrow().is_active
    }

    pub fn subscribe(&self) -> watch::Receiver<GenerationState> {
        self.tx.subscribe()
    }
}
