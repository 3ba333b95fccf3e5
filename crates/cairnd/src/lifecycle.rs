//! Worker lifecycle: STARTED → RUNNING → CLOSING → CLOSED, never backwards.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Started,
    Running,
    Closing,
    Closed,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Started => "started",
            State::Running => "running",
            State::Closing => "closing",
            State::Closed => "closed",
        }
    }

    /// True once a close has begun.
    pub fn is_closing(self) -> bool {
        self >= State::Closing
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable lifecycle state. Clones see the same state.
#[derive(Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<State>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(State::Started);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn current(&self) -> State {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// STARTED → RUNNING. Returns false from any other state.
    pub fn mark_running(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == State::Started {
                *s = State::Running;
                true
            } else {
                false
            }
        })
    }

    /// Move to CLOSING, run `on_closing`, then settle in CLOSED.
    ///
    /// Only the first call does anything; later calls return false without
    /// running their closure.
    pub fn close(&self, on_closing: impl FnOnce()) -> bool {
        let began = self.state.send_if_modified(|s| {
            if s.is_closing() {
                false
            } else {
                *s = State::Closing;
                true
            }
        });
        if !began {
            return false;
        }

        on_closing();
        self.state.send_replace(State::Closed);
        true
    }

    /// Resolves once the state reaches CLOSED.
    pub async fn closed(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|s| *s == State::Closed).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
