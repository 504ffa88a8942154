//! Diagnostics channel
//!
//! Non-fatal numeric conditions — a zero diagonal during an unpivoted
//! factorization — must not abort the driver, but the caller needs to learn
//! about them. The `Diagnostics` handle is a shared append-only event sink:
//! kernels and drivers record events, the caller inspects them after the
//! call returns. Every recorded event is also emitted at warn level through
//! `tracing`.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// A non-fatal numeric event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagEvent {
    /// An exactly-zero diagonal element was encountered while factoring the
    /// given global column. The factorization continued; the resulting
    /// factor is singular.
    SingularDiagonal {
        /// Global column index of the zero diagonal
        column: usize,
    },
}

/// Shared diagnostics sink for one or more driver calls.
///
/// Cloning is cheap; all clones append to the same event list.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    events: Arc<Mutex<Vec<DiagEvent>>>,
}

impl Diagnostics {
    /// Create an empty diagnostics channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event and log it at warn level.
    pub fn record(&self, event: DiagEvent) {
        match event {
            DiagEvent::SingularDiagonal { column } => {
                warn!(column, "zero diagonal encountered; factor is singular");
            }
        }
        self.events.lock().push(event);
    }

    /// Snapshot of all recorded events, in recording order.
    pub fn events(&self) -> Vec<DiagEvent> {
        self.events.lock().clone()
    }

    /// Global columns reported singular, in recording order.
    pub fn singular_columns(&self) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .map(|e| match e {
                DiagEvent::SingularDiagonal { column } => *column,
            })
            .collect()
    }

    /// True if nothing has been recorded.
    pub fn is_clean(&self) -> bool {
        self.events.lock().is_empty()
    }
}
