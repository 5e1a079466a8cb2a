// SPDX-License-Identifier: MIT OR Apache-2.0
//! Change notifications published by a graph.
//!
//! Every graph owns an [`EventBus`]. Hosts call [`EventBus::subscribe`] and
//! drain the returned receiver; events are sent only after the mutation
//! they describe has been committed.

use crate::annotation::{AnnotationId, ElementId};
use crate::connection::ConnectionId;
use crate::node::NodeId;
use crate::settings::SettingValue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

/// A change in a graph or its current run
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// A node was added
    NodeAdded(NodeId),
    /// A node was removed
    NodeRemoved(NodeId),
    /// A connection was added
    EdgeAdded(ConnectionId),
    /// A connection was removed
    EdgeRemoved(ConnectionId),
    /// An annotation was added
    AnnotationAdded(AnnotationId),
    /// An annotation was removed
    AnnotationRemoved(AnnotationId),
    /// An element moved
    PositionChanged {
        /// Moved element
        element: ElementId,
        /// Previous position
        old: [f32; 2],
        /// New position
        new: [f32; 2],
    },
    /// An element was resized
    SizeChanged {
        /// Resized element
        element: ElementId,
        /// Previous size
        old: [f32; 2],
        /// New size
        new: [f32; 2],
    },
    /// An element was renamed
    Renamed {
        /// Renamed element
        element: ElementId,
        /// Previous name
        old: String,
        /// New name
        new: String,
    },
    /// A node setting changed
    SettingChanged {
        /// Node whose settings changed
        node: NodeId,
        /// Property name
        property: String,
        /// Previous value
        old: Option<SettingValue>,
        /// New value
        new: SettingValue,
    },
    /// A composite edit was applied or reverted as one unit
    BatchApplied {
        /// Description of the composite edit
        description: String,
        /// Whether this was an undo
        reverted: bool,
    },
    /// A run started
    RunStarted,
    /// A run completed
    RunFinished {
        /// Number of node executions
        executed: usize,
    },
    /// A run was stopped before completion
    RunCanceled {
        /// Number of node executions before the stop
        executed: usize,
    },
    /// A run failed
    RunFailed {
        /// Error description
        reason: String,
    },
    /// A node reported progress
    NodeProgress {
        /// Reporting node
        node: NodeId,
        /// Progress value
        value: f64,
        /// Progress maximum
        max: f64,
    },
}

/// Subscriber list of a single graph.
///
/// Cloning the bus shares the subscriber list, which lets the scheduler
/// hand progress reporting to node computations.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<GraphEvent>>>>,
    muted: Arc<AtomicUsize>,
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> mpsc::Receiver<GraphEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Deliver `event` to every live subscriber unless muted
    pub fn emit(&self, event: GraphEvent) {
        if self.is_muted() {
            return;
        }
        self.subscribers
            .lock()
            .retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Suppress events until the matching [`EventBus::unmute`]
    pub fn mute(&self) {
        self.muted.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo one [`EventBus::mute`]
    pub fn unmute(&self) {
        let _ = self
            .muted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Whether events are currently suppressed
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst) > 0
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_gets_each_event_once() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.emit(GraphEvent::RunStarted);

        assert_eq!(first.try_iter().collect::<Vec<_>>(), vec![GraphEvent::RunStarted]);
        assert_eq!(second.try_iter().collect::<Vec<_>>(), vec![GraphEvent::RunStarted]);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.emit(GraphEvent::RunStarted);
        assert_eq!(bus.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn test_muting_nests() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        bus.mute();
        bus.mute();
        bus.unmute();
        bus.emit(GraphEvent::RunStarted);
        assert!(rx.try_recv().is_err());

        bus.unmute();
        bus.emit(GraphEvent::RunStarted);
        assert!(rx.try_recv().is_ok());
    }
}
