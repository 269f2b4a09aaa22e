//! Event fan-out. Every subscriber gets its own cursor over one bounded
//! ring; a subscriber that falls behind loses its oldest events instead of
//! blocking producers.

use crate::protocol::Event;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<Event>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver to every live subscriber. Having none is not an error.
    pub fn emit(&self, event: Event) {
        tracing::trace!(task_id = event.task_id, kind = ?event.kind, "emit");
        let _ = self.tx.send(event);
    }

    /// A new stream sees events emitted after this call, never earlier ones.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's ordered view of the event stream. Dropping it is always safe.
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<Event>,
}

impl EventStream {
    /// Next event, or `None` once the engine and all its tasks are gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged; oldest events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged; oldest events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events of one task, up to and including its terminal event.
    /// Events of other tasks are skipped.
    pub async fn collect_task(&mut self, task_id: u64) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            if event.task_id != task_id {
                continue;
            }
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorCode, EventKind};

    #[tokio::test]
    async fn test_each_subscriber_sees_every_event() {
        let bus = EventBroadcaster::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(Event::new(1, EventKind::Started));
        bus.emit(Event::new(1, EventKind::error(ErrorCode::Cancelled, "cancelled")));

        for stream in [&mut a, &mut b] {
            let events = stream.collect_task(1).await;
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].kind, EventKind::Started);
            assert!(events[1].is_terminal());
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_history() {
        let bus = EventBroadcaster::new(16);
        let _keepalive = bus.subscribe();
        bus.emit(Event::new(1, EventKind::Started));
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = EventBroadcaster::new(2);
        let mut slow = bus.subscribe();
        for id in 0..5 {
            bus.emit(Event::new(id, EventKind::Started));
        }
        // Producer never blocked; the slow cursor resumes at the newest events.
        assert_eq!(slow.try_recv().map(|e| e.task_id), Some(3));
        assert_eq!(slow.try_recv().map(|e| e.task_id), Some(4));
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_stream_ends_when_broadcaster_dropped() {
        let bus = EventBroadcaster::new(4);
        let mut stream = bus.subscribe();
        bus.emit(Event::new(9, EventKind::Started));
        drop(bus);
        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
    }
}
