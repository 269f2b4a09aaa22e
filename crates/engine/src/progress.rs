//! Progress reporting for streaming imports and exports.

use crate::broadcast::EventBroadcaster;
use crate::protocol::{Event, EventKind};
use std::time::Instant;

pub struct ProgressReporter {
    task_id: u64,
    total_bytes: u64,
    started: Instant,
    events: EventBroadcaster,
    last_percent: Option<u8>,
}

impl ProgressReporter {
    pub fn new(task_id: u64, total_bytes: u64, events: EventBroadcaster) -> Self {
        Self {
            task_id,
            total_bytes,
            started: Instant::now(),
            events,
            last_percent: None,
        }
    }

    /// Replace the total once it is known, or refine an estimate.
    pub fn set_total_bytes(&mut self, total_bytes: u64) {
        self.total_bytes = total_bytes;
    }

    /// Emit a `progress` event for `bytes_processed` of the total.
    pub fn report(&mut self, bytes_processed: u64) {
        let done = bytes_processed.min(self.total_bytes);
        let percent = percent(done, self.total_bytes);
        let eta_seconds = self.eta_seconds(done);
        self.last_percent = Some(percent);
        self.events.emit(Event::new(
            self.task_id,
            EventKind::Progress {
                percent,
                bytes_processed: done,
                total_bytes: self.total_bytes,
                eta_seconds,
            },
        ));
    }

    /// Close out the stream with a 100% event unless one was already sent.
    pub fn complete(&mut self) {
        if self.last_percent != Some(100) {
            self.last_percent = Some(100);
            self.events.emit(Event::new(
                self.task_id,
                EventKind::Progress {
                    percent: 100,
                    bytes_processed: self.total_bytes,
                    total_bytes: self.total_bytes,
                    eta_seconds: Some(0),
                },
            ));
        }
    }

    fn eta_seconds(&self, done: u64) -> Option<u64> {
        if done == 0 || self.total_bytes == 0 {
            return None;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let remaining = (self.total_bytes - done) as f64;
        Some((elapsed * remaining / done as f64).ceil() as u64)
    }
}

/// Unknown totals (size 0, e.g. a pipe) report 0% until the stream completes.
fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done as u128 * 100) / total as u128).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 200), 0);
        assert_eq!(percent(50, 200), 25);
        assert_eq!(percent(200, 200), 100);
        assert_eq!(percent(10, 0), 0);
    }

    #[tokio::test]
    async fn test_report_then_complete() {
        let bus = EventBroadcaster::new(8);
        let mut stream = bus.subscribe();
        let mut progress = ProgressReporter::new(4, 1_000, bus.clone());

        progress.report(250);
        progress.report(5_000);
        progress.complete();

        match stream.try_recv().unwrap().kind {
            EventKind::Progress { percent, bytes_processed, total_bytes, .. } => {
                assert_eq!((percent, bytes_processed, total_bytes), (25, 250, 1_000));
            }
            other => panic!("unexpected {other:?}"),
        }
        match stream.try_recv().unwrap().kind {
            EventKind::Progress { percent, eta_seconds, .. } => {
                assert_eq!(percent, 100);
                assert_eq!(eta_seconds, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }
        // Already at 100%: complete() adds nothing.
        assert!(stream.try_recv().is_none());
    }
}
