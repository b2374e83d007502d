//! Per-connection activity tracking

use std::sync::Mutex;
use tokio::time::Instant;

/// Connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    /// When the connection was opened
    pub connected_at: Instant,
    /// Last frame seen in either direction
    pub last_activity: Instant,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl ConnectionStats {
    fn new(now: Instant) -> Self {
        Self {
            connected_at: now,
            last_activity: now,
            frames_received: 0,
            frames_sent: 0,
            messages_received: 0,
            messages_sent: 0,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }
}

/// Shared activity recorder, updated by both direction tasks
#[derive(Debug)]
pub(crate) struct Activity {
    stats: Mutex<ConnectionStats>,
}

impl Activity {
    pub(crate) fn new() -> Self {
        Self {
            stats: Mutex::new(ConnectionStats::new(Instant::now())),
        }
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }

    /// Restart the clocks once the connection actually opens
    pub(crate) fn reset(&self) {
        self.update(|stats| *stats = ConnectionStats::new(Instant::now()));
    }

    pub(crate) fn touch(&self) {
        self.update(|stats| stats.last_activity = Instant::now());
    }

    pub(crate) fn frame_received(&self, bytes: usize) {
        self.update(|stats| {
            stats.frames_received += 1;
            stats.bytes_received += bytes as u64;
            stats.last_activity = Instant::now();
        });
    }

    pub(crate) fn frame_sent(&self, bytes: usize) {
        self.update(|stats| {
            stats.frames_sent += 1;
            stats.bytes_sent += bytes as u64;
            stats.last_activity = Instant::now();
        });
    }

    pub(crate) fn message_received(&self) {
        self.update(|stats| stats.messages_received += 1);
    }

    pub(crate) fn message_sent(&self) {
        self.update(|stats| stats.messages_sent += 1);
    }

    pub(crate) fn last_activity(&self) -> Instant {
        self.snapshot().last_activity
    }

    pub(crate) fn snapshot(&self) -> ConnectionStats {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_activity_counts_frames_and_bytes() {
        let activity = Activity::new();
        let opened = activity.last_activity();

        tokio::time::advance(Duration::from_secs(3)).await;
        activity.frame_received(10);
        activity.frame_sent(4);
        activity.frame_sent(6);
        activity.message_sent();

        let stats = activity.snapshot();
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.bytes_received, 10);
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.bytes_sent, 10);
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.last_activity - opened, Duration::from_secs(3));
    }
}
