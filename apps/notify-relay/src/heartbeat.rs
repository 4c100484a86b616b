//! Per-connection liveness: a read deadline that any inbound frame rearms,
//! and a probe task that pings the peer on a fixed cadence shorter than the
//! deadline.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::config::ConfigError;
use crate::connection::{ConnectionHandle, TransportError, DEFAULT_WRITE_TIMEOUT};
use crate::protocol::Frame;

pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_PROBE_PERCENT: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    liveness_window: Duration,
    probe_period: Duration,
    write_timeout: Duration,
}

impl HeartbeatConfig {
    pub fn new(liveness_window: Duration, probe_period: Duration) -> Result<Self, ConfigError> {
        if liveness_window.is_zero() || probe_period.is_zero() {
            return Err(ConfigError::ZeroHeartbeat);
        }
        if probe_period >= liveness_window {
            return Err(ConfigError::ProbeTooSlow {
                probe_period,
                liveness_window,
            });
        }
        Ok(Self {
            liveness_window,
            probe_period,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// Bound on every write to a peer; a probe that cannot be written in
    /// time marks the connection dead.
    pub fn with_write_timeout(self, write_timeout: Duration) -> Result<Self, ConfigError> {
        if write_timeout.is_zero() {
            return Err(ConfigError::ZeroWriteTimeout);
        }
        Ok(Self {
            write_timeout,
            ..self
        })
    }

    /// Probe period expressed as a percentage of the liveness window.
    pub fn from_percent(liveness_window: Duration, probe_percent: u32) -> Result<Self, ConfigError> {
        let probe_period = liveness_window * probe_percent / 100;
        Self::new(liveness_window, probe_period)
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    pub fn probe_period(&self) -> Duration {
        self.probe_period
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            probe_period: DEFAULT_LIVENESS_WINDOW * DEFAULT_PROBE_PERCENT / 100,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Read deadline of one connection.
#[derive(Debug)]
pub struct LivenessDeadline {
    window: Duration,
    deadline: Instant,
}

impl LivenessDeadline {
    pub fn arm(window: Duration) -> Self {
        Self {
            window,
            deadline: Instant::now() + window,
        }
    }

    pub fn rearm(&mut self) {
        self.deadline = Instant::now() + self.window;
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    #[cfg(test)]
    fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Sends a probe every `period` until a write fails. The task only finishes
/// on failure and yields the error; the owner aborts it otherwise.
pub fn spawn_probe_task(handle: ConnectionHandle, period: Duration) -> JoinHandle<TransportError> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match handle.send(Frame::Probe).await {
                Ok(()) => trace!(user = %handle.user(), connection = %handle.id(), "probe sent"),
                Err(err) => {
                    debug!(
                        user = %handle.user(),
                        connection = %handle.id(),
                        error = %err,
                        "probe send failed; stopping probe task"
                    );
                    return err;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{RecordingSink, StalledSink};

    #[test_timeout::timeout]
    fn default_probe_is_ninety_percent_of_window() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.liveness_window(), Duration::from_secs(60));
        assert_eq!(config.probe_period(), Duration::from_secs(54));
        assert_eq!(
            HeartbeatConfig::from_percent(Duration::from_secs(60), 90).unwrap(),
            config
        );
    }

    #[test_timeout::timeout]
    fn probe_must_be_faster_than_deadline() {
        let window = Duration::from_secs(10);
        assert!(matches!(
            HeartbeatConfig::new(window, window),
            Err(ConfigError::ProbeTooSlow { .. })
        ));
        assert!(matches!(
            HeartbeatConfig::from_percent(window, 120),
            Err(ConfigError::ProbeTooSlow { .. })
        ));
        assert!(matches!(
            HeartbeatConfig::new(Duration::ZERO, Duration::ZERO),
            Err(ConfigError::ZeroHeartbeat)
        ));
        assert!(HeartbeatConfig::new(window, Duration::from_secs(9)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_pushes_the_deadline_out() {
        let mut liveness = LivenessDeadline::arm(Duration::from_secs(60));
        let first = liveness.deadline();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!liveness.is_expired());
        liveness.rearm();
        assert_eq!(liveness.deadline(), first + Duration::from_secs(59));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!liveness.is_expired());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(liveness.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn probes_follow_the_configured_cadence() {
        let sink = RecordingSink::new();
        let handle = ConnectionHandle::new("alice", sink.clone());
        let task = spawn_probe_task(handle, Duration::from_secs(54));

        tokio::time::sleep(Duration::from_secs(53)).await;
        assert_eq!(sink.probes(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.probes(), 1);
        tokio::time::sleep(Duration::from_secs(54 * 3)).await;
        assert_eq!(sink.probes(), 4);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn probe_task_stops_on_first_failed_write() {
        let handle = ConnectionHandle::new("bob", RecordingSink::failing_after(2));
        let task = spawn_probe_task(handle, Duration::from_secs(5));

        let err = task.await.unwrap();
        assert!(matches!(err, TransportError::Write(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_task_stops_when_connection_is_released() {
        let handle = ConnectionHandle::new("carol", RecordingSink::new());
        let task = spawn_probe_task(handle.clone(), Duration::from_secs(5));
        handle.close().await;

        let err = task.await.unwrap();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_task_stops_when_a_probe_cannot_be_written() {
        let handle =
            ConnectionHandle::with_write_timeout("dave", StalledSink, Duration::from_secs(10));
        let started = Instant::now();
        let task = spawn_probe_task(handle.clone(), Duration::from_secs(54));

        let err = task.await.unwrap();
        assert!(matches!(err, TransportError::Timeout(_)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(64) && elapsed < Duration::from_secs(65));
        assert!(handle.is_closed().await);
    }

    #[test_timeout::timeout]
    fn write_timeout_defaults_to_ten_seconds_and_rejects_zero() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.write_timeout(), Duration::from_secs(10));
        assert_eq!(
            config
                .with_write_timeout(Duration::from_millis(250))
                .unwrap()
                .write_timeout(),
            Duration::from_millis(250)
        );
        assert!(matches!(
            config.with_write_timeout(Duration::ZERO),
            Err(ConfigError::ZeroWriteTimeout)
        ));
    }
}
