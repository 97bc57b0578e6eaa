use std::path::PathBuf;
use std::time::Duration;

use crate::wire::packet::MAX_PAYLOAD;

/// All tunables of a TCU engine in one place. The engine snapshots this at
///  construction (shared as `Arc<EngineConfig>`); runtime-settable values
///  (fragment size, window size) live in the PCB instead.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// silence on the link before the keep-alive prober starts sending probes
    pub activity_timeout: Duration,
    /// probe attempts before the peer is declared dead
    pub activity_attempt_count: u32,
    /// wait per probe attempt; also the base of the activity-recency window
    ///  (`activity_attempt_count * activity_attempt_interval`)
    pub activity_attempt_interval: Duration,

    /// wait for SYN|ACK / FIN|ACK after a connection or disconnection request
    pub connection_timeout: Duration,
    /// wait for the window acknowledgment before retransmitting
    pub receive_timeout: Duration,

    /// granularity at which every waiting loop observes cancellation
    pub poll_slice: Duration,
    /// pause between fragments of one window so loopback tests do not outrun
    ///  the kernel socket buffer
    pub inter_fragment_gap: Duration,

    /// initial maximum fragment payload size, in `(0, MAX_PAYLOAD]`
    pub max_frag: usize,
    /// initial window size; `None` enables dynamic sizing
    ///  (`max(1, total_fragments / 5)`)
    pub window_size: Option<u32>,

    /// where incoming files are saved; created on demand
    pub recv_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            activity_timeout: Duration::from_secs(300),
            activity_attempt_count: 3,
            activity_attempt_interval: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(60),
            poll_slice: Duration::from_millis(100),
            inter_fragment_gap: Duration::from_micros(500),
            max_frag: MAX_PAYLOAD,
            window_size: None,
            recv_dir: default_recv_dir(),
        }
    }
}

impl EngineConfig {
    /// silence threshold of [is_activity_recent](crate::engine::pcb::Pcb::is_activity_recent)
    pub fn activity_recent_window(&self) -> Duration {
        self.activity_attempt_interval * self.activity_attempt_count
    }
}

/// `$HOME/recv`, or `./recv` for processes without a home directory
pub fn default_recv_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join("recv"),
        _ => PathBuf::from("recv"),
    }
}
