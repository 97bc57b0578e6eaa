//! Liveness monitoring.
//!
//! The prober runs as its own task from the moment the connection enters
//!  CONNECT until it leaves NETWORK (or the peer is declared dead). It idles
//!  for a long interval, then probes the peer a few times; the receive
//!  pipeline answering probes (and any other inbound traffic) refreshes the
//!  activity timestamp that the prober checks.
//!
//! Probe transmissions deliberately do not refresh the activity timestamp -
//!  they are the measurement, and counting them as activity would make every
//!  probe succeed trivially.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::engine::pcb::Phase;
use crate::engine::Shared;
use crate::wire::packet::TcuPacket;

pub(crate) async fn run(shared: Arc<Shared>) {
    info!("keep-alive started");

    while shared.keep_alive_running.load(Ordering::SeqCst) {
        if !idle(&shared).await {
            break;
        }

        if !probe_peer(&shared).await {
            if shared.keep_alive_running.swap(false, Ordering::SeqCst) {
                warn!("destination node down");
                shared.pcb.new_phase(Phase::Holdoff);
            }
            break;
        }
    }

    info!("keep-alive stopped");
}

/// sleeps through the idle period in cancel-aware slices; false if cancelled
async fn idle(shared: &Shared) -> bool {
    let deadline = Instant::now() + shared.config.activity_timeout;
    while Instant::now() < deadline {
        if !shared.keep_alive_running.load(Ordering::SeqCst) {
            return false;
        }
        sleep(shared.config.poll_slice).await;
    }
    true
}

/// Up to `activity_attempt_count` probes, each followed by a wait of
///  `activity_attempt_interval`. Succeeds as soon as the link shows recent
///  activity; also bails out (successfully) when cancelled mid-probe.
async fn probe_peer(shared: &Shared) -> bool {
    for attempt in 1..=shared.config.activity_attempt_count {
        if !shared.keep_alive_running.load(Ordering::SeqCst) {
            return true;
        }

        debug!(attempt, "sending keep-alive probe");
        if let Err(e) = shared.transmit_probe(&TcuPacket::ka_req()).await {
            warn!("failed to send keep-alive probe: {}", e);
        }

        let deadline = Instant::now() + shared.config.activity_attempt_interval;
        while Instant::now() < deadline {
            if !shared.keep_alive_running.load(Ordering::SeqCst) {
                return true;
            }
            sleep(shared.config.poll_slice).await;
            if shared.pcb.is_activity_recent() {
                debug!(attempt, "peer is alive");
                return true;
            }
        }
    }
    false
}
