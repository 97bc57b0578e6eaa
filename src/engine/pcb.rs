use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio::time::Instant;
use tracing::{error, info};

use crate::engine::config::EngineConfig;
use crate::wire::packet::TcuPacket;

/// Where the connection is in its lifecycle. The numeric values are ordered:
///  guards like "connection requests only in phases up to INITIALIZE" compare
///  phases numerically, which deliberately includes DEAD and HOLDOFF.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Phase {
    Dead = 0,
    Holdoff = 1,
    Initialize = 2,
    Connect = 3,
    Network = 4,
    Disconnect = 5,
    Closed = 6,
}

impl Phase {
    /// The transition table of the connection state machine. Everything not
    ///  listed here is illegal and gets refused (logged, no state change) -
    ///  a peer must not be able to abort the engine by sending frames in an
    ///  unexpected phase.
    pub fn can_transition_to(self, to: Phase) -> bool {
        use Phase::*;
        match (self, to) {
            (_, Closed) => self != Closed,
            (Dead, Initialize) => true,
            (Dead | Holdoff | Initialize, Connect) => true,
            (Connect, Network) => true,
            (Connect | Network, Disconnect) => true,
            (Connect | Network | Disconnect, Holdoff) => true,
            _ => false,
        }
    }
}

/// The TCU protocol control block: all connection state shared between the
///  receive task, the keep-alive task and the caller's send task.
///
/// Writer discipline (everything else is read-only for the respective task):
///  * receive task: `recv_buffer`, `error_buffer`, `last_activity`,
///    `ack_received`, `seq_cursor` (on ACK), phase transitions triggered by
///    inbound frames
///  * send/facade task: `send_window`, `seq_cursor` (per message),
///    `total_seq`, window and fragment sizing, phase transitions triggered
///    by user commands
///
/// The maps are guarded by one mutex each; the receive task crosses over
///  into `send_window` when handling NACK and ACK frames.
pub struct Pcb {
    config: Arc<EngineConfig>,

    phase: AtomicU8,
    peer: Mutex<Option<SocketAddr>>,
    last_activity: Mutex<Instant>,

    /// one-shot signal: the awaited acknowledgment (SYN|ACK, FIN|ACK or a
    ///  window ACK) arrived
    ack_received: AtomicBool,

    /// next unacknowledged sequence number of the active outgoing message
    pub seq_cursor: AtomicU32,
    /// total fragments of the active outgoing message
    pub total_seq: AtomicU32,

    window_size: AtomicU32,
    dynamic_window: AtomicBool,
    max_frag: AtomicUsize,

    pub send_window: Mutex<BTreeMap<u32, TcuPacket>>,
    pub recv_buffer: Mutex<BTreeMap<u32, TcuPacket>>,
    pub error_buffer: Mutex<BTreeMap<u32, TcuPacket>>,

    /// start of the currently assembling inbound transfer, for logging the
    ///  transfer duration on delivery
    pub transfer_started: Mutex<Option<Instant>>,
}

impl Pcb {
    pub fn new(config: Arc<EngineConfig>) -> Pcb {
        let window_size = config.window_size.unwrap_or(0);
        Pcb {
            phase: AtomicU8::new(Phase::Dead.into()),
            peer: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            ack_received: AtomicBool::new(false),
            seq_cursor: AtomicU32::new(1),
            total_seq: AtomicU32::new(0),
            window_size: AtomicU32::new(window_size),
            dynamic_window: AtomicBool::new(config.window_size.is_none()),
            max_frag: AtomicUsize::new(config.max_frag),
            send_window: Mutex::new(BTreeMap::new()),
            recv_buffer: Mutex::new(BTreeMap::new()),
            error_buffer: Mutex::new(BTreeMap::new()),
            transfer_started: Mutex::new(None),
            config,
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::try_from(self.phase.load(Ordering::SeqCst))
            .expect("phase cell only ever holds Phase values")
    }

    /// Moves to a new phase if the transition is legal; refuses and logs
    ///  otherwise. Returns whether the transition happened.
    pub fn new_phase(&self, to: Phase) -> bool {
        let from = self.phase();
        if !from.can_transition_to(to) {
            error!(?from, ?to, "illegal phase transition refused");
            return false;
        }
        self.phase.store(to.into(), Ordering::SeqCst);
        info!(?from, ?to, "new phase");
        true
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap()
    }

    pub fn set_peer(&self, peer: SocketAddr) {
        *self.peer.lock().unwrap() = Some(peer);
        info!(?peer, "destination node set");
    }

    pub fn update_last_activity(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// true iff something was sent or received within the last
    ///  `activity_attempt_count * activity_attempt_interval`
    pub fn is_activity_recent(&self) -> bool {
        let last = *self.last_activity.lock().unwrap();
        last.elapsed() < self.config.activity_recent_window()
    }

    pub fn signal_ack(&self) {
        self.ack_received.store(true, Ordering::SeqCst);
    }

    pub fn clear_ack(&self) {
        self.ack_received.store(false, Ordering::SeqCst);
    }

    /// consumes the one-shot acknowledgment signal
    pub fn take_ack(&self) -> bool {
        self.ack_received.swap(false, Ordering::SeqCst)
    }

    pub fn max_frag(&self) -> usize {
        self.max_frag.load(Ordering::SeqCst)
    }

    pub fn set_max_frag(&self, size: usize) {
        self.max_frag.store(size, Ordering::SeqCst);
        info!(size, "max fragment size set");
    }

    pub fn set_window_size(&self, size: u32) {
        self.window_size.store(size, Ordering::SeqCst);
        self.dynamic_window.store(false, Ordering::SeqCst);
        info!(size, "window size set manually");
    }

    pub fn set_dynamic_window(&self) {
        self.dynamic_window.store(true, Ordering::SeqCst);
        info!("dynamic window sizing enabled");
    }

    /// Window size for a message of `total_seq` fragments. With dynamic
    ///  sizing this is `max(1, total_seq / 5)`, recorded for the duration of
    ///  the message so the send and receive side agree on boundaries.
    pub fn effective_window_size(&self, total_seq: u32) -> u32 {
        if self.dynamic_window.load(Ordering::SeqCst) {
            let size = (total_seq / 5).max(1);
            self.window_size.store(size, Ordering::SeqCst);
            size
        } else {
            self.window_size.load(Ordering::SeqCst).max(1)
        }
    }

    pub fn window_size(&self) -> u32 {
        self.window_size.load(Ordering::SeqCst).max(1)
    }

    /// drops inbound assembly state, ready for the next logical message
    pub fn clear_receive_buffers(&self) {
        self.recv_buffer.lock().unwrap().clear();
        self.error_buffer.lock().unwrap().clear();
        *self.transfer_started.lock().unwrap() = None;
    }
}
