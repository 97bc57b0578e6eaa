//! The TCU engine: one instance talks to exactly one remote endpoint over a
//!  single UDP socket, providing connection establishment, liveness
//!  monitoring, fragmentation/reassembly with CRC-guarded selective repeat,
//!  and a sliding send window.
//!
//! The facade owns the protocol control block, the socket and two background
//!  tasks (receive pipeline, keep-alive prober). Sends run on the caller's
//!  task and synchronize with the receive pipeline through the PCB. All
//!  loops observe their cancellation flags at a 100 ms granularity, so
//!  shutdown is prompt without aborting tasks mid-frame.

pub mod config;
pub mod endpoint;
pub mod fault;
mod keep_alive;
pub mod pcb;
pub(crate) mod receive;
mod send;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::engine::config::EngineConfig;
use crate::engine::endpoint::UdpEndpoint;
use crate::engine::fault::FaultInjector;
use crate::engine::pcb::{Pcb, Phase};
use crate::error::TcuError;
use crate::sink::DeliverySink;
use crate::wire::file_record::FileRecord;
use crate::wire::packet::{TcuPacket, MAX_PAYLOAD};

/// Everything the background tasks share with the facade. The facade hands
///  each task an `Arc<Shared>` at spawn; nothing holds a reference back to
///  the engine itself.
pub(crate) struct Shared {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) pcb: Pcb,
    endpoint: OnceLock<UdpEndpoint>,
    pub(crate) sink: Arc<dyn DeliverySink>,
    pub(crate) fault: FaultInjector,

    pub(crate) receive_running: AtomicBool,
    pub(crate) keep_alive_running: AtomicBool,
    keep_alive_task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn new(config: Arc<EngineConfig>, sink: Arc<dyn DeliverySink>) -> Shared {
        Shared {
            pcb: Pcb::new(config.clone()),
            config,
            endpoint: OnceLock::new(),
            sink,
            fault: FaultInjector::default(),
            receive_running: AtomicBool::new(false),
            keep_alive_running: AtomicBool::new(false),
            keep_alive_task: Mutex::new(None),
        }
    }

    pub(crate) fn endpoint(&self) -> &UdpEndpoint {
        self.endpoint.get().expect("tasks only run on a bound engine")
    }

    async fn transmit_frame(&self, frame: Bytes, refresh_activity: bool) -> Result<(), TcuError> {
        let peer = self.pcb.peer().ok_or(TcuError::NoPeer)?;
        let endpoint = self.endpoint.get().ok_or(TcuError::NotBound)?;
        endpoint.send_to(&frame, peer).await?;
        if refresh_activity {
            self.pcb.update_last_activity();
        }
        Ok(())
    }

    /// control-frame transmission: straight to the peer, refreshes activity
    pub(crate) async fn transmit(&self, packet: &TcuPacket) -> Result<(), TcuError> {
        self.transmit_frame(packet.to_bytes(), true).await
    }

    /// Keep-alive probes do not count as link activity - they are the
    ///  measurement, not the signal.
    pub(crate) async fn transmit_probe(&self, packet: &TcuPacket) -> Result<(), TcuError> {
        self.transmit_frame(packet.to_bytes(), false).await
    }

    /// data-fragment transmission: subject to fault injection
    pub(crate) async fn transmit_data(&self, packet: &TcuPacket) -> Result<(), TcuError> {
        let frame = self.fault.maybe_corrupt(packet.to_bytes());
        self.transmit_frame(frame, true).await
    }

    pub(crate) fn start_keep_alive(self: &Arc<Self>) {
        if self.keep_alive_running.swap(true, Ordering::SeqCst) {
            return; // already running
        }
        let handle = tokio::spawn(keep_alive::run(self.clone()));
        *self.keep_alive_task.lock().unwrap() = Some(handle);
    }

    /// Signals the prober to stop; it observes the flag within one poll
    ///  slice. Joining happens at engine shutdown.
    pub(crate) fn stop_keep_alive(&self) {
        self.keep_alive_running.store(false, Ordering::SeqCst);
    }
}

/// The public face of a TCU node.
pub struct TcuEngine {
    shared: Arc<Shared>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcuEngine {
    pub fn new(config: EngineConfig, sink: Arc<dyn DeliverySink>) -> TcuEngine {
        TcuEngine {
            shared: Arc::new(Shared::new(Arc::new(config), sink)),
            receive_task: Mutex::new(None),
        }
    }

    /// Binds the UDP socket and starts the receive pipeline. Port 0 requests
    ///  an ephemeral port; the actually bound address is returned.
    pub async fn bind(&self, port: u16) -> Result<SocketAddr, TcuError> {
        if self.shared.endpoint.get().is_some() {
            return Err(TcuError::InvalidArgument("node port already set"));
        }

        let endpoint = UdpEndpoint::bind(port).await?;
        let addr = endpoint.local_addr()?;
        let _ = self.shared.endpoint.set(endpoint);

        self.shared.pcb.new_phase(Phase::Initialize);
        self.shared.receive_running.store(true, Ordering::SeqCst);
        *self.receive_task.lock().unwrap() = Some(tokio::spawn(receive::run(self.shared.clone())));

        info!(%addr, "node listening");
        Ok(addr)
    }

    pub fn set_peer(&self, peer: SocketAddr) {
        self.shared.pcb.set_peer(peer);
    }

    pub fn set_max_frag(&self, size: usize) -> Result<(), TcuError> {
        if size == 0 || size > MAX_PAYLOAD {
            return Err(TcuError::InvalidArgument("fragment size out of range"));
        }
        self.shared.pcb.set_max_frag(size);
        Ok(())
    }

    pub fn set_window_size(&self, size: u32) -> Result<(), TcuError> {
        if size == 0 {
            return Err(TcuError::InvalidArgument("window size must be positive"));
        }
        self.shared.pcb.set_window_size(size);
        Ok(())
    }

    pub fn set_dynamic_window(&self) {
        self.shared.pcb.set_dynamic_window();
    }

    /// Sends a connection request and waits for the acknowledgment. On
    ///  success the connection is in NETWORK phase; a silent peer leaves it
    ///  in HOLDOFF.
    pub async fn connect(&self) -> Result<(), TcuError> {
        if self.shared.pcb.phase() > Phase::Initialize {
            return Err(TcuError::WrongPhase("already active connection"));
        }

        self.shared.pcb.peer().ok_or(TcuError::NoPeer)?;
        self.shared.endpoint.get().ok_or(TcuError::NotBound)?;

        info!("sending connection request");
        self.shared.pcb.clear_ack();
        // phase first: the acknowledgment may race the transmit completion
        self.shared.pcb.new_phase(Phase::Connect);
        self.shared.transmit(&TcuPacket::conn_req()).await?;

        if self.await_ack().await {
            Ok(())
        } else {
            warn!("no connection acknowledgment");
            self.shared.pcb.new_phase(Phase::Holdoff);
            self.shared.stop_keep_alive();
            Err(TcuError::PeerSilent)
        }
    }

    /// Sends a disconnection request and waits for the acknowledgment.
    ///  Either way the connection ends up in HOLDOFF.
    pub async fn disconnect(&self) -> Result<(), TcuError> {
        if !matches!(self.shared.pcb.phase(), Phase::Connect | Phase::Network) {
            return Err(TcuError::WrongPhase("connection not established"));
        }

        info!("sending disconnection request");
        self.shared.pcb.clear_ack();
        self.shared.pcb.new_phase(Phase::Disconnect);
        self.shared.transmit(&TcuPacket::disc_req()).await?;

        if self.await_ack().await {
            Ok(())
        } else {
            warn!("no disconnection acknowledgment");
            self.shared.pcb.new_phase(Phase::Holdoff);
            self.shared.stop_keep_alive();
            Err(TcuError::PeerSilent)
        }
    }

    async fn await_ack(&self) -> bool {
        let deadline = Instant::now() + self.shared.config.connection_timeout;
        while Instant::now() < deadline {
            if self.shared.pcb.take_ack() {
                return true;
            }
            sleep(self.shared.config.poll_slice).await;
        }
        false
    }

    /// Sends a text message, fragmenting it if necessary. Returns once the
    ///  message is fully acknowledged (single-fragment messages return
    ///  immediately after transmission).
    pub async fn send_text(&self, text: &str) -> Result<(), TcuError> {
        send::send_text(&self.shared, text).await
    }

    /// Reads the file at `path` and transfers it. IO problems are reported
    ///  without touching the connection.
    pub async fn send_file(&self, path: &Path) -> Result<(), TcuError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(TcuError::InvalidPath)?;
        let content = tokio::fs::read(path).await.map_err(TcuError::FileIo)?;

        let record = FileRecord::new(name, content.into())?;
        info!(name = %record.name, bytes = record.content.len(), "sending file");
        send::send_file(&self.shared, &record).await
    }

    pub fn phase(&self) -> Phase {
        self.shared.pcb.phase()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TcuError> {
        self.shared.endpoint.get().ok_or(TcuError::NotBound)?.local_addr()
    }

    /// the testing knobs (`set error rate` and friends)
    pub fn fault(&self) -> &FaultInjector {
        &self.shared.fault
    }

    /// Stops both tasks and closes the socket. The engine is unusable
    ///  afterwards.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.shared.pcb.new_phase(Phase::Closed);
        self.shared.stop_keep_alive();
        self.shared.receive_running.store(false, Ordering::SeqCst);

        let receive_task = self.receive_task.lock().unwrap().take();
        if let Some(handle) = receive_task {
            let _ = handle.await;
        }
        let keep_alive_task = self.shared.keep_alive_task.lock().unwrap().take();
        if let Some(handle) = keep_alive_task {
            let _ = handle.await;
        }
    }
}

impl Drop for TcuEngine {
    fn drop(&mut self) {
        self.shared.receive_running.store(false, Ordering::SeqCst);
        self.shared.keep_alive_running.store(false, Ordering::SeqCst);

        // best effort for engines dropped without an explicit shutdown
        if let Some(handle) = self.receive_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.shared.keep_alive_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    use super::*;
    use crate::test_util::{test_engine, test_engine_pair};
    use crate::wire::packet::TcuFlags;
    use crate::wire::seq::Seq24;

    fn quick_config() -> EngineConfig {
        EngineConfig {
            receive_timeout: Duration::from_millis(500),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_handshake() {
        let (a, _, b, _) = test_engine_pair(EngineConfig::default(), EngineConfig::default()).await;

        assert_eq!(a.phase(), Phase::Initialize);
        assert_eq!(b.phase(), Phase::Initialize);

        timeout(Duration::from_secs(1), a.connect())
            .await
            .expect("handshake within a second")
            .unwrap();

        assert_eq!(a.phase(), Phase::Network);
        assert_eq!(b.phase(), Phase::Network);

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_single_fragment_text() {
        let (a, _, b, sink_b) = test_engine_pair(EngineConfig::default(), EngineConfig::default()).await;
        a.connect().await.unwrap();

        a.send_text("hello").await.unwrap();

        assert!(sink_b.wait_for_texts(1, Duration::from_secs(2)).await);
        assert_eq!(sink_b.texts(), vec!["hello".to_string()]);

        // the receiver's ACK(0) clears the sender's send window
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !a.shared.pcb.send_window.lock().unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "send window not cleared");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_fragmented_text() {
        let (a, _, b, sink_b) = test_engine_pair(EngineConfig::default(), EngineConfig::default()).await;
        a.connect().await.unwrap();
        a.set_max_frag(4).unwrap();

        a.send_text("ABCDEFGHIJ").await.unwrap();

        assert!(sink_b.wait_for_texts(1, Duration::from_secs(5)).await);
        assert_eq!(sink_b.texts(), vec!["ABCDEFGHIJ".to_string()]);
        assert_eq!(a.phase(), Phase::Network);

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let (a, _, b, sink_b) = test_engine_pair(EngineConfig::default(), EngineConfig::default()).await;
        a.connect().await.unwrap();
        a.set_max_frag(1024).unwrap();

        let content: Vec<u8> = (0..100 * 1024).map(|i| (i % 251) as u8).collect();
        let dir = std::env::temp_dir().join(format!("tcu-engine-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("payload.bin");
        tokio::fs::write(&path, &content).await.unwrap();

        a.send_file(&path).await.unwrap();

        assert!(sink_b.wait_for_files(1, Duration::from_secs(10)).await);
        let files = sink_b.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "payload.bin");
        assert_eq!(files[0].content.to_vec(), content);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (a, _, b, _) = test_engine_pair(EngineConfig::default(), EngineConfig::default()).await;
        a.connect().await.unwrap();

        a.disconnect().await.unwrap();

        assert_eq!(a.phase(), Phase::Holdoff);
        assert_eq!(b.phase(), Phase::Holdoff);
        assert!(!a.shared.keep_alive_running.load(Ordering::SeqCst));
        assert!(!b.shared.keep_alive_running.load(Ordering::SeqCst));

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_phase_guards() {
        let (a, _) = test_engine(EngineConfig::default()).await;
        a.set_peer(SocketAddr::from(([127, 0, 0, 1], 9)));

        assert!(matches!(
            a.send_text("too early").await,
            Err(TcuError::WrongPhase("connection not established"))
        ));
        assert!(matches!(
            a.disconnect().await,
            Err(TcuError::WrongPhase("connection not established"))
        ));

        a.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_guard_when_active() {
        let (a, _, b, _) = test_engine_pair(EngineConfig::default(), EngineConfig::default()).await;
        a.connect().await.unwrap();

        assert!(matches!(
            a.connect().await,
            Err(TcuError::WrongPhase("already active connection"))
        ));

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_eventual_delivery_under_corruption() {
        let (a, _, b, sink_b) = test_engine_pair(quick_config(), quick_config()).await;
        a.connect().await.unwrap();
        a.set_max_frag(16).unwrap();
        a.fault().set_error_rate(25);

        let message = "0123456789abcdef".repeat(40);
        a.send_text(&message).await.unwrap();

        assert!(sink_b.wait_for_texts(1, Duration::from_secs(20)).await);
        assert_eq!(sink_b.texts(), vec![message]);

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_eventual_delivery_under_packet_loss() {
        let (a, _, b, sink_b) = test_engine_pair(quick_config(), quick_config()).await;
        a.connect().await.unwrap();
        a.set_max_frag(16).unwrap();
        a.fault().set_packet_loss_rate(10);

        let message = "pqrstuvwxyz01234".repeat(30);
        a.send_text(&message).await.unwrap();

        assert!(sink_b.wait_for_texts(1, Duration::from_secs(20)).await);
        assert_eq!(sink_b.texts(), vec![message]);

        a.shutdown().await;
        b.shutdown().await;
    }

    async fn recv_packet(socket: &UdpSocket) -> TcuPacket {
        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("reply expected")
            .unwrap();
        TcuPacket::from_datagram(&buf[..len]).unwrap()
    }

    /// scripted peer: corrupts fragment 2 of 3 on the wire and checks the
    ///  receiver's NACK / repair / delivery sequence step by step
    #[tokio::test]
    async fn test_nack_driven_repair() {
        let (b, sink_b) = test_engine(EngineConfig::default()).await;

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        b.set_peer(peer.local_addr().unwrap());
        let b_addr = SocketAddr::from(([127, 0, 0, 1], b.local_addr().unwrap().port()));

        // handshake
        peer.send_to(&TcuPacket::conn_req().to_bytes(), b_addr).await.unwrap();
        let reply = recv_packet(&peer).await;
        assert_eq!(reply.flags, TcuFlags::SYN | TcuFlags::ACK);
        assert_eq!(b.phase(), Phase::Network);

        // fragment 1 intact, fragment 2 corrupted after CRC, fragment 3 terminal
        let frag1 = TcuPacket::data(Seq24::new(1), TcuFlags::MF, Bytes::from_static(b"ABCD"));
        let frag2 = TcuPacket::data(Seq24::new(2), TcuFlags::MF, Bytes::from_static(b"EFGH"));
        let frag3 = TcuPacket::data(Seq24::new(3), TcuFlags::empty(), Bytes::from_static(b"IJ"));

        let mut corrupted = frag2.to_bytes().to_vec();
        corrupted[8] ^= 0xff;

        peer.send_to(&frag1.to_bytes(), b_addr).await.unwrap();
        peer.send_to(&corrupted, b_addr).await.unwrap();
        peer.send_to(&frag3.to_bytes(), b_addr).await.unwrap();

        let nack = recv_packet(&peer).await;
        assert_eq!(nack.flags, TcuFlags::NACK);
        assert_eq!(nack.seq.value(), 2);

        // the protocol retransmits a NACKed mid-fragment with FIN added,
        //  making it a window boundary the receiver acknowledges
        let repaired = TcuPacket::data(Seq24::new(2), TcuFlags::MF | TcuFlags::FIN, Bytes::from_static(b"EFGH"));
        peer.send_to(&repaired.to_bytes(), b_addr).await.unwrap();

        let ack = recv_packet(&peer).await;
        assert_eq!(ack.flags, TcuFlags::ACK);
        assert_eq!(ack.seq.value(), 2);

        // the sender resumes from the cursor; the re-sent terminal fragment
        //  completes reassembly, acknowledged with the last fragment's seq
        peer.send_to(&frag3.to_bytes(), b_addr).await.unwrap();
        let ack = recv_packet(&peer).await;
        assert_eq!(ack.flags, TcuFlags::ACK);
        assert_eq!(ack.seq.value(), 3);

        assert!(sink_b.wait_for_texts(1, Duration::from_secs(2)).await);
        assert_eq!(sink_b.texts(), vec!["ABCDEFGHIJ".to_string()]);

        b.shutdown().await;
    }

    /// a lost mid-window fragment is caught at reassembly and explicitly
    ///  requested again
    #[tokio::test]
    async fn test_missing_fragment_requested_at_reassembly() {
        let (b, sink_b) = test_engine(EngineConfig::default()).await;

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        b.set_peer(peer.local_addr().unwrap());
        let b_addr = SocketAddr::from(([127, 0, 0, 1], b.local_addr().unwrap().port()));

        peer.send_to(&TcuPacket::conn_req().to_bytes(), b_addr).await.unwrap();
        let _syn_ack = recv_packet(&peer).await;

        let frag1 = TcuPacket::data(Seq24::new(1), TcuFlags::MF, Bytes::from_static(b"AB"));
        let frag3 = TcuPacket::data(Seq24::new(3), TcuFlags::empty(), Bytes::from_static(b"EF"));

        // fragment 2 never arrives
        peer.send_to(&frag1.to_bytes(), b_addr).await.unwrap();
        peer.send_to(&frag3.to_bytes(), b_addr).await.unwrap();

        let nack = recv_packet(&peer).await;
        assert_eq!(nack.flags, TcuFlags::NACK);
        assert_eq!(nack.seq.value(), 2);

        let frag2 = TcuPacket::data(Seq24::new(2), TcuFlags::MF | TcuFlags::FIN, Bytes::from_static(b"CD"));
        peer.send_to(&frag2.to_bytes(), b_addr).await.unwrap();
        let _boundary_ack = recv_packet(&peer).await;

        peer.send_to(&frag3.to_bytes(), b_addr).await.unwrap();
        let ack = recv_packet(&peer).await;
        assert_eq!(ack.seq.value(), 3);

        assert!(sink_b.wait_for_texts(1, Duration::from_secs(2)).await);
        assert_eq!(sink_b.texts(), vec!["ABCDEF".to_string()]);

        b.shutdown().await;
    }

    /// unknown flag combinations and malformed datagrams are dropped without
    ///  disturbing the connection
    #[tokio::test]
    async fn test_junk_frames_dropped() {
        let (b, _) = test_engine(EngineConfig::default()).await;

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        b.set_peer(peer.local_addr().unwrap());
        let b_addr = SocketAddr::from(([127, 0, 0, 1], b.local_addr().unwrap().port()));

        peer.send_to(&TcuPacket::conn_req().to_bytes(), b_addr).await.unwrap();
        let _syn_ack = recv_packet(&peer).await;

        // short datagram, unknown flag combination, truncated payload
        peer.send_to(b"abc", b_addr).await.unwrap();
        let junk = TcuPacket::data(Seq24::new(1), TcuFlags::SYN | TcuFlags::KA, Bytes::from_static(b"x"));
        peer.send_to(&junk.to_bytes(), b_addr).await.unwrap();
        let valid = TcuPacket::data(Seq24::new(1), TcuFlags::DF, Bytes::from_static(b"still alive"));
        peer.send_to(&valid.to_bytes()[..9], b_addr).await.unwrap();

        // the engine is still responsive afterwards
        peer.send_to(&TcuPacket::ka_req().to_bytes(), b_addr).await.unwrap();
        let reply = recv_packet(&peer).await;
        assert_eq!(reply.flags, TcuFlags::KA | TcuFlags::ACK);
        assert_eq!(b.phase(), Phase::Network);

        b.shutdown().await;
    }

    /// keep-alive: a silent peer is declared dead within
    ///  `activity_timeout + attempts * attempt_interval`, and inbound
    ///  activity during the probe window keeps the connection alive
    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_declares_silent_peer_dead() {
        let (a, _) = test_engine(EngineConfig::default()).await;
        a.set_peer(SocketAddr::from(([127, 0, 0, 1], 9))); // discard port, nobody answers

        a.shared.pcb.new_phase(Phase::Connect);
        a.shared.start_keep_alive();

        let started = tokio::time::Instant::now();
        while a.phase() != Phase::Holdoff {
            assert!(
                started.elapsed() < Duration::from_secs(316),
                "peer not declared dead within the liveness bound"
            );
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        // 300 s idle + 3 probes of 5 s each, plus polling slack
        assert!(started.elapsed() >= Duration::from_secs(314));
        assert!(!a.shared.keep_alive_running.load(Ordering::SeqCst));

        a.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_survives_on_activity() {
        let (a, _) = test_engine(EngineConfig::default()).await;
        a.set_peer(SocketAddr::from(([127, 0, 0, 1], 9)));

        a.shared.pcb.new_phase(Phase::Connect);
        a.shared.start_keep_alive();

        // first probe round starts at 300 s; answer it with inbound activity
        tokio::time::sleep(Duration::from_secs(301)).await;
        a.shared.pcb.update_last_activity();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(a.phase(), Phase::Connect);

        // no further activity: the next probe round gives the peer up
        tokio::time::sleep(Duration::from_secs(340)).await;
        assert_eq!(a.phase(), Phase::Holdoff);

        a.shutdown().await;
    }
}
