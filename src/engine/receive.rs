//! The receive pipeline: one task that pulls datagrams off the socket,
//!  decodes them and drives the connection state machine.
//!
//! Dispatch is on the exact flag combination. A combination that is not part
//!  of the protocol - or a frame arriving in a phase where it makes no
//!  sense - is logged and dropped; a misbehaving peer must never be able to
//!  take the engine down.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::pcb::Phase;
use crate::engine::Shared;
use crate::wire::file_record::FileRecord;
use crate::wire::packet::{TcuFlags, TcuPacket};
use crate::wire::seq::Seq24;

pub(crate) async fn run(shared: Arc<Shared>) {
    info!("receive loop started");

    while shared.receive_running.load(Ordering::SeqCst) {
        match shared.endpoint().recv(shared.config.poll_slice).await {
            Ok(None) => {}
            Ok(Some((datagram, src))) => process_datagram(&shared, &datagram, src).await,
            Err(e) => {
                // transient OS-level receive errors do not stop the loop
                error!("error receiving datagram: {}", e);
            }
        }
    }

    info!("receive loop stopped");
}

/// decodes and dispatches one datagram - the single entry point of the pipeline
pub(crate) async fn process_datagram(shared: &Arc<Shared>, datagram: &[u8], src: SocketAddr) {
    let packet = match TcuPacket::from_datagram(datagram) {
        Ok(packet) => packet,
        Err(e) => {
            error!(?src, "dropping malformed frame: {}", e);
            return;
        }
    };

    if let Some(peer) = shared.pcb.peer() {
        if src != peer {
            warn!(?src, ?peer, "dropping frame from unexpected source");
            return;
        }
    }

    shared.pcb.update_last_activity();
    debug!(?src, packet = ?packet, "frame received");

    const SYN: u8 = TcuFlags::SYN.bits();
    const SYN_ACK: u8 = TcuFlags::SYN.bits() | TcuFlags::ACK.bits();
    const FIN: u8 = TcuFlags::FIN.bits();
    const FIN_ACK: u8 = TcuFlags::FIN.bits() | TcuFlags::ACK.bits();
    const KA: u8 = TcuFlags::KA.bits();
    const KA_ACK: u8 = TcuFlags::KA.bits() | TcuFlags::ACK.bits();
    const ACK: u8 = TcuFlags::ACK.bits();
    const NACK: u8 = TcuFlags::NACK.bits();
    const DF: u8 = TcuFlags::DF.bits();
    const DF_FL: u8 = TcuFlags::DF.bits() | TcuFlags::FL.bits();
    const MF: u8 = TcuFlags::MF.bits();
    const MF_FIN: u8 = TcuFlags::MF.bits() | TcuFlags::FIN.bits();
    const MF_FL: u8 = TcuFlags::MF.bits() | TcuFlags::FL.bits();
    const MF_FIN_FL: u8 = TcuFlags::MF.bits() | TcuFlags::FIN.bits() | TcuFlags::FL.bits();
    const LAST_TEXT: u8 = 0;
    const LAST_FILE: u8 = TcuFlags::FL.bits();

    match packet.flags.bits() {
        SYN => on_conn_req(shared).await,
        SYN_ACK => on_conn_ack(shared).await,
        FIN => on_disc_req(shared).await,
        FIN_ACK => on_disc_ack(shared).await,
        KA => on_ka_req(shared).await,
        KA_ACK => {} // activity timestamp already refreshed, nothing else to do
        ACK => on_ack(shared, packet.seq).await,
        NACK => on_nack(shared, packet.seq).await,
        DF => on_single_fragment(shared, packet, src, false).await,
        DF_FL => on_single_fragment(shared, packet, src, true).await,
        MF | MF_FL => on_mid_fragment(shared, packet).await,
        MF_FIN | MF_FIN_FL => on_window_boundary(shared, packet).await,
        LAST_TEXT => on_last_fragment(shared, packet, src, false).await,
        LAST_FILE => on_last_fragment(shared, packet, src, true).await,
        other => {
            error!(flags = format_args!("{:#04x}", other), "unknown flag combination - dropping frame");
        }
    }
}

async fn on_conn_req(shared: &Arc<Shared>) {
    if shared.pcb.phase() > Phase::Initialize {
        warn!("connection request in phase {:?} - dropping", shared.pcb.phase());
        return;
    }

    info!("received connection request");
    shared.pcb.new_phase(Phase::Connect);
    shared.start_keep_alive();

    if let Err(e) = shared.transmit(&TcuPacket::conn_ack()).await {
        error!("failed to send connection acknowledgment: {}", e);
        return;
    }
    shared.pcb.new_phase(Phase::Network);
}

async fn on_conn_ack(shared: &Arc<Shared>) {
    if shared.pcb.phase() != Phase::Connect {
        warn!("connection acknowledgment in phase {:?} - dropping", shared.pcb.phase());
        return;
    }

    info!("received connection acknowledgment");
    shared.pcb.new_phase(Phase::Network);
    shared.start_keep_alive();
    shared.pcb.signal_ack();
}

async fn on_disc_req(shared: &Arc<Shared>) {
    if !matches!(shared.pcb.phase(), Phase::Connect | Phase::Network) {
        warn!("disconnection request in phase {:?} - dropping", shared.pcb.phase());
        return;
    }

    info!("received disconnection request");
    shared.pcb.new_phase(Phase::Disconnect);
    shared.stop_keep_alive();

    if let Err(e) = shared.transmit(&TcuPacket::disc_ack()).await {
        error!("failed to send disconnection acknowledgment: {}", e);
        return;
    }
    shared.pcb.new_phase(Phase::Holdoff);
}

async fn on_disc_ack(shared: &Arc<Shared>) {
    if shared.pcb.phase() != Phase::Disconnect {
        warn!("disconnection acknowledgment in phase {:?} - dropping", shared.pcb.phase());
        return;
    }

    info!("received disconnection acknowledgment");
    shared.pcb.signal_ack();
    shared.pcb.new_phase(Phase::Holdoff);
    shared.stop_keep_alive();
}

async fn on_ka_req(shared: &Arc<Shared>) {
    if !matches!(shared.pcb.phase(), Phase::Connect | Phase::Network) {
        debug!("keep-alive probe while not connected - ignoring");
        return;
    }

    debug!("received keep-alive probe");
    if let Err(e) = shared.transmit(&TcuPacket::ka_ack()).await {
        warn!("failed to answer keep-alive probe: {}", e);
    }
}

/// Positive acknowledgment: advance the send cursor past the acknowledged
///  fragment and wake the waiting send pipeline. An ACK with sequence
///  number 0 confirms a delivered single-fragment message and clears the
///  whole send window.
async fn on_ack(shared: &Arc<Shared>, ack_seq: Seq24) {
    debug!(seq = %ack_seq, "received acknowledgment");

    shared.pcb.seq_cursor.store(ack_seq.value() + 1, Ordering::SeqCst);

    {
        let mut send_window = shared.pcb.send_window.lock().unwrap();
        if ack_seq == Seq24::ZERO {
            send_window.clear();
        } else {
            let unacknowledged = send_window.split_off(&(ack_seq.value() + 1));
            *send_window = unacknowledged;
        }
    }

    shared.pcb.signal_ack();
}

/// Retransmit request for one specific fragment. A non-terminal fragment of
///  a fragmented message is re-sent with FIN added so the receiver treats
///  the retransmission as a window boundary and immediately re-evaluates
///  ACK/NACK; terminal and single fragments go out unchanged.
async fn on_nack(shared: &Arc<Shared>, nack_seq: Seq24) {
    warn!(seq = %nack_seq, "received negative acknowledgment");

    let packet = {
        let mut send_window = shared.pcb.send_window.lock().unwrap();
        match send_window.get_mut(&nack_seq.value()) {
            None => None,
            Some(packet) => {
                if packet.flags.contains(TcuFlags::MF) && !packet.flags.contains(TcuFlags::FIN) {
                    packet.flags |= TcuFlags::FIN;
                    packet.calculate_crc();
                }
                Some(packet.clone())
            }
        }
    };

    match packet {
        None => {
            error!(seq = %nack_seq, "negative acknowledgment for a fragment not in the send window");
        }
        Some(packet) => {
            if let Err(e) = shared.transmit_data(&packet).await {
                error!(seq = %nack_seq, "failed to retransmit fragment: {}", e);
            }
        }
    }
}

fn connected(shared: &Shared) -> bool {
    matches!(shared.pcb.phase(), Phase::Connect | Phase::Network)
}

/// DF / DF|FL: a complete message in one frame
async fn on_single_fragment(shared: &Arc<Shared>, packet: TcuPacket, src: SocketAddr, is_file: bool) {
    if !connected(shared) {
        warn!("data frame in phase {:?} - dropping", shared.pcb.phase());
        return;
    }

    if !packet.validate_crc() {
        warn!(seq = %packet.seq, "checksum mismatch in single-fragment message");
        send_reply(shared, TcuPacket::nack(packet.seq)).await;
        return;
    }

    deliver(shared, &packet.payload, src, is_file).await;
    send_reply(shared, TcuPacket::ack(Seq24::ZERO)).await;
}

/// MF / MF|FL: buffer only, acknowledgments happen at window boundaries
async fn on_mid_fragment(shared: &Arc<Shared>, packet: TcuPacket) {
    if !connected(shared) {
        warn!("data frame in phase {:?} - dropping", shared.pcb.phase());
        return;
    }
    buffer_fragment(shared, packet);
}

/// MF|FIN / MF|FIN|FL: last fragment of the current window - acknowledge it
///  if everything so far checked out, otherwise ask for the first errored
///  fragment again
async fn on_window_boundary(shared: &Arc<Shared>, packet: TcuPacket) {
    if !connected(shared) {
        warn!("data frame in phase {:?} - dropping", shared.pcb.phase());
        return;
    }

    let seq = packet.seq;
    buffer_fragment(shared, packet);

    match lowest_errored(shared) {
        Some(errored) => send_reply(shared, TcuPacket::nack(Seq24::new(errored))).await,
        None => send_reply(shared, TcuPacket::ack(seq)).await,
    }
}

/// flags 0 / FL: terminal fragment of the logical message - on a clean
///  buffer the message is reassembled, delivered and acknowledged with the
///  terminal fragment's sequence number
async fn on_last_fragment(shared: &Arc<Shared>, packet: TcuPacket, src: SocketAddr, is_file: bool) {
    if !connected(shared) {
        warn!("data frame in phase {:?} - dropping", shared.pcb.phase());
        return;
    }

    buffer_fragment(shared, packet);

    if let Some(errored) = lowest_errored(shared) {
        send_reply(shared, TcuPacket::nack(Seq24::new(errored))).await;
        return;
    }

    let assembled = {
        let recv_buffer = shared.pcb.recv_buffer.lock().unwrap();

        let last = match recv_buffer.keys().next_back() {
            Some(&last) => last,
            None => return, // corrupt terminal fragment went to the error buffer
        };

        match (1..=last).find(|seq| !recv_buffer.contains_key(seq)) {
            Some(missing) => Err(missing),
            None => {
                let mut message = Vec::new();
                for packet in recv_buffer.values() {
                    message.extend_from_slice(&packet.payload);
                }
                Ok((last, message))
            }
        }
    };

    match assembled {
        Err(missing) => {
            warn!(seq = missing, "fragment missing at reassembly - requesting retransmission");
            send_reply(shared, TcuPacket::nack(Seq24::new(missing))).await;
        }
        Ok((last, message)) => {
            send_reply(shared, TcuPacket::ack(Seq24::new(last))).await;

            if let Some(started) = shared.pcb.transfer_started.lock().unwrap().take() {
                info!(
                    fragments = last,
                    bytes = message.len(),
                    elapsed = ?started.elapsed(),
                    "transfer complete"
                );
            }

            deliver(shared, &message, src, is_file).await;
            shared.pcb.clear_receive_buffers();
        }
    }
}

/// Sorts a fragment into the receive buffer (valid CRC) or the error buffer
///  (checksum mismatch). A valid copy replaces any errored one; a corrupt
///  duplicate of an already-valid fragment is discarded.
fn buffer_fragment(shared: &Shared, packet: TcuPacket) {
    let seq = packet.seq.value();

    let mut recv_buffer = shared.pcb.recv_buffer.lock().unwrap();
    let mut error_buffer = shared.pcb.error_buffer.lock().unwrap();

    if recv_buffer.is_empty() && error_buffer.is_empty() {
        *shared.pcb.transfer_started.lock().unwrap() = Some(Instant::now());
        debug!("transfer started");
    }

    if packet.validate_crc() {
        error_buffer.remove(&seq);
        recv_buffer.insert(seq, packet);
    } else if recv_buffer.contains_key(&seq) {
        debug!(seq, "corrupt duplicate of an intact fragment - dropping");
    } else {
        warn!(seq, "checksum mismatch - fragment moved to error buffer");
        error_buffer.insert(seq, packet);
    }
}

fn lowest_errored(shared: &Shared) -> Option<u32> {
    shared.pcb.error_buffer.lock().unwrap().keys().next().copied()
}

async fn send_reply(shared: &Arc<Shared>, reply: TcuPacket) {
    if let Err(e) = shared.transmit(&reply).await {
        error!(packet = ?reply, "failed to send reply: {}", e);
    }
}

async fn deliver(shared: &Arc<Shared>, payload: &[u8], src: SocketAddr, is_file: bool) {
    if is_file {
        let mut buf = payload;
        match FileRecord::try_deser(&mut buf) {
            Ok(record) => shared.sink.on_file(record, src).await,
            Err(e) => error!("dropping undecodable file record: {}", e),
        }
    } else {
        let text = String::from_utf8_lossy(payload).into_owned();
        shared.sink.on_text(text, src).await;
    }
}
