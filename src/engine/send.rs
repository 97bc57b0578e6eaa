//! The send pipeline: fragmentation, the sliding send window and the
//!  ACK-driven window loop.
//!
//! Sending is synchronous to the caller - one logical message is fully
//!  acknowledged before the next begins. The receive task cooperates by
//!  advancing the sequence cursor and waking the window loop when an ACK
//!  arrives, and by serving NACK retransmissions directly.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::engine::pcb::Phase;
use crate::engine::Shared;
use crate::error::TcuError;
use crate::wire::file_record::FileRecord;
use crate::wire::packet::{TcuFlags, TcuPacket};
use crate::wire::seq::Seq24;

pub(crate) async fn send_text(shared: &Arc<Shared>, text: &str) -> Result<(), TcuError> {
    send_payload(shared, Bytes::copy_from_slice(text.as_bytes()), false).await
}

pub(crate) async fn send_file(shared: &Arc<Shared>, record: &FileRecord) -> Result<(), TcuError> {
    send_payload(shared, record.to_bytes(), true).await
}

async fn send_payload(shared: &Arc<Shared>, payload: Bytes, is_file: bool) -> Result<(), TcuError> {
    if !matches!(shared.pcb.phase(), Phase::Connect | Phase::Network) {
        return Err(TcuError::WrongPhase("connection not established"));
    }

    let max_frag = shared.pcb.max_frag();
    if payload.len() <= max_frag {
        send_single_fragment(shared, payload, is_file).await
    } else {
        send_fragmented(shared, payload, max_frag, is_file).await
    }
}

/// A message that fits one frame: transmit and return. The receiver answers
///  with ACK(0), which clears the send window; until then the packet stays
///  around to serve a potential NACK.
async fn send_single_fragment(shared: &Arc<Shared>, payload: Bytes, is_file: bool) -> Result<(), TcuError> {
    let (flags, seq) = if is_file {
        (TcuFlags::DF | TcuFlags::FL, Seq24::ZERO)
    } else {
        (TcuFlags::DF, Seq24::new(1))
    };

    let packet = TcuPacket::data(seq, flags, payload);
    {
        let mut send_window = shared.pcb.send_window.lock().unwrap();
        send_window.clear();
        send_window.insert(seq.value(), packet.clone());
    }

    debug!(bytes = packet.payload.len(), is_file, "sending single-fragment message");
    shared.transmit_data(&packet).await
}

async fn send_fragmented(
    shared: &Arc<Shared>,
    payload: Bytes,
    max_frag: usize,
    is_file: bool,
) -> Result<(), TcuError> {
    let total = payload.len().div_ceil(max_frag) as u32;
    let window_size = shared.pcb.effective_window_size(total);

    shared.pcb.total_seq.store(total, Ordering::SeqCst);
    shared.pcb.seq_cursor.store(1, Ordering::SeqCst);
    *shared.pcb.send_window.lock().unwrap() = build_fragments(&payload, max_frag, total, window_size, is_file);

    info!(bytes = payload.len(), fragments = total, window_size, is_file, "sending fragmented message");

    let mut retries = 0;
    while shared.pcb.seq_cursor.load(Ordering::SeqCst) <= total {
        shared.pcb.clear_ack();
        transmit_window(shared, window_size, total).await?;

        match wait_for_recv_ack(shared).await {
            AckWait::Acked => {
                retries = 0;
            }
            AckWait::PhaseLost => {
                warn!("connection lost while awaiting window acknowledgment");
                return Err(TcuError::PeerSilent);
            }
            AckWait::TimedOut => {
                retries += 1;
                if retries > shared.config.activity_attempt_count {
                    warn!("no window acknowledgment after {} attempts", retries);
                    shared.pcb.new_phase(Phase::Holdoff);
                    shared.stop_keep_alive();
                    return Err(TcuError::AckTimeout);
                }
                warn!(attempt = retries, "window acknowledgment missing - retransmitting window");
            }
        }
    }

    info!(fragments = total, "message fully acknowledged");
    Ok(())
}

/// Cuts the payload into `total` fragments, keyed 1..=total.
///
/// Flag placement drives the receiver's acknowledgment points: the final
///  fragment carries the terminal flags (none for text, FL for a file),
///  every fragment closing a window (seq divisible by the window size)
///  carries MF|FIN, everything else plain MF.
fn build_fragments(
    payload: &Bytes,
    max_frag: usize,
    total: u32,
    window_size: u32,
    is_file: bool,
) -> BTreeMap<u32, TcuPacket> {
    let file_flag = if is_file { TcuFlags::FL } else { TcuFlags::empty() };

    let mut fragments = BTreeMap::new();
    for i in 0..total {
        let seq = i + 1;
        let start = i as usize * max_frag;
        let end = (start + max_frag).min(payload.len());
        let chunk = payload.slice(start..end);

        let flags = if seq == total {
            file_flag
        } else if seq % window_size == 0 {
            TcuFlags::MF | TcuFlags::FIN | file_flag
        } else {
            TcuFlags::MF | file_flag
        };

        fragments.insert(seq, TcuPacket::data(Seq24::new(seq), flags, chunk));
    }
    fragments
}

/// Transmits every fragment of the window starting at the current cursor,
///  pacing transmissions so loopback runs do not overrun the kernel's
///  socket buffer.
async fn transmit_window(shared: &Arc<Shared>, window_size: u32, total: u32) -> Result<(), TcuError> {
    let cursor = shared.pcb.seq_cursor.load(Ordering::SeqCst);
    let end = (cursor + window_size - 1).min(total);
    debug!(from = cursor, to = end, "transmitting window");

    for seq in cursor..=end {
        if shared.fault.drop_window_tail() {
            break;
        }

        let packet = shared.pcb.send_window.lock().unwrap().get(&seq).cloned();
        let packet = match packet {
            Some(packet) => packet,
            None => continue, // already acknowledged past this one
        };

        if !shared.fault.drop_packet() {
            shared.transmit_data(&packet).await?;
        }
        sleep(shared.config.inter_fragment_gap).await;
    }
    Ok(())
}

enum AckWait {
    Acked,
    TimedOut,
    PhaseLost,
}

/// Polls the one-shot acknowledgment signal in slices, up to the receive
///  timeout. Aborts early when the phase leaves CONNECT/NETWORK - the
///  keep-alive prober declaring the peer dead cancels the send.
async fn wait_for_recv_ack(shared: &Arc<Shared>) -> AckWait {
    let deadline = Instant::now() + shared.config.receive_timeout;
    loop {
        if shared.pcb.take_ack() {
            return AckWait::Acked;
        }
        if !matches!(shared.pcb.phase(), Phase::Connect | Phase::Network) {
            return AckWait::PhaseLost;
        }
        if Instant::now() >= deadline {
            return AckWait::TimedOut;
        }
        sleep(shared.config.poll_slice).await;
    }
}
