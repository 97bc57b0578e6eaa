use std::sync::atomic::{AtomicU8, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use tracing::{info, warn};

use crate::wire::packet::TCU_HDR_LEN;

/// Testing knobs that sabotage the transmit path on purpose: corrupt a
///  payload bit after the CRC was calculated, drop a fragment, or drop the
///  tail of a window. All rates are percentages; zero (the default) means
///  the path is untouched.
///
/// Only data fragments are sabotaged - control frames (SYN/FIN/KA/ACK/NACK)
///  always go out clean so the connection itself stays testable.
pub struct FaultInjector {
    error_rate: AtomicU8,
    packet_loss_rate: AtomicU8,
    window_loss_rate: AtomicU8,
}

impl Default for FaultInjector {
    fn default() -> FaultInjector {
        FaultInjector {
            error_rate: AtomicU8::new(0),
            packet_loss_rate: AtomicU8::new(0),
            window_loss_rate: AtomicU8::new(0),
        }
    }
}

fn draw(rate: &AtomicU8) -> bool {
    let rate = rate.load(Ordering::Relaxed);
    if rate == 0 {
        return false;
    }
    rand::thread_rng().gen_range(0..100) < rate
}

impl FaultInjector {
    pub fn set_error_rate(&self, percent: u8) {
        self.error_rate.store(percent.min(100), Ordering::Relaxed);
        info!(percent = percent.min(100), "error rate set");
    }

    pub fn set_packet_loss_rate(&self, percent: u8) {
        self.packet_loss_rate.store(percent.min(100), Ordering::Relaxed);
        info!(percent = percent.min(100), "packet loss rate set");
    }

    pub fn set_window_loss_rate(&self, percent: u8) {
        self.window_loss_rate.store(percent.min(100), Ordering::Relaxed);
        info!(percent = percent.min(100), "window loss rate set");
    }

    /// true if this outgoing fragment should silently disappear
    pub fn drop_packet(&self) -> bool {
        let dropped = draw(&self.packet_loss_rate);
        if dropped {
            warn!("fault injection: dropping outgoing fragment");
        }
        dropped
    }

    /// true if the rest of the current window should silently disappear
    pub fn drop_window_tail(&self) -> bool {
        let dropped = draw(&self.window_loss_rate);
        if dropped {
            warn!("fault injection: dropping window tail");
        }
        dropped
    }

    /// Flips the first payload byte of an already-encoded frame so the
    ///  receiver sees a checksum failure. The header stays intact - the
    ///  packet must still parse to exercise the NACK path.
    pub fn maybe_corrupt(&self, frame: Bytes) -> Bytes {
        if frame.len() <= TCU_HDR_LEN || !draw(&self.error_rate) {
            return frame;
        }
        warn!("fault injection: corrupting outgoing fragment");
        let mut mangled = BytesMut::with_capacity(frame.len());
        mangled.put_slice(&frame[..TCU_HDR_LEN]);
        mangled.put_u8(frame[TCU_HDR_LEN] ^ 0xff);
        mangled.put_slice(&frame[TCU_HDR_LEN + 1..]);
        mangled.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::packet::{TcuFlags, TcuPacket};
    use crate::wire::seq::Seq24;

    #[test]
    fn test_zero_rates_leave_path_untouched() {
        let fault = FaultInjector::default();
        assert!(!fault.drop_packet());
        assert!(!fault.drop_window_tail());

        let frame = TcuPacket::data(Seq24::new(1), TcuFlags::DF, Bytes::from_static(b"abc")).to_bytes();
        assert_eq!(fault.maybe_corrupt(frame.clone()), frame);
    }

    #[test]
    fn test_full_error_rate_breaks_crc_but_not_framing() {
        let fault = FaultInjector::default();
        fault.set_error_rate(100);

        let packet = TcuPacket::data(Seq24::new(2), TcuFlags::MF, Bytes::from_static(b"abcd"));
        let mangled = fault.maybe_corrupt(packet.to_bytes());

        let decoded = TcuPacket::from_datagram(&mangled).unwrap();
        assert_eq!(decoded.seq, packet.seq);
        assert_eq!(decoded.flags, packet.flags);
        assert!(!decoded.validate_crc());
        assert_eq!(decoded.payload[0], b'a' ^ 0xff);
    }

    #[test]
    fn test_control_frames_never_corrupted() {
        let fault = FaultInjector::default();
        fault.set_error_rate(100);

        // no payload, nothing to corrupt
        let frame = TcuPacket::ack(Seq24::ZERO).to_bytes();
        assert_eq!(fault.maybe_corrupt(frame.clone()), frame);
    }

    #[test]
    fn test_rates_clamped_to_100() {
        let fault = FaultInjector::default();
        fault.set_packet_loss_rate(250);
        assert!(fault.drop_packet());
    }
}
