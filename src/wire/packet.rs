//! The TCU frame and its codec.
//!
//! Each UDP datagram carries exactly one TCU packet. All multi-byte integers
//!  are in network byte order (BE):
//!
//! ```ascii
//!     0                   1                   2                   3
//!     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//!    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  0 |                 sequence number               |     flags     |
//!    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  4 |            length             |           checksum            |
//!    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  8 | payload (`length` bytes) ...
//! ```
//!
//! * `sequence number`: 24-bit wrap-around counter identifying a fragment
//!   within a logical message; `0` is reserved for single-fragment and
//!   control frames
//! * `flags`: independent bits, see [TcuFlags]; the semantic combinations
//!   are enumerated on the constructors below
//! * `length`: payload length in bytes, header excluded
//! * `checksum`: CRC-16/CCITT over the header (checksum field excluded) and
//!   the payload

use std::fmt::{Debug, Formatter};

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::Crc;

use crate::error::TcuError;
use crate::wire::seq::Seq24;

/// fixed header size on the wire
pub const TCU_HDR_LEN: usize = 8;

const ETH2_MAX_PAYLOAD_LEN: usize = 1500;
const IPV4_HDR_LEN: usize = 20;
const UDP_HDR_LEN: usize = 8;

/// biggest payload that keeps a full frame inside a single Ethernet-safe
///  UDP datagram
pub const MAX_PAYLOAD: usize = ETH2_MAX_PAYLOAD_LEN - IPV4_HDR_LEN - UDP_HDR_LEN - TCU_HDR_LEN;

const CRC16: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_3740);

bitflags! {
    /// The 8-bit flag set of the TCU header.
    ///
    /// Bits are independent on the wire; only the combinations listed on the
    ///  [TcuPacket] constructors are meaningful. Anything else is treated as
    ///  a malformed frame by the receive pipeline (logged and dropped, the
    ///  peer must not be able to take the engine down with a stray byte).
    #[derive(Clone, Copy, Eq, PartialEq, Default)]
    pub struct TcuFlags: u8 {
        const SYN  = 0x01;
        const ACK  = 0x02;
        const FIN  = 0x04;
        const NACK = 0x08;
        const DF   = 0x10;
        const MF   = 0x20;
        const FL   = 0x40;
        const KA   = 0x80;
    }
}

impl Debug for TcuFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        bitflags::parser::to_writer(self, f)
    }
}

/// One TCU frame: header fields plus opaque payload.
///
/// `length` exists only on the wire (it is the payload length); `checksum`
///  is materialized by [calculate_crc](TcuPacket::calculate_crc) before
///  transmission.
#[derive(Clone, Eq, PartialEq)]
pub struct TcuPacket {
    pub seq: Seq24,
    pub flags: TcuFlags,
    pub checksum: u16,
    pub payload: Bytes,
}

impl Debug for TcuPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TCU{{{:?} seq={} len={}}}", self.flags, self.seq, self.payload.len())
    }
}

impl TcuPacket {
    pub fn new(seq: Seq24, flags: TcuFlags, payload: Bytes) -> TcuPacket {
        debug_assert!(payload.len() <= u16::MAX as usize);
        TcuPacket {
            seq,
            flags,
            checksum: 0,
            payload,
        }
    }

    /// a data-bearing frame with the checksum already calculated
    pub fn data(seq: Seq24, flags: TcuFlags, payload: Bytes) -> TcuPacket {
        let mut packet = TcuPacket::new(seq, flags, payload);
        packet.calculate_crc();
        packet
    }

    fn control(flags: TcuFlags, seq: Seq24) -> TcuPacket {
        let mut packet = TcuPacket::new(seq, flags, Bytes::new());
        packet.calculate_crc();
        packet
    }

    /// connection request - SYN, LEN 0
    pub fn conn_req() -> TcuPacket {
        Self::control(TcuFlags::SYN, Seq24::ZERO)
    }
    /// connection acknowledgment - SYN + ACK, LEN 0
    pub fn conn_ack() -> TcuPacket {
        Self::control(TcuFlags::SYN | TcuFlags::ACK, Seq24::ZERO)
    }
    /// disconnection request - FIN, LEN 0
    pub fn disc_req() -> TcuPacket {
        Self::control(TcuFlags::FIN, Seq24::ZERO)
    }
    /// disconnection acknowledgment - FIN + ACK, LEN 0
    pub fn disc_ack() -> TcuPacket {
        Self::control(TcuFlags::FIN | TcuFlags::ACK, Seq24::ZERO)
    }
    /// keep-alive request - KA, LEN 0
    pub fn ka_req() -> TcuPacket {
        Self::control(TcuFlags::KA, Seq24::ZERO)
    }
    /// keep-alive acknowledgment - KA + ACK, LEN 0
    pub fn ka_ack() -> TcuPacket {
        Self::control(TcuFlags::KA | TcuFlags::ACK, Seq24::ZERO)
    }
    /// positive acknowledgment - ACK, LEN 0, SEQ NUM of the acknowledged
    ///  fragment (0 for a delivered single-fragment message)
    pub fn ack(seq: Seq24) -> TcuPacket {
        Self::control(TcuFlags::ACK, seq)
    }
    /// negative acknowledgment - NACK, LEN 0, SEQ NUM of the errored fragment
    pub fn nack(seq: Seq24) -> TcuPacket {
        Self::control(TcuFlags::NACK, seq)
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        self.seq.ser(buf);
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.payload.len() as u16);
        buf.put_u16(self.checksum);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TCU_HDR_LEN + self.payload.len());
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn try_deser(buf: &mut impl Buf) -> Result<TcuPacket, TcuError> {
        if buf.remaining() < TCU_HDR_LEN {
            return Err(TcuError::MalformedFrame(format!(
                "datagram of {} bytes is shorter than the TCU header",
                buf.remaining()
            )));
        }

        let seq = Seq24::try_deser(buf)?;
        let flags = TcuFlags::from_bits_retain(buf.get_u8());
        let length = buf.get_u16() as usize;
        let checksum = buf.get_u16();

        if buf.remaining() < length {
            return Err(TcuError::MalformedFrame(format!(
                "payload truncated: header announces {} bytes, {} available",
                length,
                buf.remaining()
            )));
        }
        let payload = buf.copy_to_bytes(length);

        Ok(TcuPacket {
            seq,
            flags,
            checksum,
            payload,
        })
    }

    pub fn from_datagram(datagram: &[u8]) -> Result<TcuPacket, TcuError> {
        let mut buf = datagram;
        TcuPacket::try_deser(&mut buf)
    }

    fn compute_crc(&self) -> u16 {
        let mut header = BytesMut::with_capacity(TCU_HDR_LEN - 2);
        self.seq.ser(&mut header);
        header.put_u8(self.flags.bits());
        header.put_u16(self.payload.len() as u16);

        let mut digest = CRC16.digest();
        digest.update(&header);
        digest.update(&self.payload);
        digest.finalize()
    }

    /// calculates the CRC-16/CCITT over the header (checksum field excluded)
    ///  and payload, and patches it into the header
    pub fn calculate_crc(&mut self) {
        self.checksum = self.compute_crc();
    }

    pub fn validate_crc(&self) -> bool {
        self.compute_crc() == self.checksum
    }
}
