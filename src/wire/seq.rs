use std::fmt::{Debug, Display, Formatter};

use bytes::{Buf, BufMut};

use crate::error::TcuError;

/// A 24-bit unsigned sequence number with wrap-around arithmetic.
///
/// The TCU header stores sequence numbers in exactly three bytes (big-endian,
///  no padding), so the value space is `0..2^24` and all arithmetic is
///  modulo `2^24`. Sequence number `0` is reserved for single-fragment and
///  control frames; fragments of a logical message count from `1`.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Seq24(u32);

impl Seq24 {
    pub const MASK: u32 = 0x00ff_ffff;

    pub const ZERO: Seq24 = Seq24(0);

    pub fn new(value: u32) -> Seq24 {
        Seq24(value & Self::MASK)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn wrapping_add(self, rhs: u32) -> Seq24 {
        Seq24(self.0.wrapping_add(rhs) & Self::MASK)
    }

    pub fn next(self) -> Seq24 {
        self.wrapping_add(1)
    }

    /// three bytes, big-endian - this is the wire representation, there is no
    ///  padding byte
    pub fn ser(self, buf: &mut impl BufMut) {
        buf.put_u8((self.0 >> 16) as u8);
        buf.put_u8((self.0 >> 8) as u8);
        buf.put_u8(self.0 as u8);
    }

    pub fn try_deser(buf: &mut impl Buf) -> Result<Seq24, TcuError> {
        if buf.remaining() < 3 {
            return Err(TcuError::MalformedFrame("sequence number truncated".into()));
        }
        let hi = buf.get_u8() as u32;
        let mid = buf.get_u8() as u32;
        let lo = buf.get_u8() as u32;
        Ok(Seq24((hi << 16) | (mid << 8) | lo))
    }
}

impl From<u32> for Seq24 {
    fn from(value: u32) -> Self {
        Seq24::new(value)
    }
}

impl Debug for Seq24 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
impl Display for Seq24 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
