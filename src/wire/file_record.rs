//! Payload record of file-bearing frames.
//!
//! ```ascii
//!  offset 0:             name_length (1 byte)
//!  offset 1:             name (name_length bytes, not NUL-terminated)
//!  offset 1+name_length: file_size (4 bytes, BE)
//!  next:                 file_size bytes of content
//! ```
//!
//! The record travels inside the (possibly fragmented) payload of `FL`
//!  frames; its total size is `1 + name_length + 4 + file_size`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::TcuError;

pub const FILE_NAME_MAX_LEN: usize = 255;

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FileRecord {
    pub name: String,
    pub content: Bytes,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, content: Bytes) -> Result<FileRecord, TcuError> {
        let name = name.into();
        if name.is_empty() || name.len() > FILE_NAME_MAX_LEN {
            return Err(TcuError::InvalidPath);
        }
        if content.len() > u32::MAX as usize {
            return Err(TcuError::InvalidPath);
        }
        Ok(FileRecord { name, content })
    }

    /// `1 + name_length + 4 + file_size` - the sum of the field widths as
    ///  they appear on the wire
    pub fn encoded_len(&self) -> usize {
        1 + self.name.len() + 4 + self.content.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.name.len() as u8);
        buf.put_slice(self.name.as_bytes());
        buf.put_u32(self.content.len() as u32);
        buf.put_slice(&self.content);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn try_deser(buf: &mut impl Buf) -> Result<FileRecord, TcuError> {
        if buf.remaining() < 1 {
            return Err(TcuError::MalformedFrame("empty file record".into()));
        }
        let name_length = buf.get_u8() as usize;
        if buf.remaining() < name_length + 4 {
            return Err(TcuError::MalformedFrame("file record header truncated".into()));
        }
        let name_bytes = buf.copy_to_bytes(name_length);
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|_| TcuError::MalformedFrame("file name is not valid UTF-8".into()))?;

        let file_size = buf.get_u32() as usize;
        if buf.remaining() < file_size {
            return Err(TcuError::MalformedFrame(format!(
                "file record announces {} content bytes, {} available",
                file_size,
                buf.remaining()
            )));
        }
        let content = buf.copy_to_bytes(file_size);

        FileRecord::new(name, content)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::small("a.txt", &b"hello"[..])]
    #[case::empty_content("empty.bin", &b""[..])]
    #[case::binary("payload.bin", &[0u8, 1, 2, 255, 254][..])]
    fn test_round_trip(#[case] name: &str, #[case] content: &[u8]) {
        let record = FileRecord::new(name, Bytes::copy_from_slice(content)).unwrap();
        let wire = record.to_bytes();
        assert_eq!(wire.len(), record.encoded_len());
        assert_eq!(wire.len(), 1 + name.len() + 4 + content.len());

        let mut buf: &[u8] = &wire;
        let decoded = FileRecord::try_deser(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_wire_layout() {
        let record = FileRecord::new("ab", Bytes::from_static(b"xyz")).unwrap();
        let wire = record.to_bytes();
        assert_eq!(&wire[..], &[2, b'a', b'b', 0, 0, 0, 3, b'x', b'y', b'z']);
    }

    #[rstest]
    #[case::empty(&[][..])]
    #[case::name_truncated(&[5, b'a', b'b'][..])]
    #[case::size_truncated(&[1, b'a', 0, 0][..])]
    #[case::content_truncated(&[1, b'a', 0, 0, 0, 9, b'x'][..])]
    fn test_deser_truncated(#[case] mut buf: &[u8]) {
        assert!(matches!(
            FileRecord::try_deser(&mut buf),
            Err(TcuError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_deser_non_utf8_name() {
        let mut buf: &[u8] = &[2, 0xff, 0xfe, 0, 0, 0, 0];
        assert!(matches!(
            FileRecord::try_deser(&mut buf),
            Err(TcuError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_new_rejects_oversized_name() {
        let name = "x".repeat(FILE_NAME_MAX_LEN + 1);
        assert!(matches!(
            FileRecord::new(name, Bytes::new()),
            Err(TcuError::InvalidPath)
        ));
        assert!(matches!(
            FileRecord::new("", Bytes::new()),
            Err(TcuError::InvalidPath)
        ));
    }
}
