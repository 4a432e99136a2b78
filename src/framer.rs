//! Pure byte-stream-to-packet parser. Keyed on a one-byte type indicator
//! supplied by the caller (the reader loop reads the type byte itself, so
//! that EOF on the type byte and a malformed packet are distinguishable).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, ProtocolError, Result};

/// The sentinel subsystem-restart marker. Uplink-only, zero-length,
/// silently dropped by the mux rather than forwarded.
pub const SSR_MARK: u8 = 0xee;

pub const BT_CMD: u8 = 0x01;
pub const BT_ACL: u8 = 0x02;
pub const BT_SCO: u8 = 0x03;
pub const BT_EVT: u8 = 0x04;
pub const ANT_CTL: u8 = 0x0c;
pub const ANT_DATA: u8 = 0x0e;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LenWidth {
    One,
    Two,
}

#[derive(Debug, Clone, Copy)]
struct FamilyDescriptor {
    header_size: usize,
    len_offset: usize,
    len_width: LenWidth,
}

fn descriptor_for(type_byte: u8) -> Option<FamilyDescriptor> {
    let d = match type_byte {
        BT_CMD => FamilyDescriptor { header_size: 3, len_offset: 2, len_width: LenWidth::One },
        BT_ACL => FamilyDescriptor { header_size: 4, len_offset: 2, len_width: LenWidth::Two },
        BT_SCO => FamilyDescriptor { header_size: 3, len_offset: 2, len_width: LenWidth::One },
        BT_EVT => FamilyDescriptor { header_size: 2, len_offset: 1, len_width: LenWidth::One },
        ANT_CTL => FamilyDescriptor { header_size: 1, len_offset: 0, len_width: LenWidth::One },
        ANT_DATA => FamilyDescriptor { header_size: 1, len_offset: 0, len_width: LenWidth::One },
        SSR_MARK => FamilyDescriptor { header_size: 0, len_offset: 0, len_width: LenWidth::One },
        _ => return None,
    };
    Some(d)
}

/// A fully reassembled packet: type byte + header + payload, ready to be
/// re-serialized byte-for-byte onto the opposite side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub type_byte: u8,
    pub header: Bytes,
    pub payload: Bytes,
}

impl Frame {
    /// Concatenates type byte, header and payload into the exact bytes
    /// that should be written to the peer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.header.len() + self.payload.len());
        buf.put_u8(self.type_byte);
        buf.put_slice(&self.header);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Anything the framer can pull fixed-size chunks out of. Implemented for
/// the transport and for each endpoint's peer stream.
pub trait ByteSource {
    /// Reads exactly `n` bytes, or returns `Error::ShortRead` with however
    /// many were actually consumed before EOF.
    fn read_exact(&mut self, n: usize) -> Result<Bytes>;
}

/// Reads the remainder of the packet identified by `type_byte`.
///
/// `type_byte` is read by the caller, outside this function, so that a
/// clean EOF (zero bytes for the type byte) and `ProtocolError::UnknownType`
/// (a type byte with no family descriptor) remain distinguishable to the
/// reader loop driving this call.
pub fn parse_next(type_byte: u8, src: &mut impl ByteSource) -> Result<Frame> {
    let descriptor = descriptor_for(type_byte)
        .ok_or(ProtocolError::UnknownType(type_byte))?;

    let header = read_or_truncated(src, descriptor.header_size)?;

    let length = if descriptor.header_size == 0 {
        0usize
    } else {
        match descriptor.len_width {
            LenWidth::One => header[descriptor.len_offset] as usize,
            LenWidth::Two => {
                let lo = header[descriptor.len_offset] as usize;
                let hi = header[descriptor.len_offset + 1] as usize;
                lo | (hi << 8)
            }
        }
    };

    let payload = if length == 0 {
        Bytes::new()
    } else {
        read_or_truncated(src, length)?
    };

    Ok(Frame { type_byte, header, payload })
}

/// `ByteSource::read_exact` reports a primitive `ShortRead` (how many bytes
/// it actually got); at the framer level that's a truncated frame, not a
/// byte-counting detail the caller needs, so it's folded into
/// `ProtocolError::Truncated` here. Any other error (`Io`,
/// `ResourceExhausted`) passes through unchanged.
fn read_or_truncated(src: &mut impl ByteSource, n: usize) -> Result<Bytes> {
    match src.read_exact(n) {
        Err(Error::ShortRead { .. }) => Err(Error::Protocol(ProtocolError::Truncated)),
        other => other,
    }
}

/// Reads exactly `n` bytes from a `std::io::Read`, looping over short
/// reads the way every reader loop in this crate needs to (serial ports,
/// regular files and Unix sockets can all return short reads well before
/// EOF). A zero-byte read before any bytes have been consumed is treated
/// as a clean EOF by the caller; once at least one byte has been read, a
/// subsequent zero-byte read is `ShortRead`, never silently accepted.
///
/// The backing buffer is grown with a fallible reservation rather than an
/// infallible `Vec`/`BytesMut` allocation: a length-prefixed frame's `n`
/// comes straight off the wire, so an attacker or a corrupted length field
/// can ask for an unreasonable allocation. `ResourceExhausted` is how that
/// surfaces instead of aborting the process.
pub fn read_exact_from<R: std::io::Read>(reader: &mut R, n: usize) -> Result<Bytes> {
    if n == 0 {
        return Ok(Bytes::new());
    }
    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(n).map_err(|_| Error::ResourceExhausted(n))?;
    buf.resize(n, 0);
    let mut filled = 0usize;
    while filled < n {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::ShortRead { expected: n, got: filled });
            }
            Ok(read) => filled += read,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct CursorSource(Cursor<Vec<u8>>);
    impl ByteSource for CursorSource {
        fn read_exact(&mut self, n: usize) -> Result<Bytes> {
            read_exact_from(&mut self.0, n)
        }
    }

    fn src(bytes: &[u8]) -> CursorSource {
        CursorSource(Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn bt_cmd_zero_payload_is_header_only() {
        // S1: 01 03 0c 00 -- header = [03, 0c, 00], length byte is 0.
        let mut s = src(&[0x03, 0x0c, 0x00]);
        let frame = parse_next(BT_CMD, &mut s).unwrap();
        assert_eq!(frame.header.as_ref(), &[0x03, 0x0c, 0x00]);
        assert!(frame.payload.is_empty());
        assert_eq!(frame.to_bytes().as_ref(), &[0x01, 0x03, 0x0c, 0x00]);
    }

    #[test]
    fn bt_acl_length_is_little_endian_u16() {
        // S2: 02 40 00 05 00 AA BB CC DD EE
        let mut s = src(&[0x40, 0x00, 0x05, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        let frame = parse_next(BT_ACL, &mut s).unwrap();
        assert_eq!(frame.payload.as_ref(), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        assert_eq!(
            frame.to_bytes().as_ref(),
            &[0x02, 0x40, 0x00, 0x05, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]
        );
    }

    #[test]
    fn bt_evt_roundtrip() {
        // S3: 04 0e 04 01 03 0c 00
        let mut s = src(&[0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]);
        let frame = parse_next(BT_EVT, &mut s).unwrap();
        assert_eq!(
            frame.to_bytes().as_ref(),
            &[0x04, 0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]
        );
    }

    #[test]
    fn ant_data_header_is_the_length_byte_itself() {
        // S4: 0e 03 11 22 33
        let mut s = src(&[0x03, 0x11, 0x22, 0x33]);
        let frame = parse_next(ANT_DATA, &mut s).unwrap();
        assert_eq!(frame.header.as_ref(), &[0x03]);
        assert_eq!(frame.payload.as_ref(), &[0x11, 0x22, 0x33]);
        assert_eq!(frame.to_bytes().as_ref(), &[0x0e, 0x03, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn ssr_mark_is_zero_length() {
        let mut s = src(&[]);
        let frame = parse_next(SSR_MARK, &mut s).unwrap();
        assert!(frame.header.is_empty());
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn unknown_type_byte_is_protocol_error() {
        let mut s = src(&[0xAA, 0xBB]);
        let err = parse_next(0x77, &mut s).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::UnknownType(0x77))));
    }

    #[test]
    fn truncated_header_is_protocol_truncated() {
        let mut s = src(&[0x03]); // BT_CMD wants 3 header bytes, only 1 present
        let err = parse_next(BT_CMD, &mut s).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::Truncated)));
    }

    #[test]
    fn truncated_payload_is_protocol_truncated() {
        // header says len=2 but only 1 payload byte follows
        let mut s = src(&[0x02, 0xAA]);
        let err = parse_next(ANT_CTL, &mut s).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::Truncated)));
    }

    #[test]
    fn read_exact_from_reports_short_read_at_the_primitive_level() {
        // parse_next folds this into ProtocolError::Truncated, but the
        // primitive `read_exact_from` itself still reports the byte count.
        let mut cursor = Cursor::new(vec![0xAAu8]);
        let err = read_exact_from(&mut cursor, 3).unwrap_err();
        assert!(matches!(err, Error::ShortRead { expected: 3, got: 1 }));
    }
}
