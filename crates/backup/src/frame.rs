//! Length-delimited record frames.
//!
//! Each frame is an unsigned LEB128 varint length followed by that many
//! payload bytes. Payloads are never decoded here: frames are copied from a
//! source into an archive verbatim, with boundaries checked so a torn write at
//! the end of a source doesn't leak half a record into the archive.

use derive_more::{Display, Error};
use std::io::{self, BufReader, Read, Write};

/// A `u64` needs at most ten 7-bit groups.
const MAX_VARINT_LEN: usize = 10;

/// How a source stream ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// The stream ended exactly on a frame boundary.
    Clean { frames: u64 },
    /// The stream ended badly after `frames` complete frames. Everything
    /// before that point was copied.
    Corrupt { frames: u64, reason: Corruption },
    /// Copying had to stop for a reason unrelated to the content.
    Fatal(FrameError),
}

/// Why a stream was cut short.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum Corruption {
    #[display("stream ends inside a length prefix")]
    TruncatedLength,
    #[display("stream ends inside a payload ({got} of {expected} bytes)")]
    TruncatedPayload { expected: u64, got: u64 },
    #[display("length prefix longer than 10 bytes")]
    MalformedLength,
    #[display("frame of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: u64, max: u64 },
    #[display("undecodable source: {_0}")]
    Undecodable(String),
}

#[derive(Debug, Display, Error)]
pub enum FrameError {
    #[display("reading source: {_0}")]
    Source(io::Error),
    #[display("writing destination: {_0}")]
    Destination(io::Error),
}

enum LengthError {
    Truncated,
    Malformed,
    Io(io::Error),
}

/// Append the varint encoding of `len` to `buf`.
pub fn encode_length(mut len: u64, buf: &mut Vec<u8>) {
    while len >= 0x80 {
        buf.push((len as u8 & 0x7f) | 0x80);
        len >>= 7;
    }
    buf.push(len as u8);
}

/// Write one frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let mut prefix = Vec::with_capacity(MAX_VARINT_LEN);
    encode_length(payload.len() as u64, &mut prefix);
    writer.write_all(&prefix)?;
    writer.write_all(payload)
}

/// Read one frame, `None` at a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R, max: u64) -> io::Result<Option<Vec<u8>>> {
    let len = match read_length(reader) {
        Ok(Some(len)) => len,
        Ok(None) => return Ok(None),
        Err(LengthError::Io(e)) => return Err(e),
        Err(LengthError::Truncated) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated length")),
        Err(LengthError::Malformed) => return Err(io::Error::new(io::ErrorKind::InvalidData, "malformed length")),
    };
    if len > max {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("frame of {len} bytes")));
    }
    let mut payload = Vec::new();
    reader.take(len).read_to_end(&mut payload)?;
    if (payload.len() as u64) < len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated payload"));
    }
    Ok(Some(payload))
}

fn read_length<R: Read>(reader: &mut R) -> Result<Option<u64>, LengthError> {
    let mut value = 0u64;
    let mut consumed = 0;
    for byte in reader.bytes().take(MAX_VARINT_LEN) {
        let byte = byte.map_err(LengthError::Io)?;
        // The tenth group only has room for one more bit.
        if consumed == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(LengthError::Malformed);
        }
        value |= u64::from(byte & 0x7f) << (7 * consumed);
        consumed += 1;
        if byte & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    match consumed {
        0 => Ok(None),
        MAX_VARINT_LEN => Err(LengthError::Malformed),
        _ => Err(LengthError::Truncated),
    }
}

/// Decoders report damaged or cut-off compressed input as these kinds; the
/// bytes decoded before that point are still good frames.
fn is_content_error(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData)
}

/// Copy every complete frame from `reader` to `writer`.
///
/// Frames are written back byte-for-byte, so the destination holds exactly
/// the concatenation of the complete source frames.
pub fn copy_frames<R: Read, W: Write>(reader: R, writer: &mut W, max: u64) -> StreamEnd {
    let mut reader = BufReader::new(reader);
    let mut frames = 0;
    let mut prefix = Vec::with_capacity(MAX_VARINT_LEN);
    let mut payload = Vec::new();
    loop {
        let len = match read_length(&mut reader) {
            Ok(Some(len)) => len,
            Ok(None) => return StreamEnd::Clean { frames },
            Err(LengthError::Truncated) => {
                let reason = Corruption::TruncatedLength;
                return StreamEnd::Corrupt { frames, reason };
            },
            Err(LengthError::Malformed) => {
                let reason = Corruption::MalformedLength;
                return StreamEnd::Corrupt { frames, reason };
            },
            Err(LengthError::Io(e)) if is_content_error(&e) => {
                let reason = Corruption::Undecodable(e.to_string());
                return StreamEnd::Corrupt { frames, reason };
            },
            Err(LengthError::Io(e)) => return StreamEnd::Fatal(FrameError::Source(e)),
        };
        if len > max {
            let reason = Corruption::Oversized { len, max };
            return StreamEnd::Corrupt { frames, reason };
        }

        payload.clear();
        match (&mut reader).take(len).read_to_end(&mut payload) {
            Ok(got) if (got as u64) < len => {
                let reason = Corruption::TruncatedPayload { expected: len, got: got as u64 };
                return StreamEnd::Corrupt { frames, reason };
            },
            Ok(_) => {},
            Err(e) if is_content_error(&e) => {
                let reason = Corruption::Undecodable(e.to_string());
                return StreamEnd::Corrupt { frames, reason };
            },
            Err(e) => return StreamEnd::Fatal(FrameError::Source(e)),
        }

        prefix.clear();
        encode_length(len, &mut prefix);
        if let Err(e) = writer.write_all(&prefix).and_then(|()| writer.write_all(&payload)) {
            return StreamEnd::Fatal(FrameError::Destination(e));
        }
        frames += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    fn frames(payloads: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        for payload in payloads {
            write_frame(&mut buf, payload).unwrap();
        }
        buf
    }

    #[rstest]
    #[case(0, &[0x00])]
    #[case(1, &[0x01])]
    #[case(127, &[0x7f])]
    #[case(128, &[0x80, 0x01])]
    #[case(300, &[0xac, 0x02])]
    #[case(10_000_000, &[0x80, 0xad, 0xe2, 0x04])]
    fn varint_encoding(#[case] len: u64, #[case] expected: &[u8]) {
        let mut buf = Vec::new();
        encode_length(len, &mut buf);
        assert_eq!(buf, expected);
        assert_eq!(read_length(&mut Cursor::new(buf)).ok().flatten(), Some(len));
    }

    #[test]
    fn max_varint_is_accepted() {
        let mut buf = Vec::new();
        encode_length(u64::MAX, &mut buf);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
        assert_eq!(read_length(&mut Cursor::new(buf)).ok().flatten(), Some(u64::MAX));
    }

    #[test]
    fn clean_copy_is_byte_identical() {
        let source = frames(&[b"alpha", b"", b"gamma"]);
        let mut out = Vec::new();
        let end = copy_frames(Cursor::new(source.clone()), &mut out, 1024);
        assert!(matches!(end, StreamEnd::Clean { frames: 3 }));
        assert_eq!(out, source);
    }

    #[test]
    fn empty_source_is_clean() {
        let mut out = Vec::new();
        assert!(matches!(copy_frames(Cursor::new(Vec::new()), &mut out, 1024), StreamEnd::Clean { frames: 0 }));
        assert!(out.is_empty());
    }

    #[test]
    fn truncated_payload_keeps_leading_frames() {
        let mut source = frames(&[b"one", b"two", b"three"]);
        source.truncate(source.len() - 2);
        let mut out = Vec::new();
        let end = copy_frames(Cursor::new(source), &mut out, 1024);
        match end {
            StreamEnd::Corrupt { frames, reason } => {
                assert_eq!(frames, 2);
                assert_eq!(reason, Corruption::TruncatedPayload { expected: 5, got: 3 });
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(out, frames(&[b"one", b"two"]));
    }

    #[test]
    fn truncated_length_keeps_leading_frames() {
        let mut source = frames(&[b"one"]);
        // First byte of a two-byte length prefix, then nothing.
        source.push(0x80);
        let mut out = Vec::new();
        let end = copy_frames(Cursor::new(source), &mut out, 1024);
        assert!(matches!(end, StreamEnd::Corrupt { frames: 1, reason: Corruption::TruncatedLength }));
        assert_eq!(out, frames(&[b"one"]));
    }

    #[test]
    fn oversized_frame_is_corrupt() {
        let source = frames(&[b"ok", &[0u8; 64]]);
        let mut out = Vec::new();
        let end = copy_frames(Cursor::new(source), &mut out, 16);
        assert!(matches!(end, StreamEnd::Corrupt { frames: 1, reason: Corruption::Oversized { len: 64, max: 16 } }));
    }

    #[test]
    fn malformed_length_is_corrupt() {
        let source = vec![0xff; 11];
        let mut out = Vec::new();
        let end = copy_frames(Cursor::new(source), &mut out, u64::MAX);
        assert!(matches!(end, StreamEnd::Corrupt { frames: 0, reason: Corruption::MalformedLength }));
    }

    struct FailingWriter;
    impl Write for FailingWriter {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingReader;
    impl Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    #[test]
    fn write_failure_is_fatal() {
        let end = copy_frames(Cursor::new(frames(&[b"x"])), &mut FailingWriter, 1024);
        assert!(matches!(end, StreamEnd::Fatal(FrameError::Destination(_))));
    }

    #[test]
    fn read_failure_is_fatal() {
        let end = copy_frames(FailingReader, &mut Vec::new(), 1024);
        assert!(matches!(end, StreamEnd::Fatal(FrameError::Source(_))));
    }

    #[test]
    fn read_frame_round_trip() {
        let mut cursor = Cursor::new(frames(&[b"a", b"bc"]));
        assert_eq!(read_frame(&mut cursor, 16).unwrap().unwrap(), b"a");
        assert_eq!(read_frame(&mut cursor, 16).unwrap().unwrap(), b"bc");
        assert!(read_frame(&mut cursor, 16).unwrap().is_none());
    }
}
