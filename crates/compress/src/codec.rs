//! Streaming Codecs

use crate::Compression;
use crate::error::{ErrorKind, Result};
#[cfg(feature = "brotli")]
use brotli::{CompressorWriter as BrotliEncoder, Decompressor as BrotliDecoder};
use bzip2::{Compression as BzCompression, read::MultiBzDecoder, write::BzEncoder};
use exn::ResultExt;
use flate2::{Compression as GzCompression, read::MultiGzDecoder, write::GzEncoder};
use std::io::{self, Read, Write};
use tracing::instrument;
#[cfg(feature = "xz")]
use xz2::{read::XzDecoder, write::XzEncoder};
#[cfg(feature = "zstd")]
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

// Archives are written once and kept for a long time; favour size over speed.
const BZIP2_LEVEL: BzCompression = BzCompression::best();
const GZIP_LEVEL: GzCompression = GzCompression::best();
#[cfg(feature = "xz")]
const XZ_LEVEL: u32 = 9;
#[cfg(feature = "zstd")]
const ZSTD_LEVEL: i32 = 19;
#[cfg(feature = "brotli")]
const BROTLI_LEVEL: u32 = 11;
#[cfg(feature = "brotli")]
const BROTLI_BUFFER_SIZE: usize = 4096;
#[cfg(feature = "brotli")]
const BROTLI_LG_WINDOW_SIZE: u32 = 22;

impl Compression {
    /// Wrap a reader with the appropriate decompression layer.
    ///
    /// Gzip and Bzip2 use their multi-member decoders so that files produced
    /// by appending compressed segments decode in full.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::io::{Cursor, Read, Write};
    /// use spool_compress::Compression;
    ///
    /// let mut encoder = Compression::Gzip.encoder(Vec::new()).unwrap();
    /// encoder.write_all(b"Hello, world!").unwrap();
    /// let compressed = encoder.finish().unwrap();
    ///
    /// let mut reader = Compression::Gzip.wrap_reader(Cursor::new(compressed)).unwrap();
    /// let mut decompressed = Vec::new();
    /// reader.read_to_end(&mut decompressed).unwrap();
    /// assert_eq!(decompressed, b"Hello, world!");
    /// ```
    #[instrument(level = "trace", skip(reader))]
    pub fn wrap_reader<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            #[cfg(feature = "brotli")]
            Compression::Brotli => Box::new(BrotliDecoder::new(reader, BROTLI_BUFFER_SIZE)),
            Compression::Bzip2 => Box::new(MultiBzDecoder::new(reader)),
            Compression::Gzip => Box::new(MultiGzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => Box::new(ZstdDecoder::new(reader).or_raise(|| ErrorKind::Encoder)?),
        })
    }

    /// Wrap a writer with the appropriate compression layer.
    ///
    /// The returned [`Encoder`] must be [`finish`](Encoder::finish)ed; dropping
    /// it may leave a truncated stream behind.
    #[instrument(level = "trace", skip(writer))]
    pub fn encoder<W: Write>(&self, writer: W) -> Result<Encoder<W>> {
        Ok(match self {
            Compression::None => Encoder::None(writer),
            #[cfg(feature = "brotli")]
            Compression::Brotli => Encoder::Brotli(Box::new(BrotliEncoder::new(
                HoldFlush::new(writer),
                BROTLI_BUFFER_SIZE,
                BROTLI_LEVEL,
                BROTLI_LG_WINDOW_SIZE,
            ))),
            Compression::Bzip2 => Encoder::Bzip2(BzEncoder::new(writer, BZIP2_LEVEL)),
            Compression::Gzip => Encoder::Gzip(GzEncoder::new(writer, GZIP_LEVEL)),
            #[cfg(feature = "xz")]
            Compression::Xz => Encoder::Xz(XzEncoder::new(writer, XZ_LEVEL)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => Encoder::Zstd(ZstdEncoder::new(writer, ZSTD_LEVEL).or_raise(|| ErrorKind::Encoder)?),
        })
    }
}

/// A compressing writer that must be explicitly finished.
pub enum Encoder<W: Write> {
    None(W),
    #[cfg(feature = "brotli")]
    Brotli(Box<BrotliEncoder<HoldFlush<W>>>),
    Bzip2(BzEncoder<W>),
    Gzip(GzEncoder<W>),
    #[cfg(feature = "xz")]
    Xz(XzEncoder<W>),
    #[cfg(feature = "zstd")]
    Zstd(ZstdEncoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    /// Write any trailer, flush the inner writer and hand it back.
    ///
    /// The inner writer is flushed exactly once, at the very end, so writers
    /// that commit on `flush()` never publish a partial stream.
    pub fn finish(self) -> Result<W> {
        let mut inner = match self {
            Encoder::None(writer) => writer,
            #[cfg(feature = "brotli")]
            Encoder::Brotli(mut encoder) => {
                encoder.flush().or_raise(|| ErrorKind::Io)?;
                encoder.into_inner().into_inner().or_raise(|| ErrorKind::Io)?
            },
            Encoder::Bzip2(encoder) => encoder.finish().or_raise(|| ErrorKind::Io)?,
            Encoder::Gzip(encoder) => encoder.finish().or_raise(|| ErrorKind::Io)?,
            #[cfg(feature = "xz")]
            Encoder::Xz(encoder) => encoder.finish().or_raise(|| ErrorKind::Io)?,
            #[cfg(feature = "zstd")]
            Encoder::Zstd(encoder) => encoder.finish().or_raise(|| ErrorKind::Io)?,
        };
        inner.flush().or_raise(|| ErrorKind::Io)?;
        Ok(inner)
    }
}

/// Sits between the brotli compressor and the real writer. The compressor
/// flushes its sink mid-stream; those flushes stop here. Write errors are
/// kept, since `CompressorWriter::into_inner` discards them.
#[cfg(feature = "brotli")]
pub struct HoldFlush<W> {
    inner: W,
    error: Option<io::Error>,
}

#[cfg(feature = "brotli")]
impl<W: Write> HoldFlush<W> {
    fn new(inner: W) -> Self {
        Self { inner, error: None }
    }

    fn into_inner(self) -> io::Result<W> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.inner),
        }
    }
}

#[cfg(feature = "brotli")]
impl<W: Write> Write for HoldFlush<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            Err(err) if err.kind() != io::ErrorKind::Interrupted => {
                self.error = Some(io::Error::new(err.kind(), err.to_string()));
                Err(err)
            },
            written => written,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::None(w) => w.write(buf),
            #[cfg(feature = "brotli")]
            Encoder::Brotli(w) => w.write(buf),
            Encoder::Bzip2(w) => w.write(buf),
            Encoder::Gzip(w) => w.write(buf),
            #[cfg(feature = "xz")]
            Encoder::Xz(w) => w.write(buf),
            #[cfg(feature = "zstd")]
            Encoder::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::None(w) => w.flush(),
            #[cfg(feature = "brotli")]
            Encoder::Brotli(w) => w.flush(),
            Encoder::Bzip2(w) => w.flush(),
            Encoder::Gzip(w) => w.flush(),
            #[cfg(feature = "xz")]
            Encoder::Xz(w) => w.flush(),
            #[cfg(feature = "zstd")]
            Encoder::Zstd(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;
    use std::io::{Cursor, Read, Write};

    fn encode(format: Compression, data: &[u8]) -> Vec<u8> {
        let mut encoder = format.encoder(Vec::new()).unwrap();
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn decode(format: Compression, data: Vec<u8>) -> Vec<u8> {
        let mut reader = format.wrap_reader(Cursor::new(data)).unwrap();
        let mut output = Vec::new();
        reader.read_to_end(&mut output).unwrap();
        output
    }

    #[rstest]
    #[case(Compression::None)]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    #[cfg_attr(feature = "brotli", case(Compression::Brotli))]
    #[cfg_attr(feature = "xz", case(Compression::Xz))]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn encoder_output_decodes(#[case] format: Compression) {
        let data = b"\x03abc\x02de\x00".repeat(200);
        let encoded = encode(format, &data);
        assert_eq!(decode(format, encoded), data);
    }

    #[rstest]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    fn concatenated_members_decode_in_full(#[case] format: Compression) {
        let mut joined = encode(format, b"first ");
        joined.extend(encode(format, b"second"));
        assert_eq!(decode(format, joined), b"first second");
    }

    #[derive(Default)]
    struct CountedFlushes {
        data: Vec<u8>,
        flushes: usize,
    }

    impl Write for CountedFlushes {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[rstest]
    #[case(Compression::None)]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    #[cfg_attr(feature = "brotli", case(Compression::Brotli))]
    fn finish_flushes_the_inner_writer_once(#[case] format: Compression) {
        let data = b"\x03abc\x02de\x00".repeat(5000);
        let mut encoder = format.encoder(CountedFlushes::default()).unwrap();
        encoder.write_all(&data).unwrap();
        let inner = encoder.finish().unwrap();
        assert_eq!(inner.flushes, 1);
        assert_eq!(decode(format, inner.data), data);
    }

    #[cfg(feature = "brotli")]
    #[test]
    fn brotli_reports_a_failed_trailer_write() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("gone"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut encoder = Compression::Brotli.encoder(Broken).unwrap();
        // Likely still buffered in the compressor; either way the error surfaces.
        let _ = encoder.write_all(b"abc");
        assert!(encoder.finish().is_err());
    }

    #[test]
    fn none_encoder_is_passthrough() {
        assert_eq!(encode(Compression::None, b"raw"), b"raw");
    }

    #[test]
    fn gzip_output_has_magic_header() {
        let encoded = encode(Compression::Gzip, b"payload");
        assert_eq!(&encoded[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn truncated_gzip_fails_to_read() {
        let mut encoded = encode(Compression::Gzip, &b"0123456789".repeat(100));
        encoded.truncate(encoded.len() / 2);
        let mut reader = Compression::Gzip.wrap_reader(Cursor::new(encoded)).unwrap();
        let mut output = Vec::new();
        assert!(reader.read_to_end(&mut output).is_err());
    }
}
