//! Compression selected by file suffix.
//!
//! Backups never choose a codec explicitly: a source called `events.pb.gz`
//! is read through gzip, an archive called `143000.pb.bz2` is written
//! through bzip2. This crate maps suffixes onto a [`Compression`] value and
//! provides the two streaming halves the backup pipeline needs:
//!
//! - **Decoding** via [`Compression::wrap_reader`], which layers a
//!   decompressor over any [`Read`](std::io::Read).
//! - **Encoding** via [`Compression::encoder`], which returns an [`Encoder`]
//!   that must be [`finish`](Encoder::finish)ed so trailers are written and
//!   write errors are reported instead of swallowed on drop.
//!
//! Bzip2 and Gzip are always available. Brotli, XZ and Zstd are behind
//! feature flags of the same name.

mod codec;
mod construct;
pub mod error;
mod util;

pub use crate::codec::Encoder;

/// A supported compression format.
///
/// Variants gated behind feature flags (`brotli`, `xz`, `zstd`) are only
/// available when the corresponding feature is enabled. Defaults to
/// [`None`](Self::None) (uncompressed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Brotli compression (.br)
    #[cfg(feature = "brotli")]
    Brotli,
    /// Bzip2 compression (.bz2)
    Bzip2,
    /// Gzip compression (.gz)
    Gzip,
    /// XZ/LZMA compression (.xz)
    #[cfg(feature = "xz")]
    Xz,
    /// Zstd compression (.zst)
    #[cfg(feature = "zstd")]
    Zstd,
}

#[cfg(test)]
mod tests {
    use crate::Compression;

    #[test]
    fn compression_default() {
        assert_eq!(Compression::default(), Compression::None);
    }
}
