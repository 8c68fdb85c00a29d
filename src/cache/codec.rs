//! Payload compression strategies for the cache store.
//!
//! Large serialized payloads (search pages carrying image URL lists)
//! are gzip-compressed before being held in memory. The codec is picked once
//! at startup and injected into the store, so none of the cache paths branch
//! on availability at call time. Compression is strictly best-effort: the
//! store never relies on size reduction for correctness.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

/// Serialized payloads below this size are stored uncompressed.
/// Gzip overhead dominates on small JSON bodies.
pub const COMPRESS_THRESHOLD: usize = 10 * 1024;

/// Compression strategy applied to serialized cache payloads.
///
/// Both operations must form a round-trip: `decompress(compress(x)) == x`.
pub trait Codec: Send + Sync {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>>;
}

/// Gzip via flate2. `MultiGzDecoder` accepts a strict superset of the
/// streams `GzDecoder` accepts, so decoding uses it.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipCodec;

impl Codec for GzipCodec {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = MultiGzDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// No-op codec used when compression is disabled by config.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}
