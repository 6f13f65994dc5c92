//! Optional gzip compression of canonical payloads before they go on the wire.

use std::io::{Read, Write};

use crate::config::GossipTuningParams;
use crate::error::{GossipError, GossipResult};

/// A payload ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Either the canonical bytes or their gzip form.
    pub bytes: Vec<u8>,
    /// Whether `bytes` is gzip.
    pub is_compressed: bool,
}

/// Largest canonical payload accepted from a peer unless tuned otherwise.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// Decides when compression pays off and applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionCodec {
    enabled: bool,
    threshold_bytes: usize,
    max_payload_bytes: usize,
}

impl CompressionCodec {
    /// Constructor
    pub fn new(enabled: bool, threshold_bytes: usize) -> Self {
        Self {
            enabled,
            threshold_bytes,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Codec configured from tuning params.
    pub fn from_tuning(tuning: &GossipTuningParams) -> Self {
        Self::new(
            tuning.enable_compression,
            tuning.compression_threshold_bytes as usize,
        )
        .with_max_payload_bytes(tuning.max_payload_bytes as usize)
    }

    /// Bound the canonical payload size accepted by [`Self::decode`].
    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    /// The canonical payload size bound.
    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Compress `payload` if it is larger than the threshold and the result is
    /// strictly smaller; otherwise pass it through.
    pub fn encode(&self, payload: &[u8]) -> GossipResult<Encoded> {
        if self.enabled && payload.len() > self.threshold_bytes {
            let compressed = compress(payload)?;
            if compressed.len() < payload.len() {
                return Ok(Encoded {
                    bytes: compressed,
                    is_compressed: true,
                });
            }
        }
        Ok(Encoded {
            bytes: payload.to_vec(),
            is_compressed: false,
        })
    }

    /// Recover canonical bytes from the wire. `declared_len` is the
    /// uncompressed size the sender claims; anything above the payload bound
    /// is refused before a single byte is inflated.
    pub fn decode(
        &self,
        bytes: Vec<u8>,
        is_compressed: bool,
        declared_len: usize,
    ) -> GossipResult<Vec<u8>> {
        let too_big = |len: usize| {
            invalid_data(format!(
                "payload of {} bytes exceeds limit of {}",
                len, self.max_payload_bytes
            ))
        };
        if declared_len > self.max_payload_bytes {
            return Err(too_big(declared_len));
        }
        if !is_compressed {
            if bytes.len() > self.max_payload_bytes {
                return Err(too_big(bytes.len()));
            }
            return Ok(bytes);
        }
        decompress(&bytes, declared_len)
    }
}

fn invalid_data(msg: String) -> GossipError {
    GossipError::Compression(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

/// Gzip `data`.
pub fn compress(data: &[u8]) -> GossipResult<Vec<u8>> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

/// Inflate `data`, which must decode to exactly `expected_len` bytes.
///
/// Reading stops one byte past `expected_len` and the buffer grows only as
/// bytes arrive, so the declared size alone never drives an allocation.
pub fn decompress(data: &[u8], expected_len: usize) -> GossipResult<Vec<u8>> {
    let limit = u64::try_from(expected_len)
        .ok()
        .and_then(|n| n.checked_add(1))
        .ok_or_else(|| invalid_data(format!("declared length {} out of range", expected_len)))?;
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(data)
        .take(limit)
        .read_to_end(&mut out)?;
    if out.len() != expected_len {
        return Err(invalid_data(format!(
            "decompressed to {} bytes, expected {}",
            out.len(),
            expected_len
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_payloads_pass_through() {
        let codec = CompressionCodec::new(true, 1024);
        let payload = vec![b'a'; 1024];
        let enc = codec.encode(&payload).unwrap();
        assert!(!enc.is_compressed);
        assert_eq!(enc.bytes, payload);
    }

    #[test]
    fn large_repetitive_payloads_compress() {
        let codec = CompressionCodec::new(true, 1024);
        let payload = vec![b'a'; 4096];
        let enc = codec.encode(&payload).unwrap();
        assert!(enc.is_compressed);
        assert!(enc.bytes.len() < payload.len());
        assert_eq!(decompress(&enc.bytes, payload.len()).unwrap(), payload);
    }

    #[test]
    fn incompressible_payloads_are_sent_raw() {
        use rand::RngCore;
        let codec = CompressionCodec::new(true, 16);
        let mut payload = vec![0u8; 2048];
        rand::thread_rng().fill_bytes(&mut payload);
        let enc = codec.encode(&payload).unwrap();
        assert!(!enc.is_compressed);
        assert_eq!(enc.bytes, payload);
    }

    #[test]
    fn disabled_codec_never_compresses() {
        let codec = CompressionCodec::new(false, 0);
        let enc = codec.encode(&[b'x'; 4096]).unwrap();
        assert!(!enc.is_compressed);
    }

    #[test]
    fn garbage_and_length_mismatch_are_errors() {
        assert!(decompress(b"not gzip at all", 15).is_err());
        let c = compress(&[1u8; 100]).unwrap();
        assert!(decompress(&c, 99).is_err());
        assert!(decompress(&c, 101).is_err());
    }

    #[test]
    fn oversized_declarations_are_refused_without_inflating() {
        let codec = CompressionCodec::new(true, 16).with_max_payload_bytes(1024);
        let c = compress(&[7u8; 100]).unwrap();
        assert!(codec.decode(c.clone(), true, usize::MAX / 2).is_err());
        assert!(codec.decode(c.clone(), true, 1025).is_err());
        assert!(codec.decode(vec![0u8; 1025], false, 1025).is_err());
        assert!(codec.decode(vec![0u8; 10], false, usize::MAX).is_err());
        assert_eq!(codec.decode(c, true, 100).unwrap(), vec![7u8; 100]);
    }

    #[test]
    fn max_declared_length_does_not_overflow() {
        let c = compress(&[1u8; 10]).unwrap();
        assert!(decompress(&c, usize::MAX).is_err());
    }

    proptest! {
        #[test]
        fn compression_round_trip(payload in proptest::collection::vec(0u8..4, 1025..8192)) {
            prop_assert_eq!(decompress(&compress(&payload).unwrap(), payload.len()).unwrap(), payload.clone());

            let codec = CompressionCodec::new(true, 1024);
            let enc = codec.encode(&payload).unwrap();
            prop_assert!(enc.is_compressed);
            let dec = if enc.is_compressed {
                decompress(&enc.bytes, payload.len()).unwrap()
            } else {
                enc.bytes
            };
            prop_assert_eq!(dec, payload);
        }
    }
}
