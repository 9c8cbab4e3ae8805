// fed-core/src/artifact/codec.rs

//! Encoding and decoding of model artifacts.

use std::collections::BTreeMap;
use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::config::ArtifactConfig;
use crate::error::{FedError, Result};
use crate::model::ModelState;

use super::format::ArtifactHeader;

/// Encodes and decodes model states as framed, compressed, checksummed
/// artifacts.
///
/// The codec is stateless apart from its compression settings; encoding the
/// same state with the same settings always yields identical bytes.
#[derive(Debug, Clone)]
pub struct ArtifactCodec {
    compression: String,
    compression_level: i32,
}

impl ArtifactCodec {
    /// Creates a codec from artifact configuration.
    pub fn new(config: &ArtifactConfig) -> Self {
        Self {
            compression: config.compression.clone(),
            compression_level: config.compression_level,
        }
    }

    /// Encodes a model state with no provenance metadata.
    pub fn encode(&self, state: &ModelState) -> Result<Vec<u8>> {
        self.encode_with_metadata(state, BTreeMap::new())
    }

    /// Encodes a model state, embedding provenance metadata in the header.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or compression fails, or the
    /// configured compression algorithm is unknown.
    pub fn encode_with_metadata(
        &self,
        state: &ModelState,
        metadata: BTreeMap<String, String>,
    ) -> Result<Vec<u8>> {
        let payload = bincode::serialize(state)
            .map_err(|e| FedError::serialization(format!("failed to serialize model state: {e}")))?;

        let checksum = calculate_checksum(&payload);
        let compressed = self.compress(&payload)?;

        let header = ArtifactHeader::with_metadata(
            self.compression.clone(),
            payload.len() as u64,
            checksum,
            metadata,
        );
        let header_bytes = bincode::serialize(&header)
            .map_err(|e| FedError::serialization(format!("failed to serialize header: {e}")))?;

        let header_len = header_bytes.len() as u32;
        let mut artifact = Vec::with_capacity(4 + header_bytes.len() + compressed.len());
        artifact.extend_from_slice(&header_len.to_le_bytes());
        artifact.extend_from_slice(&header_bytes);
        artifact.extend_from_slice(&compressed);

        Ok(artifact)
    }

    /// Decodes an artifact back into a model state, verifying its integrity.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The framing is truncated or the magic bytes/version are wrong
    /// - Decompression fails
    /// - The checksum or uncompressed size doesn't match the header
    pub fn decode(&self, artifact: &[u8]) -> Result<ModelState> {
        let (header, compressed) = split_frame(artifact)?;

        let payload = decompress(compressed, &header.compression)?;

        let computed_checksum = calculate_checksum(&payload);
        if computed_checksum != header.checksum {
            return Err(FedError::artifact(format!(
                "checksum mismatch: expected {}, got {}",
                header.checksum, computed_checksum
            )));
        }

        if payload.len() as u64 != header.uncompressed_size {
            return Err(FedError::artifact(format!(
                "size mismatch: expected {}, got {}",
                header.uncompressed_size,
                payload.len()
            )));
        }

        bincode::deserialize(&payload)
            .map_err(|e| FedError::serialization(format!("failed to deserialize model state: {e}")))
    }

    /// Reads only the header of an artifact.
    ///
    /// Useful for inspecting provenance without decompressing the payload.
    pub fn decode_header(&self, artifact: &[u8]) -> Result<ArtifactHeader> {
        let (header, _) = split_frame(artifact)?;
        Ok(header)
    }

    /// Compresses a payload according to the configured algorithm.
    fn compress(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match self.compression.as_str() {
            "none" => Ok(payload.to_vec()),
            "lz4" => Ok(lz4_flex::compress_prepend_size(payload)),
            "zstd" => zstd::encode_all(payload, self.compression_level)
                .map_err(|e| FedError::artifact(format!("zstd compression failed: {e}"))),
            other => Err(FedError::artifact(format!(
                "unknown compression algorithm: {other}"
            ))),
        }
    }
}

/// Splits an artifact into its validated header and compressed payload.
fn split_frame(artifact: &[u8]) -> Result<(ArtifactHeader, &[u8])> {
    if artifact.len() < 4 {
        return Err(FedError::artifact("artifact too small"));
    }

    let header_len = u32::from_le_bytes(
        artifact[..4]
            .try_into()
            .map_err(|_| FedError::artifact("artifact framing corrupt"))?,
    ) as usize;

    if artifact.len() < 4 + header_len {
        return Err(FedError::artifact("artifact truncated: header incomplete"));
    }

    let header: ArtifactHeader = bincode::deserialize(&artifact[4..4 + header_len])
        .map_err(|e| FedError::serialization(format!("failed to deserialize header: {e}")))?;

    if !header.validate_magic() {
        return Err(FedError::artifact(format!(
            "invalid magic bytes: expected {:?}, got {:?}",
            ArtifactHeader::MAGIC,
            header.magic
        )));
    }

    if !header.validate_version() {
        return Err(FedError::artifact(format!(
            "unsupported version: expected {}, got {}",
            ArtifactHeader::VERSION,
            header.version
        )));
    }

    Ok((header, &artifact[4 + header_len..]))
}

/// Decompresses a payload according to the algorithm recorded in the header.
fn decompress(data: &[u8], compression: &str) -> Result<Vec<u8>> {
    match compression {
        "none" => Ok(data.to_vec()),
        "lz4" => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| FedError::artifact(format!("lz4 decompression failed: {e}"))),
        "zstd" => zstd::decode_all(data)
            .map_err(|e| FedError::artifact(format!("zstd decompression failed: {e}"))),
        other => Err(FedError::artifact(format!(
            "unknown compression algorithm: {other}"
        ))),
    }
}

/// Calculates XXHash64 checksum of a payload.
fn calculate_checksum(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tensor;

    fn sample_state() -> ModelState {
        let mut state = ModelState::new();
        state.insert(
            "linear.weight",
            Tensor::new(vec![2, 3], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap(),
        );
        state.insert("linear.bias", Tensor::new(vec![2], vec![-1.0, 1.0]).unwrap());
        state
    }

    fn codec(compression: &str) -> ArtifactCodec {
        ArtifactCodec::new(&ArtifactConfig {
            compression: compression.to_string(),
            compression_level: 1,
        })
    }

    #[test]
    fn test_roundtrip_none() {
        let codec = codec("none");
        let state = sample_state();

        let bytes = codec.encode(&state).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded, state);
    }

    #[test]
    fn test_roundtrip_lz4() {
        let codec = codec("lz4");
        let state = sample_state();

        let decoded = codec.decode(&codec.encode(&state).unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_roundtrip_zstd() {
        let codec = codec("zstd");
        let state = sample_state();

        let decoded = codec.decode(&codec.encode(&state).unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_decode_accepts_other_compression() {
        // The header, not the codec configuration, determines how a payload
        // is decompressed.
        let state = sample_state();
        let bytes = codec("zstd").encode(&state).unwrap();

        let decoded = codec("none").decode(&bytes).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let codec = codec("lz4");
        let state = sample_state();

        let a = codec.encode(&state).unwrap();
        let b = codec.encode(&state).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_metadata_in_header() {
        let codec = codec("none");
        let mut metadata = BTreeMap::new();
        metadata.insert("round".to_string(), "3".to_string());
        metadata.insert("provider".to_string(), "node-a".to_string());

        let bytes = codec
            .encode_with_metadata(&sample_state(), metadata)
            .unwrap();
        let header = codec.decode_header(&bytes).unwrap();

        assert_eq!(header.metadata.get("round"), Some(&"3".to_string()));
        assert_eq!(header.metadata.get("provider"), Some(&"node-a".to_string()));
    }

    #[test]
    fn test_unknown_compression_rejected() {
        let codec = codec("brotli");
        assert!(codec.encode(&sample_state()).is_err());
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let codec = codec("none");
        let mut bytes = codec.encode(&sample_state()).unwrap();

        // Flip a bit in the payload section.
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let result = codec.decode(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_artifact_rejected() {
        let codec = codec("none");
        let bytes = codec.encode(&sample_state()).unwrap();

        assert!(codec.decode(&bytes[..2]).is_err());
        assert!(codec.decode(&bytes[..6]).is_err());
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let codec = codec("none");

        let mut header = ArtifactHeader::new("none".to_string(), 4, 0);
        header.magic = *b"XXXX";
        let header_bytes = bincode::serialize(&header).unwrap();

        let mut artifact = Vec::new();
        artifact.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        artifact.extend_from_slice(&header_bytes);
        artifact.extend_from_slice(b"data");

        let err = codec.decode(&artifact).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_empty_state_roundtrip() {
        let codec = codec("lz4");
        let state = ModelState::new();

        let decoded = codec.decode(&codec.encode(&state).unwrap()).unwrap();
        assert!(decoded.is_empty());
    }
}
