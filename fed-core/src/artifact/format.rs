// fed-core/src/artifact/format.rs

//! Artifact header specification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header for a model artifact file.
///
/// The header contains metadata about the artifact including compression
/// settings and integrity verification data. Metadata keys are stored in a
/// sorted map so identical inputs always encode to identical bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Magic bytes identifying this as a model artifact ("FEDA")
    pub magic: [u8; 4],
    /// Format version number
    pub version: u32,
    /// Compression algorithm used ("none", "lz4", or "zstd")
    pub compression: String,
    /// Size of the payload before compression
    pub uncompressed_size: u64,
    /// XXHash64 checksum of the uncompressed payload
    pub checksum: u64,
    /// Artifact provenance (round, kind, provider)
    pub metadata: BTreeMap<String, String>,
}

impl ArtifactHeader {
    /// Magic bytes for model artifacts
    pub const MAGIC: [u8; 4] = *b"FEDA";

    /// Current format version
    pub const VERSION: u32 = 1;

    /// Creates a new artifact header.
    pub fn new(compression: String, uncompressed_size: u64, checksum: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            compression,
            uncompressed_size,
            checksum,
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a new artifact header with provenance metadata.
    pub fn with_metadata(
        compression: String,
        uncompressed_size: u64,
        checksum: u64,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            compression,
            uncompressed_size,
            checksum,
            metadata,
        }
    }

    /// Validates the header magic bytes.
    pub fn validate_magic(&self) -> bool {
        self.magic == Self::MAGIC
    }

    /// Validates the header version.
    pub fn validate_version(&self) -> bool {
        self.version == Self::VERSION
    }
}
