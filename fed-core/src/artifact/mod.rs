// fed-core/src/artifact/mod.rs

//! On-disk artifact encoding for model states.
//!
//! Every persisted model state (global or per-provider submission) is a
//! single artifact file:
//!
//! ```text
//! +------------------------+
//! | Header Length (4 bytes)|  <- u32 little-endian
//! +------------------------+
//! | Header (bincode)       |  <- ArtifactHeader serialized
//! +------------------------+
//! | Compressed Payload     |  <- bincode ModelState, compressed per header
//! +------------------------+
//! ```
//!
//! The header records the compression algorithm, the uncompressed payload
//! size, and an XXHash64 checksum of the uncompressed payload. Decoding
//! verifies all three before handing back a [`crate::model::ModelState`],
//! so a torn or corrupted artifact is reported instead of silently
//! aggregated.

mod codec;
mod format;

pub use codec::ArtifactCodec;
pub use format::ArtifactHeader;
