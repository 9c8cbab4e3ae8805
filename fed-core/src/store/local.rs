// fed-core/src/store/local.rs

//! Shared-filesystem artifact store.
//!
//! Layout under the configured base directory:
//!
//! ```text
//! global-models/round-0.fed        <- bootstrap baseline
//! global-models/round-1.fed        <- aggregated states, one per round
//! provider-updates/round-1-P.fed   <- submission from provider P for round 1
//! provider-updates/round-1.closed  <- submission-window cutoff marker
//! ```
//!
//! Global states are written atomically (temp file + rename) and never
//! replaced. A submission slot is claimed with a hard link from a fully
//! written temp file, so the first writer wins and a reader can never
//! observe a half-written submission under its final name.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::Mmap;

use super::traits::ArtifactStore;
use crate::artifact::ArtifactCodec;
use crate::config::FedConfig;
use crate::error::{FedError, Result};
use crate::model::{validate_provider_id, ModelState, Submission};

const ARTIFACT_EXT: &str = "fed";
const CLOSED_EXT: &str = "closed";

/// Filesystem-backed artifact store.
pub struct LocalStore {
    global_dir: PathBuf,
    updates_dir: PathBuf,
    codec: ArtifactCodec,
    buffer_size: usize,
    use_mmap: bool,
    mmap_threshold: u64,
}

impl LocalStore {
    /// Creates a store rooted at the configured directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn new(config: &FedConfig) -> Result<Self> {
        let global_dir = config.store.resolved_global_dir();
        let updates_dir = config.store.resolved_updates_dir();

        for dir in [&global_dir, &updates_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                FedError::storage_with_source(dir, "failed to create store directory", e)
            })?;
        }

        Ok(Self {
            global_dir,
            updates_dir,
            codec: ArtifactCodec::new(&config.artifact),
            buffer_size: config.store.buffer_size,
            use_mmap: config.store.use_mmap,
            mmap_threshold: config.store.mmap_threshold,
        })
    }

    fn global_path(&self, round: u64) -> PathBuf {
        self.global_dir.join(format!("round-{round}.{ARTIFACT_EXT}"))
    }

    fn submission_path(&self, round: u64, provider: &str) -> PathBuf {
        self.updates_dir
            .join(format!("round-{round}-{provider}.{ARTIFACT_EXT}"))
    }

    fn closed_marker_path(&self, round: u64) -> PathBuf {
        self.updates_dir.join(format!("round-{round}.{CLOSED_EXT}"))
    }

    /// Reads a whole artifact file, via mmap above the configured threshold.
    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        let file = File::open(path)
            .map_err(|e| FedError::storage_with_source(path, "failed to open artifact", e))?;
        let meta = file
            .metadata()
            .map_err(|e| FedError::storage_with_source(path, "failed to read metadata", e))?;

        if self.use_mmap && meta.len() >= self.mmap_threshold {
            // SAFETY: the file is opened read-only and the mapping does not
            // outlive this call.
            let mmap = unsafe { Mmap::map(&file) }
                .map_err(|e| FedError::storage_with_source(path, "failed to memory-map artifact", e))?;
            Ok(mmap.to_vec())
        } else {
            let mut reader = BufReader::with_capacity(self.buffer_size, file);
            let mut buf = Vec::with_capacity(meta.len() as usize);
            reader
                .read_to_end(&mut buf)
                .map_err(|e| FedError::storage_with_source(path, "failed to read artifact", e))?;
            Ok(buf)
        }
    }

    /// Writes `bytes` to a temp file in the target directory, syncs, then
    /// renames into place.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let temp_path = temp_sibling(path)?;

        self.write_file(&temp_path, bytes)?;

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            FedError::storage_with_source(
                &temp_path,
                format!("failed to rename to {}", path.display()),
                e,
            )
        })
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let file = File::create(path)
            .map_err(|e| FedError::storage_with_source(path, "failed to create file", e))?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        writer
            .write_all(bytes)
            .map_err(|e| FedError::storage_with_source(path, "failed to write artifact", e))?;
        writer
            .flush()
            .map_err(|e| FedError::storage_with_source(path, "failed to flush artifact", e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| FedError::storage_with_source(path, "failed to sync artifact", e))?;
        Ok(())
    }

    /// Lists (provider, path) pairs for submissions tagged `round`, sorted
    /// by provider identity.
    fn submission_entries(&self, round: u64) -> Result<Vec<(String, PathBuf)>> {
        let mut entries = Vec::new();

        let dir = match fs::read_dir(&self.updates_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => {
                return Err(FedError::storage_with_source(
                    &self.updates_dir,
                    "failed to read submissions directory",
                    e,
                ));
            }
        };

        for entry in dir {
            let entry = entry.map_err(|e| {
                FedError::storage_with_source(
                    &self.updates_dir,
                    "failed to read directory entry",
                    e,
                )
            })?;

            if let Some(name) = entry.file_name().to_str() {
                if let Some(provider) = parse_submission_name(name, round) {
                    entries.push((provider, entry.path()));
                }
            }
        }

        entries.sort();
        Ok(entries)
    }
}

impl ArtifactStore for LocalStore {
    fn load_global_state(&self, round: u64) -> Result<ModelState> {
        let path = self.global_path(round);
        if !path.exists() {
            return Err(FedError::not_found(round));
        }
        let bytes = self.read_bytes(&path)?;
        self.codec.decode(&bytes)
    }

    fn save_global_state(&self, round: u64, state: &ModelState) -> Result<()> {
        let path = self.global_path(round);
        if path.exists() {
            return Err(FedError::StateExists { round });
        }

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("kind".to_string(), "global".to_string());
        metadata.insert("round".to_string(), round.to_string());

        let bytes = self.codec.encode_with_metadata(state, metadata)?;
        self.write_atomic(&path, &bytes)
    }

    fn has_global_state(&self, round: u64) -> Result<bool> {
        Ok(self.global_path(round).exists())
    }

    fn latest_round(&self) -> Result<Option<u64>> {
        let dir = match fs::read_dir(&self.global_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(FedError::storage_with_source(
                    &self.global_dir,
                    "failed to read global state directory",
                    e,
                ));
            }
        };

        let mut latest = None;
        for entry in dir {
            let entry = entry.map_err(|e| {
                FedError::storage_with_source(&self.global_dir, "failed to read directory entry", e)
            })?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(round) = parse_global_name(name) {
                    latest = latest.max(Some(round));
                }
            }
        }
        Ok(latest)
    }

    fn put_submission(&self, submission: &Submission) -> Result<()> {
        validate_provider_id(&submission.provider)?;

        if self.is_round_closed(submission.round)? {
            return Err(FedError::RoundClosed {
                round: submission.round,
            });
        }

        let path = self.submission_path(submission.round, &submission.provider);
        if path.exists() {
            return Err(FedError::duplicate_submission(
                submission.round,
                &submission.provider,
            ));
        }

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("kind".to_string(), "update".to_string());
        metadata.insert("round".to_string(), submission.round.to_string());
        metadata.insert("provider".to_string(), submission.provider.clone());

        let bytes = self.codec.encode_with_metadata(&submission.state, metadata)?;

        // Write the temp file fully, then claim the final name with a hard
        // link: link creation fails if the name exists, so two racing
        // writers resolve to first-writer-wins and the final name only ever
        // holds complete artifacts.
        let temp_path = temp_sibling(&path)?;
        self.write_file(&temp_path, &bytes)?;

        let linked = fs::hard_link(&temp_path, &path);
        let _ = fs::remove_file(&temp_path);

        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(FedError::duplicate_submission(
                submission.round,
                &submission.provider,
            )),
            Err(e) => Err(FedError::storage_with_source(
                &path,
                "failed to place submission",
                e,
            )),
        }
    }

    fn list_submissions(&self, round: u64) -> Result<Vec<Submission>> {
        // The directory is listed once up front; artifacts landing after
        // this point are not part of the snapshot.
        let entries = self.submission_entries(round)?;

        let mut submissions = Vec::with_capacity(entries.len());
        for (provider, path) in entries {
            let bytes = self.read_bytes(&path)?;
            let state = self.codec.decode(&bytes)?;
            submissions.push(Submission::new(round, provider, state));
        }
        Ok(submissions)
    }

    fn providers_seen(&self, round: u64) -> Result<BTreeSet<String>> {
        Ok(self
            .submission_entries(round)?
            .into_iter()
            .map(|(provider, _)| provider)
            .collect())
    }

    fn close_round(&self, round: u64) -> Result<()> {
        let path = self.closed_marker_path(round);
        fs::write(&path, b"").map_err(|e| {
            FedError::storage_with_source(&path, "failed to write round-closed marker", e)
        })
    }

    fn is_round_closed(&self, round: u64) -> Result<bool> {
        Ok(self.closed_marker_path(round).exists())
    }
}

/// Hidden temp-file sibling for a target path, unique per writer so
/// concurrent writers never share a temp file.
fn temp_sibling(path: &Path) -> Result<PathBuf> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);

    let filename = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| FedError::storage(path, "artifact path has no file name"))?;
    Ok(path.with_file_name(format!(".{filename}.{}-{n}.tmp", std::process::id())))
}

/// Parses `round-N.fed` into `N`.
fn parse_global_name(name: &str) -> Option<u64> {
    name.strip_prefix("round-")?
        .strip_suffix(&format!(".{ARTIFACT_EXT}"))?
        .parse()
        .ok()
}

/// Parses `round-{round}-P.fed` into `P`; names tagged with other rounds
/// don't match.
fn parse_submission_name(name: &str, round: u64) -> Option<String> {
    let provider = name
        .strip_prefix(&format!("round-{round}-"))?
        .strip_suffix(&format!(".{ARTIFACT_EXT}"))?;
    if provider.is_empty() || provider.starts_with('.') {
        None
    } else {
        Some(provider.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tensor;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = FedConfig::default();
        config.store.base_path = temp_dir.path().to_path_buf();
        let store = LocalStore::new(&config).unwrap();
        (store, temp_dir)
    }

    fn sample_state(value: f32) -> ModelState {
        let mut state = ModelState::new();
        state.insert("w", Tensor::new(vec![2], vec![value, value]).unwrap());
        state
    }

    #[test]
    fn test_new_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = FedConfig::default();
        config.store.base_path = temp_dir.path().join("nested");

        let _store = LocalStore::new(&config).unwrap();
        assert!(temp_dir.path().join("nested/global-models").exists());
        assert!(temp_dir.path().join("nested/provider-updates").exists());
    }

    #[test]
    fn test_global_state_roundtrip() {
        let (store, _temp) = create_test_store();
        let state = sample_state(1.5);

        store.save_global_state(0, &state).unwrap();
        let loaded = store.load_global_state(0).unwrap();

        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_missing_round_is_not_found() {
        let (store, _temp) = create_test_store();

        let err = store.load_global_state(4).unwrap_err();
        assert!(matches!(err, FedError::NotFound { round: 4 }));
    }

    #[test]
    fn test_global_state_is_write_once() {
        let (store, _temp) = create_test_store();

        store.save_global_state(0, &sample_state(1.0)).unwrap();
        let err = store.save_global_state(0, &sample_state(2.0)).unwrap_err();

        assert!(matches!(err, FedError::StateExists { round: 0 }));
        // The original content is untouched.
        assert_eq!(store.load_global_state(0).unwrap(), sample_state(1.0));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let (store, temp_dir) = create_test_store();
        store.save_global_state(0, &sample_state(1.0)).unwrap();
        store
            .put_submission(&Submission::new(1, "node-a", sample_state(2.0)))
            .unwrap();

        for dir in ["global-models", "provider-updates"] {
            for entry in fs::read_dir(temp_dir.path().join(dir)).unwrap() {
                let name = entry.unwrap().file_name();
                assert!(
                    !name.to_str().unwrap().ends_with(".tmp"),
                    "leftover temp file {name:?}"
                );
            }
        }
    }

    #[test]
    fn test_latest_round() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.latest_round().unwrap(), None);

        store.save_global_state(0, &sample_state(0.0)).unwrap();
        store.save_global_state(1, &sample_state(1.0)).unwrap();
        store.save_global_state(2, &sample_state(2.0)).unwrap();

        assert_eq!(store.latest_round().unwrap(), Some(2));
    }

    #[test]
    fn test_submission_roundtrip() {
        let (store, _temp) = create_test_store();
        let submission = Submission::new(3, "node-a", sample_state(0.5));

        store.put_submission(&submission).unwrap();

        let listed = store.list_submissions(3).unwrap();
        assert_eq!(listed, vec![submission]);
    }

    #[test]
    fn test_duplicate_submission_rejected() {
        let (store, _temp) = create_test_store();

        store
            .put_submission(&Submission::new(3, "node-a", sample_state(0.5)))
            .unwrap();
        let err = store
            .put_submission(&Submission::new(3, "node-a", sample_state(9.9)))
            .unwrap_err();

        assert!(matches!(
            err,
            FedError::DuplicateSubmission { round: 3, ref provider } if provider == "node-a"
        ));

        // First writer won.
        let listed = store.list_submissions(3).unwrap();
        assert_eq!(listed[0].state, sample_state(0.5));
    }

    #[test]
    fn test_listing_is_scoped_to_round_and_sorted() {
        let (store, _temp) = create_test_store();

        store
            .put_submission(&Submission::new(1, "zeta", sample_state(1.0)))
            .unwrap();
        store
            .put_submission(&Submission::new(1, "alpha", sample_state(2.0)))
            .unwrap();
        store
            .put_submission(&Submission::new(12, "alpha", sample_state(3.0)))
            .unwrap();

        let listed = store.list_submissions(1).unwrap();
        let providers: Vec<_> = listed.iter().map(|s| s.provider.as_str()).collect();
        // Round 12's artifact must not leak into round 1's listing.
        assert_eq!(providers, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_provider_with_dashes() {
        let (store, _temp) = create_test_store();

        store
            .put_submission(&Submission::new(2, "eu-west-gpu-7", sample_state(1.0)))
            .unwrap();

        let seen = store.providers_seen(2).unwrap();
        assert!(seen.contains("eu-west-gpu-7"));
    }

    #[test]
    fn test_invalid_provider_rejected() {
        let (store, _temp) = create_test_store();

        let err = store
            .put_submission(&Submission::new(2, "../escape", sample_state(1.0)))
            .unwrap_err();
        assert!(matches!(err, FedError::InvalidProvider { .. }));
    }

    #[test]
    fn test_closed_round_rejects_submissions() {
        let (store, _temp) = create_test_store();

        store
            .put_submission(&Submission::new(5, "early", sample_state(1.0)))
            .unwrap();
        store.close_round(5).unwrap();
        // Closing twice is fine.
        store.close_round(5).unwrap();

        let err = store
            .put_submission(&Submission::new(5, "late", sample_state(2.0)))
            .unwrap_err();
        assert!(matches!(err, FedError::RoundClosed { round: 5 }));

        // The pre-close submission is still there; the marker is not listed.
        let listed = store.list_submissions(5).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].provider, "early");
    }

    #[test]
    fn test_providers_seen_empty_round() {
        let (store, _temp) = create_test_store();
        assert!(store.providers_seen(9).unwrap().is_empty());
        assert!(store.list_submissions(9).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_submission_surfaces_error() {
        let (store, temp_dir) = create_test_store();

        let path = temp_dir
            .path()
            .join("provider-updates/round-1-broken.fed");
        fs::write(&path, b"not an artifact").unwrap();

        assert!(store.list_submissions(1).is_err());
    }

    #[test]
    fn test_mmap_read_path() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = FedConfig::default();
        config.store.base_path = temp_dir.path().to_path_buf();
        config.store.mmap_threshold = 16; // Force mmap for any real artifact
        let store = LocalStore::new(&config).unwrap();

        let mut state = ModelState::new();
        state.insert(
            "big",
            Tensor::new(vec![1024], (0..1024).map(|i| i as f32).collect()).unwrap(),
        );

        store.save_global_state(0, &state).unwrap();
        assert_eq!(store.load_global_state(0).unwrap(), state);
    }

    #[test]
    fn test_parse_submission_name_round_prefix() {
        // round-12-* must not parse as a round-1 submission.
        assert_eq!(parse_submission_name("round-12-a.fed", 1), None);
        assert_eq!(
            parse_submission_name("round-1-node-b.fed", 1),
            Some("node-b".to_string())
        );
        assert_eq!(parse_submission_name("round-1.closed", 1), None);
        assert_eq!(parse_submission_name("round-1-.fed", 1), None);
    }

    #[test]
    fn test_object_safety() {
        let (store, _temp) = create_test_store();
        let store: std::sync::Arc<dyn ArtifactStore> = std::sync::Arc::new(store);

        store.save_global_state(0, &sample_state(1.0)).unwrap();
        assert!(store.has_global_state(0).unwrap());
    }
}
