//! Fixture generation
//!
//! Writes the six input files every scenario draws from. All fixtures but
//! the random one are byte-for-byte reproducible, so preparing twice leaves
//! identical content behind.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;

use crate::common::{Error, Result};

/// Size threshold the large fixtures are built around
pub const THRESHOLD_BYTES: usize = 1024 * 1024;

/// Size of the over-threshold and random fixtures
pub const LARGE_BYTES: usize = 2 * THRESHOLD_BYTES;

/// Name of the path that is deliberately never created
pub const MISSING_FILE_NAME: &str = "non_existent_file.txt";

const PRINTABLE_TEXT: &[u8] = b"This is a small file with printable characters 12345!";
const MIXED_TEXT: &[u8] =
    b"This is a mixed file with printable and non-printable characters.\x00\x01\x02\x03";

/// Byte-content class of a fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureKind {
    PrintableText,
    MixedBinary,
    BoundaryLarge,
    OverThresholdLarge,
    Empty,
    Random,
}

impl FixtureKind {
    pub const ALL: [FixtureKind; 6] = [
        FixtureKind::PrintableText,
        FixtureKind::MixedBinary,
        FixtureKind::BoundaryLarge,
        FixtureKind::OverThresholdLarge,
        FixtureKind::Empty,
        FixtureKind::Random,
    ];

    /// Stable file name used across scenarios
    pub fn file_name(self) -> &'static str {
        match self {
            FixtureKind::PrintableText => "small_printable.txt",
            FixtureKind::MixedBinary => "mixed_chars.txt",
            FixtureKind::BoundaryLarge => "large_file.txt",
            FixtureKind::OverThresholdLarge => "over_threshold.bin",
            FixtureKind::Empty => "empty_file.txt",
            FixtureKind::Random => "urandom_file.bin",
        }
    }

    /// Whether re-preparing produces identical bytes
    pub fn is_deterministic(self) -> bool {
        self != FixtureKind::Random
    }

    /// Expected length on disk
    pub fn size(self) -> usize {
        match self {
            FixtureKind::PrintableText => PRINTABLE_TEXT.len(),
            FixtureKind::MixedBinary => MIXED_TEXT.len(),
            FixtureKind::BoundaryLarge => THRESHOLD_BYTES - 1,
            FixtureKind::OverThresholdLarge | FixtureKind::Random => LARGE_BYTES,
            FixtureKind::Empty => 0,
        }
    }

    fn contents(self) -> Result<Vec<u8>> {
        Ok(match self {
            FixtureKind::PrintableText => PRINTABLE_TEXT.to_vec(),
            FixtureKind::MixedBinary => MIXED_TEXT.to_vec(),
            FixtureKind::BoundaryLarge => vec![b'A'; self.size()],
            FixtureKind::OverThresholdLarge => vec![b'B'; self.size()],
            FixtureKind::Empty => Vec::new(),
            FixtureKind::Random => {
                let mut buf = vec![0u8; self.size()];
                OsRng.try_fill_bytes(&mut buf).map_err(|e| Error::FixtureCreation {
                    path: self.file_name().to_string(),
                    reason: format!("entropy source unavailable: {}", e),
                })?;
                buf
            }
        })
    }
}

/// Paths of a prepared fixture directory
#[derive(Debug, Clone)]
pub struct FixtureSet {
    directory: PathBuf,
}

impl FixtureSet {
    /// Directory holding the fixtures
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path(&self, kind: FixtureKind) -> PathBuf {
        self.directory.join(kind.file_name())
    }

    /// A path inside the fixture directory that is known not to exist
    pub fn missing_path(&self) -> PathBuf {
        self.directory.join(MISSING_FILE_NAME)
    }
}

/// Create `directory` if needed and write every fixture into it
pub fn prepare(directory: &Path) -> Result<FixtureSet> {
    fs::create_dir_all(directory).map_err(|e| Error::fixture_creation(directory, e))?;

    for kind in FixtureKind::ALL {
        let path = directory.join(kind.file_name());
        let contents = kind.contents()?;
        fs::write(&path, &contents).map_err(|e| Error::fixture_creation(&path, e))?;
        tracing::debug!("Wrote fixture {} ({} bytes)", path.display(), contents.len());
    }

    // A stray file from an earlier run would turn the error scenario green.
    let missing = directory.join(MISSING_FILE_NAME);
    if missing.exists() {
        fs::remove_file(&missing).map_err(|e| Error::fixture_creation(&missing, e))?;
    }

    tracing::info!("Prepared {} fixtures in {}", FixtureKind::ALL.len(), directory.display());

    Ok(FixtureSet {
        directory: directory.to_path_buf(),
    })
}

/// Run `prepare` on the blocking pool, keeping multi-megabyte writes off the
/// async workers
pub async fn prepare_in_background(directory: &Path) -> Result<FixtureSet> {
    let directory = directory.to_path_buf();
    tokio::task::spawn_blocking(move || prepare(&directory))
        .await
        .map_err(|e| Error::Internal(format!("fixture task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_in_background_writes_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let fixtures = prepare_in_background(&dir.path().join("nested/test_files"))
            .await
            .unwrap();

        assert_eq!(fixtures.directory(), dir.path().join("nested/test_files"));
        for kind in FixtureKind::ALL {
            assert!(fixtures.path(kind).is_file(), "{:?}", kind);
        }
    }

    #[tokio::test]
    async fn test_prepare_in_background_reports_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"").unwrap();

        let err = prepare_in_background(&blocker.join("test_files")).await.unwrap_err();
        assert!(matches!(err, Error::FixtureCreation { .. }));
    }

    #[test]
    fn test_prepare_writes_all_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let fixtures = prepare(&dir.path().join("test_files")).unwrap();

        for kind in FixtureKind::ALL {
            let meta = fs::metadata(fixtures.path(kind)).unwrap();
            assert_eq!(meta.len() as usize, kind.size(), "{:?}", kind);
        }
        assert!(!fixtures.missing_path().exists());
    }

    #[test]
    fn test_boundary_fixture_is_one_byte_under_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let fixtures = prepare(dir.path()).unwrap();

        let bytes = fs::read(fixtures.path(FixtureKind::BoundaryLarge)).unwrap();
        assert_eq!(bytes.len(), 1_048_575);
        assert!(bytes.iter().all(|&b| b == b'A'));

        let over = fs::metadata(fixtures.path(FixtureKind::OverThresholdLarge)).unwrap();
        assert!(over.len() as usize > THRESHOLD_BYTES);
    }

    #[test]
    fn test_mixed_fixture_contains_non_printable_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let fixtures = prepare(dir.path()).unwrap();

        let bytes = fs::read(fixtures.path(FixtureKind::MixedBinary)).unwrap();
        assert!(bytes.iter().any(|b| !(32..=126).contains(b)));
        let text = fs::read(fixtures.path(FixtureKind::PrintableText)).unwrap();
        assert!(text.iter().all(|b| (32..=126).contains(b)));
    }

    #[test]
    fn test_prepare_is_idempotent_except_random() {
        let dir = tempfile::tempdir().unwrap();
        let first = prepare(dir.path()).unwrap();
        let before: Vec<Vec<u8>> = FixtureKind::ALL
            .iter()
            .map(|k| fs::read(first.path(*k)).unwrap())
            .collect();

        let second = prepare(dir.path()).unwrap();
        for (kind, old) in FixtureKind::ALL.iter().zip(before) {
            let new = fs::read(second.path(*kind)).unwrap();
            if kind.is_deterministic() {
                assert_eq!(old, new, "{:?} changed between runs", kind);
            } else {
                assert_eq!(old.len(), new.len());
                assert_ne!(old, new, "random fixture should be regenerated");
            }
        }
    }

    #[test]
    fn test_stale_missing_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MISSING_FILE_NAME), b"leftover").unwrap();
        let fixtures = prepare(dir.path()).unwrap();
        assert!(!fixtures.missing_path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_directory_fails() {
        // A regular file cannot act as the fixture directory
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"").unwrap();

        let err = prepare(&blocker.join("fixtures")).unwrap_err();
        assert!(matches!(err, Error::FixtureCreation { .. }));
    }
}
