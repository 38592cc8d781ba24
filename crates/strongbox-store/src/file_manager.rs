// ABOUTME: Atomic, redundant byte-level persistence for one store's canonical path.
// ABOUTME: Temp-file write, single-generation backup rotation, restore-on-missing and corruption quarantine.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use strongbox_core::{Envelope, StoreCategory};
use thiserror::Error;

/// Extension of every committed store file.
pub const EXTENSION: &str = "envelope";

/// Root directory for all store files, relative to the base directory.
pub const DB_DIR: &str = "db";

pub const BACKUP_DIR: &str = "backup";

pub const QUARANTINE_DIR: &str = "corruptedFilesAtRead";

pub const TEMP_PREFIX: &str = "temp_";

/// Errors that can occur while reading or writing a store file.
#[derive(Debug, Error)]
pub enum FileManagerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("could not rotate {} into backup slot {}: {source}", from.display(), to.display())]
    Rotate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not commit {} to {}: {source}", from.display(), to.display())]
    Commit {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The file triple (plus quarantine directory) belonging to one store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePaths {
    pub file_name: String,
    pub dir: PathBuf,
    pub primary: PathBuf,
    pub backup: PathBuf,
    pub temp: PathBuf,
    pub quarantine_dir: PathBuf,
}

impl StorePaths {
    /// Derive the canonical layout. The same inputs always yield the same paths.
    ///
    /// ```text
    /// <base>/db/<category>/<file>.envelope
    /// <base>/db/<category>/backup/<file>.envelope
    /// <base>/db/<category>/temp_<file>.envelope
    /// <base>/db/<category>/corruptedFilesAtRead/
    /// ```
    pub fn new(base_dir: &Path, category: StoreCategory, file_name: &str) -> Self {
        let dir = base_dir.join(DB_DIR).join(category.dir_name());
        let file = format!("{}.{}", file_name, EXTENSION);
        Self {
            file_name: file_name.to_string(),
            primary: dir.join(&file),
            backup: dir.join(BACKUP_DIR).join(&file),
            temp: dir.join(format!("{}{}", TEMP_PREFIX, file)),
            quarantine_dir: dir.join(QUARANTINE_DIR),
            dir,
        }
    }
}

/// Performs every on-disk operation for one store. Nothing else touches these paths.
#[derive(Debug, Clone)]
pub struct StoreFileManager {
    paths: StorePaths,
    sync_writes: bool,
}

impl StoreFileManager {
    /// `sync_writes` fsyncs the temp file before it is renamed into place and
    /// the directory afterwards.
    pub fn new(paths: StorePaths, sync_writes: bool) -> Self {
        Self { paths, sync_writes }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Commit `bytes` as the new primary generation.
    ///
    /// 1. create the store directory
    /// 2. write and flush the temp file (failure here leaves primary and backup untouched)
    /// 3. rotate the existing primary into the backup slot
    /// 4. rename temp over primary
    pub fn write(&self, bytes: &[u8]) -> Result<(), FileManagerError> {
        create_restricted_dir_all(&self.paths.dir)?;

        if let Err(e) = self.write_temp(bytes) {
            let _ = fs::remove_file(&self.paths.temp);
            return Err(e.into());
        }

        if self.paths.primary.exists() {
            self.rotate_primary_to_backup()?;
        }

        fs::rename(&self.paths.temp, &self.paths.primary).map_err(|source| {
            FileManagerError::Commit {
                from: self.paths.temp.clone(),
                to: self.paths.primary.clone(),
                source,
            }
        })?;

        if self.sync_writes {
            sync_dir(&self.paths.dir);
        }

        tracing::debug!(
            path = %self.paths.primary.display(),
            bytes = bytes.len(),
            "committed store file"
        );
        Ok(())
    }

    fn write_temp(&self, bytes: &[u8]) -> io::Result<()> {
        // A leftover temp file would keep its old mode through truncation
        match fs::remove_file(&self.paths.temp) {
            Ok(()) => tracing::debug!(path = %self.paths.temp.display(), "removed stale temp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let mut file = create_restricted_file(&self.paths.temp)?;
        file.write_all(bytes)?;
        file.flush()?;
        if self.sync_writes {
            file.sync_all()?;
        }
        Ok(())
    }

    fn rotate_primary_to_backup(&self) -> Result<(), FileManagerError> {
        let rotate_err = |source| FileManagerError::Rotate {
            from: self.paths.primary.clone(),
            to: self.paths.backup.clone(),
            source,
        };

        if let Some(backup_dir) = self.paths.backup.parent() {
            create_restricted_dir_all(backup_dir).map_err(rotate_err)?;
        }
        if self.paths.backup.exists() {
            fs::remove_file(&self.paths.backup).map_err(rotate_err)?;
        }
        fs::rename(&self.paths.primary, &self.paths.backup).map_err(rotate_err)?;
        Ok(())
    }

    /// Read the committed envelope.
    ///
    /// Returns `Ok(None)` when nothing was ever persisted. A missing primary
    /// with a backup present is healed by moving the backup into the primary
    /// slot first. A primary that fails to parse is quarantined and reported
    /// as `Ok(None)`.
    pub fn read(&self) -> Result<Option<Envelope>, FileManagerError> {
        if !self.paths.primary.exists() {
            if !self.paths.backup.exists() {
                return Ok(None);
            }
            self.restore_backup()?;
        }

        let bytes = fs::read(&self.paths.primary)?;
        match Envelope::from_bytes(&bytes) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                tracing::warn!(
                    path = %self.paths.primary.display(),
                    error = %e,
                    "store file is unreadable"
                );
                self.quarantine()?;
                Ok(None)
            }
        }
    }

    fn restore_backup(&self) -> Result<(), FileManagerError> {
        fs::rename(&self.paths.backup, &self.paths.primary)?;
        tracing::info!(
            backup = %self.paths.backup.display(),
            primary = %self.paths.primary.display(),
            "primary store file missing, restored from backup"
        );
        Ok(())
    }

    /// Move the primary file, byte for byte, into the quarantine directory as
    /// `<unix_millis>_<file_name>`. Returns the quarantine path.
    pub fn quarantine(&self) -> Result<PathBuf, FileManagerError> {
        create_restricted_dir_all(&self.paths.quarantine_dir)?;

        let stem = format!("{}_{}", Utc::now().timestamp_millis(), self.paths.file_name);
        let mut target = self.paths.quarantine_dir.join(&stem);
        let mut n = 1;
        while target.exists() {
            target = self.paths.quarantine_dir.join(format!("{}_{}", stem, n));
            n += 1;
        }

        fs::rename(&self.paths.primary, &target)?;
        tracing::warn!(
            from = %self.paths.primary.display(),
            to = %target.display(),
            "quarantined corrupted store file"
        );
        Ok(target)
    }
}

/// Create `path` and its parents, owner-only on Unix.
pub(crate) fn create_restricted_dir_all(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(path)
    }
}

/// Create a new file that is owner read/write only on Unix from the moment it exists.
fn create_restricted_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Best-effort: the rename already happened, a failed directory fsync only
/// weakens durability of the directory entry.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> StoreFileManager {
        let paths = StorePaths::new(dir.path(), StoreCategory::Settings, "settings_store");
        StoreFileManager::new(paths, true)
    }

    fn frame(text: &str) -> Vec<u8> {
        Envelope::new("Text", text.as_bytes().to_vec())
            .to_bytes()
            .unwrap()
    }

    fn read_text(mgr: &StoreFileManager) -> Option<String> {
        mgr.read()
            .unwrap()
            .map(|env| String::from_utf8(env.payload).unwrap())
    }

    fn quarantined(mgr: &StoreFileManager) -> Vec<PathBuf> {
        match fs::read_dir(&mgr.paths().quarantine_dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn paths_follow_layout() {
        let paths = StorePaths::new(Path::new("/data"), StoreCategory::NetworkDb, "peers");
        assert_eq!(paths.primary, PathBuf::from("/data/db/network_db/peers.envelope"));
        assert_eq!(paths.backup, PathBuf::from("/data/db/network_db/backup/peers.envelope"));
        assert_eq!(paths.temp, PathBuf::from("/data/db/network_db/temp_peers.envelope"));
        assert_eq!(
            paths.quarantine_dir,
            PathBuf::from("/data/db/network_db/corruptedFilesAtRead")
        );
        assert_eq!(paths, StorePaths::new(Path::new("/data"), StoreCategory::NetworkDb, "peers"));
    }

    #[test]
    fn read_without_files_is_empty() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        assert!(mgr.read().unwrap().is_none());
        assert!(!mgr.paths().dir.exists());
    }

    #[test]
    fn first_write_creates_primary_without_backup() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        mgr.write(&frame("one")).unwrap();

        assert!(mgr.paths().primary.exists());
        assert!(!mgr.paths().backup.exists());
        assert!(!mgr.paths().temp.exists());
        assert_eq!(read_text(&mgr).as_deref(), Some("one"));
    }

    #[test]
    fn backup_holds_previous_generation() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        for text in ["one", "two", "three"] {
            mgr.write(&frame(text)).unwrap();
        }

        let backup = fs::read(&mgr.paths().backup).unwrap();
        assert_eq!(backup, frame("two"));
        assert_eq!(read_text(&mgr).as_deref(), Some("three"));
        assert!(!mgr.paths().temp.exists());
    }

    #[test]
    fn missing_primary_is_restored_from_backup() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.write(&frame("old")).unwrap();
        mgr.write(&frame("new")).unwrap();

        fs::remove_file(&mgr.paths().primary).unwrap();

        assert_eq!(read_text(&mgr).as_deref(), Some("old"));
        assert!(mgr.paths().primary.exists());
        assert_eq!(fs::read(&mgr.paths().primary).unwrap(), frame("old"));
    }

    #[test]
    fn corrupted_primary_is_quarantined_verbatim() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.write(&frame("valid")).unwrap();

        fs::write(&mgr.paths().primary, [7u8, 1, 9]).unwrap();

        assert!(mgr.read().unwrap().is_none());
        assert!(!mgr.paths().primary.exists());

        let files = quarantined(&mgr);
        assert_eq!(files.len(), 1);
        assert_eq!(fs::read(&files[0]).unwrap(), vec![7u8, 1, 9]);
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_settings_store"), "unexpected name {}", name);
    }

    #[test]
    fn quarantine_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        for garbage in [b"aaa", b"bbb"] {
            fs::create_dir_all(&mgr.paths().dir).unwrap();
            fs::write(&mgr.paths().primary, garbage).unwrap();
            mgr.quarantine().unwrap();
        }

        let mut contents: Vec<Vec<u8>> = quarantined(&mgr)
            .iter()
            .map(|p| fs::read(p).unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, vec![b"aaa".to_vec(), b"bbb".to_vec()]);
    }

    #[test]
    fn failed_temp_write_leaves_committed_files_untouched() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.write(&frame("one")).unwrap();
        mgr.write(&frame("two")).unwrap();

        // A directory squatting on the temp path makes File::create fail
        fs::create_dir_all(&mgr.paths().temp).unwrap();

        assert!(mgr.write(&frame("three")).is_err());
        assert_eq!(read_text(&mgr).as_deref(), Some("two"));
        assert_eq!(fs::read(&mgr.paths().backup).unwrap(), frame("one"));
    }

    #[cfg(unix)]
    #[test]
    fn store_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.write(&frame("secret")).unwrap();

        let mode = fs::metadata(&mgr.paths().primary).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn stale_world_readable_temp_does_not_leak_its_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        fs::create_dir_all(&mgr.paths().dir).unwrap();
        fs::write(&mgr.paths().temp, b"left over from a crash").unwrap();
        fs::set_permissions(&mgr.paths().temp, fs::Permissions::from_mode(0o644)).unwrap();

        mgr.write(&frame("fresh")).unwrap();

        let mode = fs::metadata(&mgr.paths().primary).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(read_text(&mgr).as_deref(), Some("fresh"));
        assert!(!mgr.paths().temp.exists());
    }
}
