// ABOUTME: Read-only scan of the <base>/db/ tree reporting what each category holds on disk.
// ABOUTME: Counts committed stores, backups, stale temp files and quarantined files per category.

use std::fs;
use std::io;
use std::path::Path;

use strongbox_core::StoreCategory;

use crate::file_manager::{BACKUP_DIR, DB_DIR, EXTENSION, QUARANTINE_DIR, TEMP_PREFIX};

/// Contents of one category directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryLayout {
    pub category: StoreCategory,
    /// File names (without extension) of committed primary store files, sorted.
    pub stores: Vec<String>,
    pub backups: usize,
    /// Temp files left behind by a write that never committed.
    pub stale_temps: usize,
    pub quarantined: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayoutSummary {
    pub categories: Vec<CategoryLayout>,
}

impl LayoutSummary {
    pub fn store_count(&self) -> usize {
        self.categories.iter().map(|c| c.stores.len()).sum()
    }

    pub fn quarantined_count(&self) -> usize {
        self.categories.iter().map(|c| c.quarantined).sum()
    }
}

/// Scan every category under `<base_dir>/db/`. Categories with no directory are omitted.
pub fn scan_layout(base_dir: &Path) -> io::Result<LayoutSummary> {
    let db_dir = base_dir.join(DB_DIR);
    let mut categories = Vec::new();

    for category in StoreCategory::ALL {
        let dir = db_dir.join(category.dir_name());
        if !dir.is_dir() {
            continue;
        }

        let mut layout = CategoryLayout {
            category,
            stores: Vec::new(),
            backups: count_files(&dir.join(BACKUP_DIR))?,
            stale_temps: 0,
            quarantined: count_files(&dir.join(QUARANTINE_DIR))?,
        };

        let suffix = format!(".{}", EXTENSION);
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            match name_str.strip_suffix(&suffix) {
                Some(stem) if stem.starts_with(TEMP_PREFIX) => layout.stale_temps += 1,
                Some(stem) => layout.stores.push(stem.to_string()),
                None => {
                    tracing::debug!(file = %name_str, "ignoring unrecognized file in store dir");
                }
            }
        }

        layout.stores.sort();
        categories.push(layout);
    }

    Ok(LayoutSummary { categories })
}

fn count_files(dir: &Path) -> io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        if entry?.file_type()?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_manager::{StoreFileManager, StorePaths};
    use strongbox_core::Envelope;
    use tempfile::TempDir;

    fn frame() -> Vec<u8> {
        Envelope::new("T", b"x".to_vec()).to_bytes().unwrap()
    }

    #[test]
    fn empty_base_dir_has_no_categories() {
        let dir = TempDir::new().unwrap();
        assert_eq!(scan_layout(dir.path()).unwrap(), LayoutSummary::default());
    }

    #[test]
    fn counts_stores_backups_temps_and_quarantine() {
        let dir = TempDir::new().unwrap();

        let settings = StoreFileManager::new(
            StorePaths::new(dir.path(), StoreCategory::Settings, "settings"),
            false,
        );
        settings.write(&frame()).unwrap();
        settings.write(&frame()).unwrap();

        let peers = StoreFileManager::new(
            StorePaths::new(dir.path(), StoreCategory::Cache, "peers"),
            false,
        );
        peers.write(&frame()).unwrap();
        fs::write(&peers.paths().temp, b"half").unwrap();

        let broken = StoreFileManager::new(
            StorePaths::new(dir.path(), StoreCategory::Cache, "broken"),
            false,
        );
        fs::write(&broken.paths().primary, b"bad").unwrap();
        assert!(broken.read().unwrap().is_none());

        let summary = scan_layout(dir.path()).unwrap();

        assert_eq!(summary.categories.len(), 2);
        let cache = &summary.categories[0];
        assert_eq!(cache.category, StoreCategory::Cache);
        assert_eq!(cache.stores, vec!["peers".to_string()]);
        assert_eq!(cache.stale_temps, 1);
        assert_eq!(cache.quarantined, 1);

        let settings_layout = &summary.categories[1];
        assert_eq!(settings_layout.category, StoreCategory::Settings);
        assert_eq!(settings_layout.stores, vec!["settings".to_string()]);
        assert_eq!(settings_layout.backups, 1);

        assert_eq!(summary.store_count(), 2);
        assert_eq!(summary.quarantined_count(), 1);
    }
}
