// ABOUTME: Directory taxonomy partitioning stores by purpose and sensitivity.
// ABOUTME: Each category maps to one fixed subdirectory under <base>/db/.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where a store lives on disk, chosen by the owning module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreCategory {
    /// Data replicated from the peer-to-peer network.
    NetworkDb,
    /// Rebuildable caches.
    Cache,
    Settings,
    /// User-private data (identities, keys, trades).
    Private,
}

impl StoreCategory {
    pub const ALL: [StoreCategory; 4] = [
        StoreCategory::NetworkDb,
        StoreCategory::Cache,
        StoreCategory::Settings,
        StoreCategory::Private,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            StoreCategory::NetworkDb => "network_db",
            StoreCategory::Cache => "cache",
            StoreCategory::Settings => "settings",
            StoreCategory::Private => "private",
        }
    }
}

impl fmt::Display for StoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for StoreCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreCategory::ALL
            .into_iter()
            .find(|c| c.dir_name() == s)
            .ok_or_else(|| format!("unknown store category: {}", s))
    }
}
