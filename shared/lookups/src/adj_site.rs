//! Adjacent peer map: per-peer allowed adjacency for site broadcast
//! routing, persisted as YAML.

use serde::{Deserialize, Serialize};

use crate::table::{ReloadingTable, TableSource};
use crate::{LookupError, LookupResult};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjSiteEntry {
    #[serde(default)]
    pub active: bool,
    #[serde(rename = "peerid")]
    pub peer_id: u32,
    #[serde(default)]
    pub neighbors: Vec<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdjSiteMapBody {
    #[serde(rename = "adjSites", default)]
    pub sites: Vec<AdjSiteEntry>,
}

impl TableSource for AdjSiteMapBody {
    fn parse(contents: &str) -> LookupResult<Self> {
        serde_yaml::from_str(contents).map_err(|e| LookupError::Parse(e.to_string()))
    }

    fn serialize(&self) -> LookupResult<String> {
        serde_yaml::to_string(self).map_err(|e| LookupError::Parse(e.to_string()))
    }
}

pub struct AdjSiteMapLookup {
    table: ReloadingTable<AdjSiteMapBody>,
}

impl AdjSiteMapLookup {
    pub fn new(path: impl Into<std::path::PathBuf>, reload_minutes: u32) -> Self {
        Self {
            table: ReloadingTable::new(path, reload_minutes),
        }
    }

    pub fn read(&mut self) -> LookupResult<()> {
        self.table.read()
    }

    pub fn reload(&self) -> LookupResult<()> {
        self.table.reload()
    }

    pub fn commit(&self) -> LookupResult<()> {
        self.table.commit()
    }

    pub fn stop(&mut self) {
        self.table.stop()
    }

    pub fn find(&self, peer_id: u32) -> Option<AdjSiteEntry> {
        self.table.with(|t| {
            t.sites.iter().find(|s| s.peer_id == peer_id).cloned()
        })
    }

    /// Whether `neighbor` may receive site broadcasts originated by `peer`.
    pub fn is_neighbor(&self, peer_id: u32, neighbor: u32) -> bool {
        self.find(peer_id)
            .map(|entry| entry.active && entry.neighbors.contains(&neighbor))
            .unwrap_or(false)
    }

    pub fn add_entry(&self, entry: AdjSiteEntry) {
        self.table.with_mut(|t| {
            match t.sites.iter_mut().find(|s| s.peer_id == entry.peer_id) {
                Some(existing) => *existing = entry,
                None => t.sites.push(entry),
            }
        });
    }

    pub fn erase_entry(&self, peer_id: u32) {
        self.table.with_mut(|t| {
            t.sites.retain(|s| s.peer_id != peer_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn neighbor_checks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"adjSites:\n  - active: true\n    peerid: 10\n    neighbors: [20, 30]\n  - active: false\n    peerid: 40\n    neighbors: [10]\n",
        )
        .unwrap();

        let mut lookup = AdjSiteMapLookup::new(file.path(), 0);
        lookup.read().unwrap();

        assert!(lookup.is_neighbor(10, 20));
        assert!(!lookup.is_neighbor(10, 40));
        // inactive entries never match
        assert!(!lookup.is_neighbor(40, 10));
        assert!(!lookup.is_neighbor(99, 10));
    }
}
