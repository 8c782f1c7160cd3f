//! Radio ID access control list. Line-oriented CSV `id, enabled[, slot]`
//! with `#` comments. Radios absent from the list are synthesized as
//! default entries, a third state distinct from enabled/disabled: the ACL
//! mode decides whether unknown radios pass.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::table::{ReloadingTable, TableSource};
use crate::{LookupError, LookupResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RadioId {
    pub enabled: bool,
    pub default: bool,
}

impl RadioId {
    pub fn default_entry() -> Self {
        Self { enabled: false, default: true }
    }
}

#[derive(Default)]
pub struct RadioIdTableBody {
    entries: HashMap<u32, RadioId>,
}

impl TableSource for RadioIdTableBody {
    fn parse(contents: &str) -> LookupResult<Self> {
        let mut entries = HashMap::new();
        for (no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split(',').map(str::trim);
            let id = fields
                .next()
                .and_then(|f| f.parse::<u32>().ok())
                .ok_or_else(|| LookupError::Parse(format!("bad radio id on line {}", no + 1)))?;
            let enabled = fields
                .next()
                .map(|f| matches!(f, "1" | "true" | "TRUE"))
                .unwrap_or(true);

            entries.insert(id, RadioId { enabled, default: false });
        }
        Ok(Self { entries })
    }

    fn serialize(&self) -> LookupResult<String> {
        let mut ids: Vec<_> = self.entries.iter().collect();
        ids.sort_by_key(|(id, _)| **id);

        let mut out = String::new();
        for (id, entry) in ids {
            let _ = writeln!(out, "{},{}", id, if entry.enabled { 1 } else { 0 });
        }
        Ok(out)
    }
}

pub struct RadioIdLookup {
    table: ReloadingTable<RadioIdTableBody>,
    /// When true, radios must be present and enabled; when false, unknown
    /// radios are allowed through.
    acl: bool,
}

impl RadioIdLookup {
    pub fn new(path: impl Into<std::path::PathBuf>, reload_minutes: u32, acl: bool) -> Self {
        Self {
            table: ReloadingTable::new(path, reload_minutes),
            acl,
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

    /// Finds the entry for `id`, synthesizing a default entry for unknown
    /// radios.
    pub fn find(&self, id: u32) -> RadioId {
        self.table
            .with(|t| t.entries.get(&id).copied())
            .unwrap_or_else(RadioId::default_entry)
    }

    /// The ACL decision: `enabled` only gates radios present in the list;
    /// absent radios pass unless ACL mode is strict.
    pub fn check(&self, id: u32) -> bool {
        let entry = self.find(id);
        if entry.default {
            !self.acl
        } else {
            entry.enabled
        }
    }

    pub fn add_entry(&self, id: u32, enabled: bool) {
        self.table.with_mut(|t| {
            t.entries.insert(id, RadioId { enabled, default: false });
        });
    }

    pub fn erase_entry(&self, id: u32) {
        self.table.with_mut(|t| {
            t.entries.remove(&id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup_from(content: &str, acl: bool) -> (tempfile::NamedTempFile, RadioIdLookup) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let mut lookup = RadioIdLookup::new(file.path(), 0, acl);
        lookup.read().unwrap();
        (file, lookup)
    }

    #[test]
    fn tri_state_acl_decision() {
        let (_file, lookup) = lookup_from("# fleet\n100,1\n200,0\n", true);

        assert!(lookup.check(100));
        assert!(!lookup.check(200));
        // unknown radio with strict ACL
        assert!(!lookup.check(300));
        assert!(lookup.find(300).default);

        let (_file, open) = lookup_from("100,1\n200,0\n", false);
        // unknown radio with permissive ACL
        assert!(open.check(300));
        // explicitly disabled radios stay denied either way
        assert!(!open.check(200));
    }

    #[test]
    fn save_load_idempotence() {
        let (file, lookup) = lookup_from("300,1\n100,1\n200,0\n", true);
        lookup.commit().unwrap();

        let mut reloaded = RadioIdLookup::new(file.path(), 0, true);
        reloaded.read().unwrap();
        assert!(reloaded.check(100));
        assert!(!reloaded.check(200));
        assert!(reloaded.check(300));
    }

    #[test]
    fn entry_management() {
        let (_file, lookup) = lookup_from("", true);
        lookup.add_entry(42, true);
        assert!(lookup.check(42));
        lookup.erase_entry(42);
        assert!(!lookup.check(42));
    }
}
