//! Talkgroup routing rules, persisted as YAML. Keyed by talkgroup id and
//! (for DMR) slot; slot 0 matches any slot. A secondary lookup scans the
//! per-peer rewrite lists.

use serde::{Deserialize, Serialize};

use crate::table::{ReloadingTable, TableSource};
use crate::{LookupError, LookupResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkgroupRuleSource {
    #[serde(rename = "tgid")]
    pub tg_id: u32,
    #[serde(rename = "slot")]
    pub tg_slot: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkgroupRuleRewrite {
    #[serde(rename = "peerid")]
    pub peer_id: u32,
    #[serde(rename = "tgid")]
    pub tg_id: u32,
    #[serde(rename = "slot")]
    pub tg_slot: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkgroupRuleConfig {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub affiliated: bool,
    #[serde(default)]
    pub parrot: bool,
    #[serde(default)]
    pub inclusion: Vec<u32>,
    #[serde(default)]
    pub exclusion: Vec<u32>,
    #[serde(default)]
    pub rewrite: Vec<TalkgroupRuleRewrite>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkgroupRuleGroupVoice {
    pub name: String,
    pub source: TalkgroupRuleSource,
    pub config: TalkgroupRuleConfig,
}

impl TalkgroupRuleGroupVoice {
    /// The sentinel returned when no rule matches.
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_invalid(&self) -> bool {
        self.source.tg_id == 0
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TalkgroupRulesBody {
    #[serde(rename = "groupHangTime", default)]
    pub group_hang_time: u32,
    #[serde(rename = "sendTalkgroups", default)]
    pub send_talkgroups: bool,
    #[serde(rename = "groupVoice", default)]
    pub group_voice: Vec<TalkgroupRuleGroupVoice>,
}

impl TableSource for TalkgroupRulesBody {
    fn parse(contents: &str) -> LookupResult<Self> {
        serde_yaml::from_str(contents).map_err(|e| LookupError::Parse(e.to_string()))
    }

    fn serialize(&self) -> LookupResult<String> {
        serde_yaml::to_string(self).map_err(|e| LookupError::Parse(e.to_string()))
    }
}

pub struct TalkgroupRulesLookup {
    table: ReloadingTable<TalkgroupRulesBody>,
    acl: bool,
}

impl TalkgroupRulesLookup {
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

    pub fn group_hang_time(&self) -> u32 {
        self.table.with(|t| t.group_hang_time)
    }

    pub fn send_talkgroups(&self) -> bool {
        self.table.with(|t| t.send_talkgroups)
    }

    /// Finds the rule for `(id, slot)`; slot 0 matches any slot. Returns
    /// the invalid sentinel when absent.
    pub fn find(&self, id: u32, slot: u8) -> TalkgroupRuleGroupVoice {
        self.table.with(|t| {
            t.group_voice
                .iter()
                .find(|rule| {
                    if slot != 0 {
                        rule.source.tg_id == id && rule.source.tg_slot == slot
                    } else {
                        rule.source.tg_id == id
                    }
                })
                .cloned()
                .unwrap_or_else(TalkgroupRuleGroupVoice::invalid)
        })
    }

    /// Scans every rule's rewrite list for `(peer, id, slot)`.
    pub fn find_by_rewrite(&self, peer_id: u32, id: u32, slot: u8) -> TalkgroupRuleGroupVoice {
        self.table.with(|t| {
            t.group_voice
                .iter()
                .find(|rule| {
                    rule.config.rewrite.iter().any(|rw| {
                        rw.peer_id == peer_id && rw.tg_id == id && (slot == 0 || rw.tg_slot == slot)
                    })
                })
                .cloned()
                .unwrap_or_else(TalkgroupRuleGroupVoice::invalid)
        })
    }

    /// ACL check used by the engines: rule must exist and be active (or
    /// ACL mode is off).
    pub fn check(&self, id: u32, slot: u8) -> bool {
        if !self.acl {
            return true;
        }
        let rule = self.find(id, slot);
        !rule.is_invalid() && rule.config.active
    }

    pub fn add_entry(&self, entry: TalkgroupRuleGroupVoice) {
        if entry.is_invalid() {
            return;
        }

        self.table.with_mut(|t| {
            let id = entry.source.tg_id;
            let slot = entry.source.tg_slot;
            let existing = t.group_voice.iter_mut().find(|rule| {
                if slot != 0 {
                    rule.source.tg_id == id && rule.source.tg_slot == slot
                } else {
                    rule.source.tg_id == id
                }
            });

            match existing {
                Some(rule) => *rule = entry,
                None => t.group_voice.push(entry),
            }
        });
    }

    pub fn erase_entry(&self, id: u32, slot: u8) {
        self.table.with_mut(|t| {
            t.group_voice
                .retain(|rule| !(rule.source.tg_id == id && rule.source.tg_slot == slot));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RULES: &str = r#"
groupHangTime: 5
sendTalkgroups: true
groupVoice:
  - name: "TG1"
    source:
      tgid: 10
      slot: 1
    config:
      active: true
      affiliated: false
      parrot: false
      inclusion: [1, 2, 3]
      exclusion: []
      rewrite: []
  - name: "Parrot"
    source:
      tgid: 9990
      slot: 2
    config:
      active: true
      parrot: true
      rewrite:
        - peerid: 7
          tgid: 9991
          slot: 1
"#;

    fn lookup() -> (tempfile::NamedTempFile, TalkgroupRulesLookup) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();
        let mut lookup = TalkgroupRulesLookup::new(file.path(), 0, true);
        lookup.read().unwrap();
        (file, lookup)
    }

    #[test]
    fn find_with_slot_wildcard() {
        let (_f, lookup) = lookup();

        let rule = lookup.find(10, 1);
        assert_eq!(rule.name, "TG1");
        assert_eq!(rule.config.inclusion, vec![1, 2, 3]);

        // slot 0 matches any slot
        assert_eq!(lookup.find(10, 0).name, "TG1");
        // wrong slot misses
        assert!(lookup.find(10, 2).is_invalid());
        assert!(lookup.find(11, 1).is_invalid());
    }

    #[test]
    fn rewrite_lookup() {
        let (_f, lookup) = lookup();

        let rule = lookup.find_by_rewrite(7, 9991, 1);
        assert_eq!(rule.name, "Parrot");
        assert!(rule.config.parrot);

        assert!(lookup.find_by_rewrite(8, 9991, 1).is_invalid());
    }

    #[test]
    fn load_save_load_is_equivalent() {
        let (file, lookup) = lookup();
        lookup.commit().unwrap();

        let mut reloaded = TalkgroupRulesLookup::new(file.path(), 0, true);
        reloaded.read().unwrap();

        assert_eq!(reloaded.group_hang_time(), 5);
        assert!(reloaded.send_talkgroups());
        let rule = reloaded.find(9990, 2);
        assert_eq!(rule.config.rewrite.len(), 1);
        assert_eq!(rule.config.rewrite[0].peer_id, 7);
    }

    #[test]
    fn hot_edit_then_check() {
        let (_f, lookup) = lookup();
        assert!(lookup.check(10, 1));

        lookup.erase_entry(10, 1);
        assert!(!lookup.check(10, 1));

        lookup.add_entry(TalkgroupRuleGroupVoice {
            name: "TG2".into(),
            source: TalkgroupRuleSource { tg_id: 20, tg_slot: 2 },
            config: TalkgroupRuleConfig { active: true, ..Default::default() },
        });
        assert!(lookup.check(20, 2));
        assert!(!lookup.check(20, 1));
    }
}
