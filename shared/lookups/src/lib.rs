//! Hot-reloading lookup tables (radio ACL, talkgroup rules, adjacent site
//! map, RSSI interpolation) and the affiliation + channel-grant engine.

pub mod affiliation;
pub mod adj_site;
pub mod radio_id;
pub mod rssi;
pub mod table;
pub mod talkgroup_rules;

use thiserror::Error;

pub type LookupResult<T> = Result<T, LookupError>;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("round-trip validation failed while saving {0}")]
    SaveValidation(String),
}
