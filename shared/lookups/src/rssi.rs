//! RSSI interpolation map: whitespace-separated `raw dbm` pairs with `#`
//! comments. Raw ADC readings between two map points interpolate linearly.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::table::{ReloadingTable, TableSource};
use crate::{LookupError, LookupResult};

#[derive(Default)]
pub struct RssiMapBody {
    points: BTreeMap<u16, i32>,
}

impl TableSource for RssiMapBody {
    fn parse(contents: &str) -> LookupResult<Self> {
        let mut points = BTreeMap::new();
        for (no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let raw = fields
                .next()
                .and_then(|f| f.parse::<u16>().ok())
                .ok_or_else(|| LookupError::Parse(format!("bad raw value on line {}", no + 1)))?;
            let dbm = fields
                .next()
                .and_then(|f| f.parse::<i32>().ok())
                .ok_or_else(|| LookupError::Parse(format!("bad dBm value on line {}", no + 1)))?;

            points.insert(raw, dbm);
        }
        Ok(Self { points })
    }

    fn serialize(&self) -> LookupResult<String> {
        let mut out = String::new();
        for (raw, dbm) in &self.points {
            let _ = writeln!(out, "{raw} {dbm}");
        }
        Ok(out)
    }
}

pub struct RssiInterpolator {
    table: ReloadingTable<RssiMapBody>,
}

impl RssiInterpolator {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        // RSSI maps are calibration data and never hot-reload
        Self {
            table: ReloadingTable::new(path, 0),
        }
    }

    pub fn read(&mut self) -> LookupResult<()> {
        self.table.read()
    }

    /// Maps a raw ADC reading to dBm, interpolating between neighboring
    /// calibration points and clamping beyond the ends.
    pub fn interpolate(&self, raw: u16) -> Option<i32> {
        self.table.with(|t| {
            if t.points.is_empty() {
                return None;
            }

            if let Some(&exact) = t.points.get(&raw) {
                return Some(exact);
            }

            let below = t.points.range(..raw).next_back();
            let above = t.points.range(raw..).next();

            match (below, above) {
                (Some((&x0, &y0)), Some((&x1, &y1))) => {
                    let span = i64::from(x1) - i64::from(x0);
                    let offset = i64::from(raw) - i64::from(x0);
                    Some((i64::from(y0) + (i64::from(y1) - i64::from(y0)) * offset / span) as i32)
                }
                (Some((_, &y)), None) | (None, Some((_, &y))) => Some(y),
                (None, None) => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn interpolates_between_points() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"# raw  dbm\n0 -120\n100 -100\n200 -60\n").unwrap();

        let mut map = RssiInterpolator::new(file.path());
        map.read().unwrap();

        assert_eq!(map.interpolate(0), Some(-120));
        assert_eq!(map.interpolate(50), Some(-110));
        assert_eq!(map.interpolate(150), Some(-80));
        assert_eq!(map.interpolate(200), Some(-60));
        // clamped beyond the ends
        assert_eq!(map.interpolate(500), Some(-60));
    }

    #[test]
    fn empty_map_yields_nothing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"# nothing here\n").unwrap();

        let mut map = RssiInterpolator::new(file.path());
        map.read().unwrap();
        assert_eq!(map.interpolate(42), None);
    }
}
