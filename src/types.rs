use anyhow::{anyhow, Result};
use geo::MultiPolygon;
use std::fmt;
use std::str::FromStr;

/// Every region offered by the "all" selection, in load order.
pub const REGION_IDS: [&str; 50] = [
    "alabama",
    "alaska",
    "arizona",
    "arkansas",
    "california",
    "colorado",
    "connecticut",
    "delaware",
    "florida",
    "georgia",
    "hawaii",
    "idaho",
    "illinois",
    "indiana",
    "iowa",
    "kansas",
    "kentucky",
    "louisiana",
    "maine",
    "maryland",
    "massachusetts",
    "michigan",
    "minnesota",
    "mississippi",
    "missouri",
    "montana",
    "nebraska",
    "nevada",
    "new hampshire",
    "new jersey",
    "new mexico",
    "new york",
    "north carolina",
    "north dakota",
    "ohio",
    "oklahoma",
    "oregon",
    "pennsylvania",
    "rhode island",
    "south carolina",
    "south dakota",
    "tennessee",
    "texas",
    "utah",
    "vermont",
    "virginia",
    "washington",
    "west virginia",
    "wisconsin",
    "wyoming",
];

pub const ALL_SENTINEL: &str = "all";

/// Ownership rates for one region, as percentages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OwnershipRecord {
    pub total: f64,
    pub dog: f64,
    pub cat: f64,
}

/// One named shape out of a region document.
#[derive(Debug, Clone)]
pub struct RegionFeature {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Region(String),
}

impl Selection {
    pub fn region_ids(&self) -> Vec<&str> {
        match self {
            Selection::All => REGION_IDS.to_vec(),
            Selection::Region(id) => vec![id.as_str()],
        }
    }

    /// The selection control's options: the sentinel, then one per region.
    pub fn options() -> Vec<String> {
        std::iter::once(ALL_SENTINEL)
            .chain(REGION_IDS)
            .map(str::to_string)
            .collect()
    }
}

impl FromStr for Selection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase();
        if key == ALL_SENTINEL {
            return Ok(Selection::All);
        }
        REGION_IDS
            .iter()
            .find(|id| **id == key)
            .map(|id| Selection::Region(id.to_string()))
            .ok_or_else(|| anyhow!("Unknown region '{}'", s))
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => f.write_str(ALL_SENTINEL),
            Selection::Region(id) => f.write_str(id),
        }
    }
}

pub fn region_file_name(region_id: &str) -> String {
    format!("{}.geojson", region_id)
}
