/**
 * band.rs
 * Environment types and their port bands
 *
 * Every environment type owns a fixed, non-overlapping band of TCP ports:
 * - test:    3100-3199
 * - theme:   3200-3299
 * - demo:    3300-3399
 * - release: 3456 (singleton, no service range)
 * - epic:    3500-3599
 *
 * The base port of a band is where portal allocation starts. For release
 * it is the only valid port.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::{EnvPortError, Result};

/// Closed set of environment types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    Release,
    Test,
    Theme,
    Demo,
    Epic,
}

impl EnvironmentType {
    pub const ALL: [EnvironmentType; 5] = [
        EnvironmentType::Release,
        EnvironmentType::Test,
        EnvironmentType::Theme,
        EnvironmentType::Demo,
        EnvironmentType::Epic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Release => "release",
            EnvironmentType::Test => "test",
            EnvironmentType::Theme => "theme",
            EnvironmentType::Demo => "demo",
            EnvironmentType::Epic => "epic",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentType {
    type Err = EnvPortError;

    fn from_str(s: &str) -> Result<Self> {
        EnvironmentType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EnvPortError::InvalidEnvironmentType(s.to_string()))
    }
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Check if port is within this range
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// A range whose start lies above its end holds no ports
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Number of ports in the range
    pub fn len(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            u32::from(self.end) - u32::from(self.start) + 1
        }
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Port band for one environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBand {
    pub base_port: u16,
    pub range_start: u16,
    pub range_end: u16,
}

impl PortBand {
    pub const fn new(base_port: u16, range_start: u16, range_end: u16) -> Self {
        PortBand {
            base_port,
            range_start,
            range_end,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.range_start && port <= self.range_end
    }

    /// Total number of ports in the band
    pub fn total(&self) -> u32 {
        self.range().len()
    }

    pub fn range(&self) -> PortRange {
        PortRange {
            start: self.range_start,
            end: self.range_end,
        }
    }

    fn overlaps(&self, other: &PortBand) -> bool {
        self.range_start <= other.range_end && other.range_start <= self.range_end
    }
}

pub const RELEASE_BAND: PortBand = PortBand::new(3456, 3456, 3456);
pub const TEST_BAND: PortBand = PortBand::new(3100, 3100, 3199);
pub const THEME_BAND: PortBand = PortBand::new(3200, 3200, 3299);
pub const DEMO_BAND: PortBand = PortBand::new(3300, 3300, 3399);
pub const EPIC_BAND: PortBand = PortBand::new(3500, 3500, 3599);

/// Validated band table, one band per environment type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBands {
    bands: [PortBand; 5],
}

impl Default for PortBands {
    fn default() -> Self {
        PortBands {
            bands: [RELEASE_BAND, TEST_BAND, THEME_BAND, DEMO_BAND, EPIC_BAND],
        }
    }
}

impl PortBands {
    /// Build a band table from the defaults with per-type overrides applied
    ///
    /// # Errors
    /// Returns `ValidationError` if a band is malformed, two bands overlap,
    /// or the release band is not a singleton.
    pub fn with_overrides(overrides: &BTreeMap<EnvironmentType, PortBand>) -> Result<Self> {
        let mut table = PortBands::default();
        for (env_type, band) in overrides {
            table.bands[env_type.index()] = *band;
        }
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<()> {
        for env_type in EnvironmentType::ALL {
            let band = self.get(env_type);
            if band.range_start > band.range_end {
                return Err(EnvPortError::ValidationError(format!(
                    "{} band is empty: {}-{}",
                    env_type, band.range_start, band.range_end
                )));
            }
            if !band.contains(band.base_port) {
                return Err(EnvPortError::ValidationError(format!(
                    "{} base port {} lies outside {}",
                    env_type,
                    band.base_port,
                    band.range()
                )));
            }
        }

        let release = self.get(EnvironmentType::Release);
        if release.range_start != release.range_end {
            return Err(EnvPortError::ValidationError(format!(
                "release band must be a single port, got {}",
                release.range()
            )));
        }

        for (i, a) in EnvironmentType::ALL.iter().enumerate() {
            for b in &EnvironmentType::ALL[i + 1..] {
                if self.get(*a).overlaps(&self.get(*b)) {
                    return Err(EnvPortError::ValidationError(format!(
                        "{} band {} overlaps {} band {}",
                        a,
                        self.get(*a).range(),
                        b,
                        self.get(*b).range()
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn get(&self, env_type: EnvironmentType) -> PortBand {
        self.bands[env_type.index()]
    }

    /// Find the environment type whose band contains `port`
    pub fn type_for_port(&self, port: u16) -> Option<EnvironmentType> {
        EnvironmentType::ALL
            .into_iter()
            .find(|t| self.get(*t).contains(port))
    }

    pub fn iter(&self) -> impl Iterator<Item = (EnvironmentType, PortBand)> + '_ {
        EnvironmentType::ALL.into_iter().map(move |t| (t, self.get(t)))
    }
}
