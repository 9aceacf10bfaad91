//! Detector configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result};

/// Default number of shadow table shards.
pub const DEFAULT_SHADOW_SHARDS: usize = 256;
/// Default number of call-stack frames kept in a race report.
pub const DEFAULT_MAX_STACK_DEPTH: usize = 31;
/// Default detector name.
pub const DEFAULT_NAME: &str = "racetrack";
/// Widest access checked byte by byte under [`Granularity::Byte`].
/// Larger accesses only check their first `MAX_ACCESS_WIDTH` bytes.
pub const MAX_ACCESS_WIDTH: usize = 64;

/// How multi-byte accesses map onto shadow cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Granularity {
    /// One shadow cell per access start address; the size is only reported.
    #[default]
    Address,
    /// One shadow cell per byte covered by the access, up to
    /// [`MAX_ACCESS_WIDTH`] bytes.
    Byte,
}

impl Granularity {
    /// Shadow cells touched by an access of `size` bytes at `addr`.
    #[must_use]
    pub fn cells(self, addr: u64, size: usize) -> std::ops::Range<u64> {
        match self {
            Self::Address => addr..addr.saturating_add(1),
            Self::Byte => {
                let len = u64::try_from(size.clamp(1, MAX_ACCESS_WIDTH)).unwrap_or(1);
                addr..addr.saturating_add(len)
            }
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "address" | "addr" => Ok(Self::Address),
            "byte" => Ok(Self::Byte),
            other => Err(format!("expected `address` or `byte`, got `{other}`")),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Address => "address",
            Self::Byte => "byte",
        })
    }
}

/// Detector configuration.
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Identifying name (`detector-name`).
    pub name: String,
    /// Where warnings and the final summary are written (`output-path`).
    pub output_path: Option<PathBuf>,
    /// Maximum number of frames carried in a race report (innermost kept).
    pub max_stack_depth: usize,
    /// Number of shadow table shards. Rounded up to a power of two.
    pub shadow_shards: usize,
    /// Upper bound on tracked memory locations; `None` is unbounded.
    pub max_shadow_entries: Option<usize>,
    /// Shadow cell granularity.
    pub granularity: Granularity,
    /// Count rule hits for the final summary.
    pub collect_stats: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            output_path: None,
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            shadow_shards: DEFAULT_SHADOW_SHARDS,
            max_shadow_entries: None,
            granularity: Granularity::Address,
            collect_stats: false,
        }
    }
}

impl DetectorConfig {
    /// Parse `key=value` options.
    ///
    /// Recognized keys: `detector-name`, `output-path`, `max-stack-depth`,
    /// `shadow-shards`, `max-shadow-entries`, `granularity`, `stats`.
    /// The bare flag `--stats` is accepted as `stats=true`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOption`] for unknown keys or unparsable values.
    pub fn from_options<I, S>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for option in options {
            let option = option.as_ref().trim();
            if option.is_empty() {
                continue;
            }
            if option == "--stats" {
                config.collect_stats = true;
                continue;
            }
            let (key, value) = option
                .trim_start_matches("--")
                .split_once('=')
                .ok_or_else(|| invalid(option, "expected `key=value`"))?;
            config.set(key.trim(), value.trim())?;
        }
        Ok(config)
    }

    /// Apply a single option.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOption`] for unknown keys or unparsable values.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "detector-name" | "name" => self.name = value.to_string(),
            "output-path" | "output" => {
                self.output_path = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "max-stack-depth" => self.max_stack_depth = parse_num(key, value)?,
            "shadow-shards" => {
                let shards: usize = parse_num(key, value)?;
                if shards == 0 {
                    return Err(invalid(key, "must be at least 1"));
                }
                self.shadow_shards = shards;
            }
            "max-shadow-entries" => {
                self.max_shadow_entries = match value {
                    "" | "none" | "unbounded" => None,
                    v => Some(parse_num(key, v)?),
                };
            }
            "granularity" => {
                self.granularity = value.parse().map_err(|e: String| invalid(key, &e))?;
            }
            "stats" => {
                self.collect_stats = match value {
                    "true" | "1" | "yes" | "on" => true,
                    "false" | "0" | "no" | "off" => false,
                    _ => return Err(invalid(key, "expected a boolean")),
                };
            }
            _ => return Err(invalid(key, "unknown option")),
        }
        Ok(())
    }

    /// Set the detector name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the diagnostics output path.
    #[must_use]
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Set the maximum reported stack depth.
    #[must_use]
    pub const fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    /// Set the number of shadow shards.
    #[must_use]
    pub const fn with_shadow_shards(mut self, shards: usize) -> Self {
        self.shadow_shards = shards;
        self
    }

    /// Bound the number of tracked memory locations.
    #[must_use]
    pub const fn with_max_shadow_entries(mut self, max: Option<usize>) -> Self {
        self.max_shadow_entries = max;
        self
    }

    /// Set the shadow cell granularity.
    #[must_use]
    pub const fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Enable or disable rule-hit statistics.
    #[must_use]
    pub const fn with_stats(mut self, enabled: bool) -> Self {
        self.collect_stats = enabled;
        self
    }

    /// Shard count actually used (power of two, at least one).
    #[must_use]
    pub fn effective_shards(&self) -> usize {
        self.shadow_shards.max(1).next_power_of_two()
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(key, &format!("`{value}` is not a valid number")))
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::InvalidOption {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.name, "racetrack");
        assert_eq!(config.granularity, Granularity::Address);
        assert!(config.output_path.is_none());
        assert!(config.max_shadow_entries.is_none());
        assert!(!config.collect_stats);
    }

    #[test]
    fn test_from_options() {
        let config = DetectorConfig::from_options([
            "detector-name=fasttrack",
            "output-path=/tmp/races.log",
            "granularity=byte",
            "max-shadow-entries=1024",
            "--stats",
        ])
        .unwrap();
        assert_eq!(config.name, "fasttrack");
        assert_eq!(config.output_path, Some(PathBuf::from("/tmp/races.log")));
        assert_eq!(config.granularity, Granularity::Byte);
        assert_eq!(config.max_shadow_entries, Some(1024));
        assert!(config.collect_stats);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = DetectorConfig::from_options(["colour=blue"]).unwrap_err();
        assert!(matches!(err, Error::InvalidOption { ref key, .. } if key == "colour"));
    }

    #[test]
    fn test_bad_value_rejected() {
        assert!(DetectorConfig::from_options(["shadow-shards=0"]).is_err());
        assert!(DetectorConfig::from_options(["max-stack-depth=deep"]).is_err());
        assert!(DetectorConfig::from_options(["granularity=word"]).is_err());
        assert!(DetectorConfig::from_options(["stats"]).is_err());
    }

    #[test]
    fn test_effective_shards() {
        assert_eq!(DetectorConfig::default().with_shadow_shards(100).effective_shards(), 128);
        assert_eq!(DetectorConfig::default().with_shadow_shards(0).effective_shards(), 1);
    }

    #[test]
    fn test_granularity_cells() {
        assert_eq!(Granularity::Address.cells(0x1000, 8), 0x1000..0x1001);
        assert_eq!(Granularity::Byte.cells(0x1000, 4), 0x1000..0x1004);
        assert_eq!(Granularity::Byte.cells(0x1000, 0), 0x1000..0x1001);
    }

    #[test]
    fn test_byte_granularity_caps_wide_accesses() {
        let cells = Granularity::Byte.cells(0x10, 0xFFFF_FFFF_FFFF);
        assert_eq!(cells, 0x10..0x10 + MAX_ACCESS_WIDTH as u64);
        assert_eq!(Granularity::Byte.cells(u64::MAX - 2, 8), u64::MAX - 2..u64::MAX);
    }
}
