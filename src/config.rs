//! Typed configuration profile.
//!
//! Profiles are TOML files with `[mapify]`, `[database]` and `[logs]`
//! sections. Every recognized option is a named field; unknown keys are
//! rejected at load time.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::MarkerColour;

/// Project name, used for default config and database file names.
pub const PROJECT_NAME: &str = "mapify";

/// Zoom used for the initial view when the map is later fitted to bounds.
pub const FIT_NOMINAL_ZOOM: u32 = 10;

// ============================================================================
// Focus Policy
// ============================================================================

/// Rule used to choose the map's initial centre.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FocusType {
    First,
    Last,
    Centre,
}

impl FromStr for FocusType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "first" => Ok(FocusType::First),
            "last" => Ok(FocusType::Last),
            "centre" => Ok(FocusType::Centre),
            other => Err(Error::Configuration(format!(
                "Invalid value for focus_type: '{}' (expected first, last or centre)",
                other
            ))),
        }
    }
}

impl fmt::Display for FocusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FocusType::First => "first",
            FocusType::Last => "last",
            FocusType::Centre => "centre",
        })
    }
}

/// Initial zoom level, or `Fit` to fit the viewport to all markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FocusSize {
    Zoom(u32),
    Fit,
}

impl FocusSize {
    /// Zoom passed to the map constructor.
    pub fn initial_zoom(self) -> u32 {
        match self {
            FocusSize::Zoom(z) => z,
            FocusSize::Fit => FIT_NOMINAL_ZOOM,
        }
    }

    fn from_int(value: i64) -> Result<Self> {
        if value > 1 && value <= u32::MAX as i64 {
            Ok(FocusSize::Zoom(value as u32))
        } else {
            Err(Error::Configuration(format!(
                "Invalid value for focus_size: {} (expected an integer above 1 or 'fit')",
                value
            )))
        }
    }
}

impl FromStr for FocusSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "fit" {
            return Ok(FocusSize::Fit);
        }
        match s.parse::<i64>() {
            Ok(v) => FocusSize::from_int(v),
            Err(_) => Err(Error::Configuration(format!(
                "Invalid value for focus_size: '{}' (expected an integer above 1 or 'fit')",
                s
            ))),
        }
    }
}

/// `focus_size` as written in TOML: either a bare integer or a string.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum RawFocusSize {
    Int(i64),
    Text(String),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawMapSection {
    group_threshold: f64,
    focus_type: String,
    focus_size: Option<RawFocusSize>,
    marker_colour: MarkerColour,
    marker_icon: String,
    marker_prefix: String,
    title: String,
    workers: usize,
    resolve_short_links: bool,
}

impl Default for RawMapSection {
    fn default() -> Self {
        Self {
            group_threshold: 0.01,
            focus_type: "centre".to_string(),
            focus_size: None,
            marker_colour: MarkerColour::Blue,
            marker_icon: "circle".to_string(),
            marker_prefix: "fa".to_string(),
            title: String::new(),
            workers: 10,
            resolve_short_links: false,
        }
    }
}

/// Map-building options (`[mapify]` section).
#[derive(Clone, Debug, PartialEq)]
pub struct MapConfig {
    /// Grouping distance in kilometres.
    pub group_threshold: f64,
    pub focus_type: FocusType,
    pub focus_size: FocusSize,
    pub marker_colour: MarkerColour,
    pub marker_icon: String,
    pub marker_prefix: String,
    pub title: String,
    /// Size of the enrichment worker pool.
    pub workers: usize,
    pub resolve_short_links: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            group_threshold: 0.01,
            focus_type: FocusType::Centre,
            focus_size: FocusSize::Zoom(50),
            marker_colour: MarkerColour::Blue,
            marker_icon: "circle".to_string(),
            marker_prefix: "fa".to_string(),
            title: String::new(),
            workers: 10,
            resolve_short_links: false,
        }
    }
}

impl TryFrom<RawMapSection> for MapConfig {
    type Error = Error;

    fn try_from(raw: RawMapSection) -> Result<Self> {
        if !(raw.group_threshold.is_finite() && raw.group_threshold > 0.0) {
            return Err(Error::Configuration(format!(
                "group_threshold must be a positive number of kilometres, got {}",
                raw.group_threshold
            )));
        }
        if raw.workers == 0 {
            return Err(Error::Configuration("workers must be at least 1".to_string()));
        }
        let focus_size = match raw.focus_size {
            None => FocusSize::Zoom(50),
            Some(RawFocusSize::Int(v)) => FocusSize::from_int(v)?,
            Some(RawFocusSize::Text(s)) => s.parse()?,
        };
        Ok(Self {
            group_threshold: raw.group_threshold,
            focus_type: raw.focus_type.parse()?,
            focus_size,
            marker_colour: raw.marker_colour,
            marker_icon: raw.marker_icon,
            marker_prefix: raw.marker_prefix,
            title: raw.title,
            workers: raw.workers,
            resolve_short_links: raw.resolve_short_links,
        })
    }
}

/// Relational store options (`[database]` section).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DatabaseConfig {
    /// Directory holding the database file.
    pub dir: PathBuf,
    /// Database name; the file is `<dir>/<name>.sqlite3`.
    pub name: String,
    /// Directory holding the versioned schema SQL files.
    pub schema_dir: PathBuf,
    /// How long to wait on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            name: PROJECT_NAME.to_string(),
            schema_dir: PathBuf::from("database"),
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.sqlite3", self.name))
    }
}

/// Logging options (`[logs]` section).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LogsConfig {
    /// Default `tracing` filter directive, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawConfig {
    mapify: RawMapSection,
    database: DatabaseConfig,
    logs: LogsConfig,
}

// ============================================================================
// Config
// ============================================================================

/// A validated configuration profile.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    pub map: MapConfig,
    pub database: DatabaseConfig,
    pub logs: LogsConfig,
}

impl Config {
    /// Load and validate a profile from disk.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Configuration(format!(
                "No such config file: '{}'",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate a profile from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|e| Error::Configuration(e.message().to_string()))?;
        Ok(Self {
            map: MapConfig::try_from(raw.mapify)?,
            database: raw.database,
            logs: raw.logs,
        })
    }
}

/// Default profile location: `configs/mapify.toml`, or
/// `configs/mapify_<instance>.toml` for a named instance.
pub fn default_config_path(instance: Option<&str>) -> PathBuf {
    let file = match instance.filter(|i| !i.is_empty()) {
        Some(instance) => format!("{}_{}.toml", PROJECT_NAME, instance),
        None => format!("{}.toml", PROJECT_NAME),
    };
    PathBuf::from("configs").join(file)
}
