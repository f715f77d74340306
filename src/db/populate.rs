//! Data-population steps run after a schema file is applied.
//!
//! Steps are plain functions registered against the migration step they
//! belong to. Nothing is loaded from disk at runtime.

use rusqlite::{params, Transaction};
use rustc_hash::FxHashMap;
use std::fmt;
use tracing::debug;

use crate::error::{Error, Result};

/// One unit of schema migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MigrationStep {
    /// Full schema creation at the given version.
    Create(u32),
    /// Upgrade from the first version to the second.
    Upgrade(u32, u32),
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStep::Create(v) => write!(f, "v{} create", v),
            MigrationStep::Upgrade(from, to) => write!(f, "v{} to v{} upgrade", from, to),
        }
    }
}

pub type PopulateFn = fn(&Transaction<'_>) -> Result<()>;

/// Population steps keyed by migration step.
#[derive(Clone, Default)]
pub struct PopulationRegistry {
    steps: FxHashMap<MigrationStep, PopulateFn>,
}

impl fmt::Debug for PopulationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.steps.keys()).finish()
    }
}

impl PopulationRegistry {
    /// Registry with no steps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the steps shipped alongside the schema files.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(MigrationStep::Create(1), seed_marker_icons);
        registry.register(MigrationStep::Create(2), seed_marker_icons);
        registry
    }

    pub fn register(&mut self, step: MigrationStep, populate: PopulateFn) -> &mut Self {
        self.steps.insert(step, populate);
        self
    }

    pub fn get(&self, step: MigrationStep) -> Option<PopulateFn> {
        self.steps.get(&step).copied()
    }

    /// Run the step's population function, if one is registered. Returns
    /// whether anything ran.
    pub fn run(&self, tx: &Transaction<'_>, step: MigrationStep) -> Result<bool> {
        let Some(populate) = self.get(step) else {
            debug!("No data population for {}", step);
            return Ok(false);
        };
        populate(tx).map_err(|e| Error::DataPopulation {
            step: step.to_string(),
            reason: e.to_string(),
        })?;
        debug!("Populated data for {}", step);
        Ok(true)
    }
}

/// Icons available out of the box.
pub const DEFAULT_MARKER_ICONS: [(&str, &str, &str); 3] = [
    ("blue", "circle", "fa"),
    ("blue", "location-dot", "fa"),
    ("green", "location-dot", "fa"),
];

fn seed_marker_icons(tx: &Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO marker_icon (colour, icon, prefix)
         SELECT ?1, ?2, ?3
         WHERE NOT EXISTS (
             SELECT 1 FROM marker_icon WHERE colour = ?1 AND icon = ?2 AND prefix = ?3
         )",
    )?;
    for (colour, icon, prefix) in DEFAULT_MARKER_ICONS {
        stmt.execute(params![colour, icon, prefix])?;
    }
    Ok(())
}
