//! Record enrichment on a bounded worker pool.
//!
//! Each task owns exactly one `&mut PlaceRecord` (rayon hands out disjoint
//! slices), so workers never share a mutable cell. `WorkerPool::run_rows`
//! returns only after every task has finished, which is the barrier before
//! grouping starts.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::links::{extract_coordinates, extract_place_name, LinkResolver};
use crate::models::{MarkerColour, Place, PlaceRecord};
use crate::progress::{create_progress_bar, log_progress};

/// Default enrichment concurrency.
pub const DEFAULT_WORKERS: usize = 10;

/// Name used when neither the input nor the link carries one.
pub const UNKNOWN_PLACE_NAME: &str = "Unknown";

// ============================================================================
// Worker Pool
// ============================================================================

/// Fixed-size pool used for per-row work.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Configuration("worker pool needs at least one thread".to_string()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("mapify-enrich-{}", i))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build worker pool: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `task` once per row and wait for all of them.
    ///
    /// The first failing task's error is returned; no partial success is
    /// reported. Rows already processed keep their mutations.
    pub fn run_rows<T, F>(&self, rows: &mut [T], task: F) -> Result<()>
    where
        T: Send,
        F: Fn(&mut T) -> Result<()> + Send + Sync,
    {
        self.pool.install(|| rows.par_iter_mut().try_for_each(|row| task(row)))
    }
}

// ============================================================================
// Enrichment
// ============================================================================

/// Fills in coordinates, names and colours from each record's link.
pub struct Enricher<'a> {
    resolver: &'a dyn LinkResolver,
    default_colour: MarkerColour,
}

impl<'a> Enricher<'a> {
    pub fn new(resolver: &'a dyn LinkResolver, default_colour: MarkerColour) -> Self {
        Self {
            resolver,
            default_colour,
        }
    }

    /// Enrich one record in place.
    ///
    /// Coordinates found in the (resolved) link override the input columns;
    /// a blank name is taken from the link, else `"Unknown"`; a missing colour
    /// gets the configured default. Out-of-range coordinates are discarded.
    pub fn enrich_record(&self, record: &mut PlaceRecord) -> Result<()> {
        let resolved = self.resolver.resolve(&record.link);
        let url = resolved.as_deref().unwrap_or(&record.link);

        if let Some(point) = extract_coordinates(url) {
            record.latitude = Some(point.latitude);
            record.longitude = Some(point.longitude);
        }
        if record.name.trim().is_empty() {
            let name = extract_place_name(url);
            record.name = if name.is_empty() {
                UNKNOWN_PLACE_NAME.to_string()
            } else {
                name
            };
        }
        if record.marker_colour.is_none() {
            record.marker_colour = Some(self.default_colour);
        }
        discard_invalid_coordinates(record);
        Ok(())
    }
}

/// Clear coordinates that fall outside the valid latitude/longitude range so
/// the record is dropped with the other unlocated rows.
fn discard_invalid_coordinates(record: &mut PlaceRecord) {
    let lat_ok = record.latitude.map_or(true, |v| (-90.0..=90.0).contains(&v));
    let lon_ok = record.longitude.map_or(true, |v| (-180.0..=180.0).contains(&v));
    if !(lat_ok && lon_ok) {
        warn!(
            "Ignoring out-of-range coordinates for '{}': ({:?}, {:?})",
            record.link, record.latitude, record.longitude
        );
        record.latitude = None;
        record.longitude = None;
    }
}

/// Enrich all records on the pool, then keep only the located ones.
///
/// An empty result is fatal: there is nothing to map.
pub fn enrich_records(
    mut records: Vec<PlaceRecord>,
    pool: &WorkerPool,
    enricher: &Enricher<'_>,
) -> Result<Vec<Place>> {
    let total = records.len() as u64;
    let pb = create_progress_bar(total, "Enriching places");
    let done = std::sync::atomic::AtomicU64::new(0);

    pool.run_rows(&mut records, |record| {
        enricher.enrich_record(record)?;
        pb.inc(1);
        let current = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        log_progress("enrich", current, total, 100);
        Ok(())
    })?;
    pb.finish_and_clear();

    let places = into_places(records, enricher.default_colour);
    info!("Enriched {} of {} place(s) with coordinates", places.len(), total);
    if places.is_empty() {
        return Err(Error::InputData("No valid destinations to map.".to_string()));
    }
    Ok(places)
}

/// Drop records lacking coordinates and convert the rest.
fn into_places(records: Vec<PlaceRecord>, default_colour: MarkerColour) -> Vec<Place> {
    records
        .into_iter()
        .filter_map(|record| match record.location() {
            Some(location) => Some(Place {
                location,
                marker_colour: record.marker_colour.unwrap_or(default_colour),
                link: record.link,
                name: record.name,
                open_time: record.open_time,
                close_time: record.close_time,
            }),
            None => {
                debug!("Dropping '{}': no coordinates", record.link);
                None
            }
        })
        .collect()
}
