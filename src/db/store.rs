//! Storage-backed loading and reading of places and markers.
//!
//! Loading merges each incoming place into the first stored marker within
//! the grouping threshold. Unlike in-memory grouping, the marker's position
//! is a running centroid: after a merge it is the unweighted mean of all its
//! member places, the candidate included. Every place scans every stored
//! marker, so a load is quadratic across runs.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::config::MapConfig;
use crate::error::Result;
use crate::geo::{great_circle_distance_km, mean_location};
use crate::models::{GeoPoint, Marker, MarkerIcon, Place, LABEL_SEPARATOR};
use crate::progress::{create_progress_bar, log_progress};
use crate::render::{icon_for, Icon, MapMarker};

/// Outcome of a load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub inserted: usize,
    pub new_markers: usize,
    pub merged: usize,
    /// Places whose link was already stored.
    pub skipped: usize,
}

/// Persist places, merging them into stored markers.
///
/// Runs in a single write transaction: any failure leaves the store as it
/// was.
pub fn load_places(conn: &mut Connection, places: &[Place], config: &MapConfig) -> Result<LoadSummary> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut summary = LoadSummary::default();
    let mut icon_ids: FxHashMap<Icon, i64> = FxHashMap::default();

    let total = places.len() as u64;
    let pb = create_progress_bar(total, "Loading places");

    for (i, place) in places.iter().enumerate() {
        if place_exists(&tx, &place.link)? {
            debug!("Skipping '{}': already stored", place.link);
            summary.skipped += 1;
        } else {
            let markers = read_markers(&tx)?;
            let nearby = markers.iter().find(|m| {
                great_circle_distance_km(m.location(), place.location) < config.group_threshold
            });

            let marker_id = match nearby {
                Some(marker) => {
                    merge_into_marker(&tx, marker, place)?;
                    summary.merged += 1;
                    marker.id
                }
                None => {
                    let icon = icon_for(Some(place.marker_colour.as_str()), None, None, config);
                    let icon_id = match icon_ids.get(&icon) {
                        Some(&id) => id,
                        None => {
                            let id = find_or_insert_icon(&tx, &icon)?;
                            icon_ids.insert(icon, id);
                            id
                        }
                    };
                    summary.new_markers += 1;
                    insert_marker(&tx, place, icon_id)?
                }
            };
            insert_place(&tx, place, marker_id)?;
            summary.inserted += 1;
        }
        pb.inc(1);
        log_progress("load", i as u64 + 1, total, 100);
    }

    tx.commit()?;
    pb.finish_and_clear();
    info!(
        "Loaded {} place(s): {} new marker(s), {} merged, {} already stored",
        summary.inserted, summary.new_markers, summary.merged, summary.skipped
    );
    Ok(summary)
}

fn place_exists(conn: &Connection, link: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM place WHERE link = ?1", [link], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn read_markers(conn: &Connection) -> Result<Vec<Marker>> {
    let mut stmt = conn.prepare_cached("SELECT id, name, latitude, longitude, icon_id FROM marker ORDER BY id")?;
    let markers = stmt
        .query_map([], |row| {
            Ok(Marker {
                id: row.get(0)?,
                name: row.get(1)?,
                latitude: row.get(2)?,
                longitude: row.get(3)?,
                icon_id: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(markers)
}

fn member_locations(conn: &Connection, marker_id: i64) -> Result<Vec<GeoPoint>> {
    let mut stmt = conn.prepare_cached("SELECT latitude, longitude FROM place WHERE marker_id = ?1 ORDER BY id")?;
    let points = stmt
        .query_map([marker_id], |row| Ok(GeoPoint::new(row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(points)
}

fn merge_into_marker(conn: &Connection, marker: &Marker, place: &Place) -> Result<()> {
    let mut points = member_locations(conn, marker.id)?;
    points.push(place.location);
    let centroid = mean_location(&points).unwrap_or(place.location);
    let label = format!("{}{}{}", marker.name, LABEL_SEPARATOR, place.label());

    conn.execute(
        "UPDATE marker SET name = ?1, latitude = ?2, longitude = ?3 WHERE id = ?4",
        params![label, centroid.latitude, centroid.longitude, marker.id],
    )?;
    debug!("Merged '{}' into marker {}", place.link, marker.id);
    Ok(())
}

fn find_or_insert_icon(conn: &Connection, icon: &Icon) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM marker_icon WHERE colour = ?1 AND icon = ?2 AND prefix = ?3 ORDER BY id LIMIT 1",
            params![icon.colour, icon.icon, icon.prefix],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO marker_icon (colour, icon, prefix) VALUES (?1, ?2, ?3)",
        params![icon.colour, icon.icon, icon.prefix],
    )?;
    debug!("Added marker icon {}/{}/{}", icon.colour, icon.icon, icon.prefix);
    Ok(conn.last_insert_rowid())
}

fn insert_marker(conn: &Connection, place: &Place, icon_id: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO marker (name, latitude, longitude, icon_id) VALUES (?1, ?2, ?3, ?4)",
        params![place.label(), place.location.latitude, place.location.longitude, icon_id],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_place(conn: &Connection, place: &Place, marker_id: i64) -> Result<()> {
    let time = |t: Option<chrono::NaiveTime>| t.map(|t| t.format("%H:%M:%S").to_string());
    conn.execute(
        "INSERT INTO place (link, latitude, longitude, name, open_time, close_time, marker_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            place.link,
            place.location.latitude,
            place.location.longitude,
            place.name,
            time(place.open_time),
            time(place.close_time),
            marker_id,
        ],
    )?;
    Ok(())
}

// ============================================================================
// Reading
// ============================================================================

/// A stored marker together with what is needed to draw it.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredMarker {
    pub marker: Marker,
    /// Location of the first place stored for this marker.
    pub anchor: Option<GeoPoint>,
    pub icon: Option<MarkerIcon>,
}

impl StoredMarker {
    /// Drawn at the anchor place, or at the centroid for a marker without
    /// places.
    pub fn position(&self) -> GeoPoint {
        self.anchor.unwrap_or_else(|| self.marker.location())
    }

    pub fn map_marker(&self, config: &MapConfig) -> MapMarker {
        let icon = self.icon.as_ref();
        MapMarker {
            location: self.position(),
            popup_html: self.marker.name.clone(),
            icon: icon_for(
                icon.map(|i| i.colour.as_str()),
                icon.map(|i| i.icon.as_str()),
                icon.map(|i| i.prefix.as_str()),
                config,
            ),
        }
    }
}

/// All stored markers, by id.
pub fn load_markers(conn: &Connection) -> Result<Vec<StoredMarker>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.name, m.latitude, m.longitude, m.icon_id,
                a.latitude, a.longitude,
                i.id, i.colour, i.icon, i.prefix
         FROM marker m
         LEFT JOIN place a ON a.id = (SELECT MIN(p.id) FROM place p WHERE p.marker_id = m.id)
         LEFT JOIN marker_icon i ON i.id = m.icon_id
         ORDER BY m.id",
    )?;
    let markers = stmt
        .query_map([], |row| {
            let anchor = match (row.get::<_, Option<f64>>(5)?, row.get::<_, Option<f64>>(6)?) {
                (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
                _ => None,
            };
            let icon = match row.get::<_, Option<i64>>(7)? {
                Some(id) => Some(MarkerIcon {
                    id,
                    colour: row.get(8)?,
                    icon: row.get(9)?,
                    prefix: row.get(10)?,
                }),
                None => None,
            };
            Ok(StoredMarker {
                marker: Marker {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                    icon_id: row.get(4)?,
                },
                anchor,
                icon,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    debug!("Read {} stored marker(s)", markers.len());
    Ok(markers)
}
