//! Reader for `;;`-delimited place files.
//!
//! The two-character separator lets place names and URLs carry commas and
//! single semicolons without quoting. The first non-empty line is the header.

use chrono::NaiveTime;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{MarkerColour, PlaceRecord};

pub const FIELD_SEPARATOR: &str = ";;";

pub const REQUIRED_COLUMNS: [&str; 3] = ["link", "open_time", "close_time"];

/// Column positions resolved from the header line.
struct Columns {
    link: usize,
    open_time: usize,
    close_time: usize,
    marker_colour: Option<usize>,
    latitude: Option<usize>,
    longitude: Option<usize>,
    place_name: Option<usize>,
    width: usize,
}

impl Columns {
    fn from_header(header: &[&str]) -> Result<Self> {
        let find = |name: &str| header.iter().position(|h| *h == name);
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| find(*c).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::InputData(format!(
                "missing required column(s): {}",
                missing.join(", ")
            )));
        }
        // Required columns are known to be present past this point
        let required = |name: &str| find(name).unwrap_or_default();
        Ok(Self {
            link: required("link"),
            open_time: required("open_time"),
            close_time: required("close_time"),
            marker_colour: find("marker_colour"),
            latitude: find("latitude"),
            longitude: find("longitude"),
            place_name: find("place_name"),
            width: header.len(),
        })
    }
}

/// Read place records from a file. See [`parse_records`].
pub fn read_records(path: &Path) -> Result<Vec<PlaceRecord>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::InputData(format!("cannot read '{}': {}", path.display(), e))
    })?;
    parse_records(&text)
}

/// Parse place records, dropping rows without a link.
pub fn parse_records(text: &str) -> Result<Vec<PlaceRecord>> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header_line) = lines
        .next()
        .ok_or_else(|| Error::InputData("input file is empty".to_string()))?;
    let header: Vec<&str> = split_fields(header_line);
    let columns = Columns::from_header(&header)?;

    let mut records = Vec::new();
    let mut without_link = 0usize;
    for (line_no, line) in lines {
        let cells = split_fields(line);
        if cells.len() > columns.width {
            return Err(Error::InputData(format!(
                "line {}: expected at most {} fields, found {}",
                line_no,
                columns.width,
                cells.len()
            )));
        }
        let cell = |idx: usize| cells.get(idx).copied().unwrap_or("");
        let optional = |idx: Option<usize>| idx.map(cell).filter(|c| !c.is_empty());

        let link = cell(columns.link);
        if link.is_empty() {
            without_link += 1;
            continue;
        }

        let mut record = PlaceRecord::new(link);
        record.open_time = parse_time(cell(columns.open_time), line_no, "open_time")?;
        record.close_time = parse_time(cell(columns.close_time), line_no, "close_time")?;
        record.latitude = optional(columns.latitude)
            .map(|v| parse_float(v, line_no, "latitude"))
            .transpose()?;
        record.longitude = optional(columns.longitude)
            .map(|v| parse_float(v, line_no, "longitude"))
            .transpose()?;
        record.name = optional(columns.place_name).unwrap_or("").to_string();
        record.marker_colour = optional(columns.marker_colour)
            .map(|v| {
                v.parse::<MarkerColour>()
                    .map_err(|e| Error::InputData(format!("line {}: {}", line_no, e)))
            })
            .transpose()?;
        records.push(record);
    }

    if without_link > 0 {
        debug!("Dropped {} row(s) without a link", without_link);
    }
    if records.is_empty() {
        warn!("No valid destinations to map.");
    }
    Ok(records)
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(FIELD_SEPARATOR).map(str::trim).collect()
}

fn parse_time(value: &str, line_no: usize, column: &str) -> Result<Option<NaiveTime>> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map(Some)
        .map_err(|_| {
            Error::InputData(format!(
                "line {}: invalid {} '{}' (expected HH:MM or HH:MM:SS)",
                line_no, column, value
            ))
        })
}

fn parse_float(value: &str, line_no: usize, column: &str) -> Result<f64> {
    value.parse::<f64>().map_err(|_| {
        Error::InputData(format!("line {}: invalid {} '{}'", line_no, column, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_file() {
        let text = "link;;open_time;;close_time\n\
                    https://maps.example/place/A/@1.5,2.5;;09:00;;17:00\n";
        let records = parse_records(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].link, "https://maps.example/place/A/@1.5,2.5");
        assert_eq!(records[0].open_time, NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(records[0].close_time, NaiveTime::from_hms_opt(17, 0, 0));
        assert_eq!(records[0].name, "");
        assert_eq!(records[0].marker_colour, None);
    }

    #[test]
    fn test_optional_columns_any_order() {
        let text = "place_name;;link;;latitude;;longitude;;open_time;;close_time;;marker_colour\n\
                    Cafe, Bar;;https://x/a;;1.25;;-3.5;;;;;;green\n";
        let records = parse_records(text).unwrap();
        let r = &records[0];
        assert_eq!(r.name, "Cafe, Bar");
        assert_eq!(r.latitude, Some(1.25));
        assert_eq!(r.longitude, Some(-3.5));
        assert_eq!(r.open_time, None);
        assert_eq!(r.marker_colour, Some(MarkerColour::Green));
    }

    #[test]
    fn test_quotes_are_literal() {
        let text = "place_name;;link;;open_time;;close_time\n\
                    \"Bar;;Grill\";;https://x/q;;;;\n";
        let err = parse_records(text).unwrap_err();
        assert!(matches!(err, Error::InputData(_)));

        let text = "place_name;;link;;open_time;;close_time\n\"Joe's\";;https://x/q;;;;\n";
        let records = parse_records(text).unwrap();
        assert_eq!(records[0].name, "\"Joe's\"");
    }

    #[test]
    fn test_rows_without_link_dropped() {
        let text = "link;;open_time;;close_time\n;;09:00;;10:00\nhttps://x/b;;;;\n\n";
        let records = parse_records(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].link, "https://x/b");
    }

    #[test]
    fn test_short_rows_padded() {
        let text = "link;;open_time;;close_time;;place_name\nhttps://x/c\n";
        let records = parse_records(text).unwrap();
        assert_eq!(records[0].open_time, None);
        assert_eq!(records[0].name, "");
    }

    #[test]
    fn test_missing_required_column() {
        let err = parse_records("link;;open_time\nhttps://x;;09:00\n").unwrap_err();
        assert!(matches!(err, Error::InputData(ref m) if m.contains("close_time")));
    }

    #[test]
    fn test_invalid_time_reports_line() {
        let err = parse_records("link;;open_time;;close_time\nhttps://x;;9am;;\n").unwrap_err();
        assert!(matches!(err, Error::InputData(ref m) if m.contains("line 2")));
    }

    #[test]
    fn test_too_many_fields() {
        let err = parse_records("link;;open_time;;close_time\na;;b;;c;;d\n").unwrap_err();
        assert!(matches!(err, Error::InputData(_)));
    }

    #[test]
    fn test_empty_file() {
        assert!(matches!(parse_records("\n\n"), Err(Error::InputData(_))));
    }
}
