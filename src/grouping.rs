//! Proximity grouping of places into markers.
//!
//! Single greedy pass in input order: each unvisited place seeds a group and
//! claims every later unvisited place within the threshold of the *seed*.
//! Members never move between groups and never influence who joins next, so
//! the result depends on input order. O(n²) in the number of places.

use tracing::info;

use crate::geo::{great_circle_distance_km, mean_location};
use crate::models::{GeoPoint, MarkerGroup, Place, LABEL_SEPARATOR};

/// Default grouping distance in kilometres (10 m).
pub const DEFAULT_GROUP_THRESHOLD_KM: f64 = 0.01;

/// Group assignment of each place, by index. `assignments[i]` is the group id
/// of `places[i]`; ids are dense and start at 0.
pub fn assign_groups(places: &[Place], threshold_km: f64) -> Vec<usize> {
    let mut assignments: Vec<Option<usize>> = vec![None; places.len()];
    let mut group_id = 0;

    for i in 0..places.len() {
        if assignments[i].is_some() {
            continue;
        }
        assignments[i] = Some(group_id);
        let seed = places[i].location;

        for j in (i + 1)..places.len() {
            if assignments[j].is_some() {
                continue;
            }
            if great_circle_distance_km(seed, places[j].location) < threshold_km {
                assignments[j] = Some(group_id);
            }
        }
        group_id += 1;
    }

    // Every index was either skipped as visited or seeded a group
    assignments.into_iter().map(|a| a.unwrap_or_default()).collect()
}

/// Group places and build one [`MarkerGroup`] per group, ordered by id.
pub fn group_places(places: &[Place], threshold_km: f64) -> Vec<MarkerGroup> {
    let assignments = assign_groups(places, threshold_km);
    let group_count = assignments.iter().max().map_or(0, |m| m + 1);

    let mut members: Vec<Vec<&Place>> = vec![Vec::new(); group_count];
    for (place, &group) in places.iter().zip(&assignments) {
        members[group].push(place);
    }

    let groups: Vec<MarkerGroup> = members
        .into_iter()
        .enumerate()
        .filter_map(|(id, members)| finalize_group(id, &members))
        .collect();

    info!(
        "Grouped {} place(s) into {} marker{}",
        places.len(),
        groups.len(),
        if groups.len() == 1 { "" } else { "s" }
    );
    groups
}

fn finalize_group(id: usize, members: &[&Place]) -> Option<MarkerGroup> {
    let seed = members.first()?;
    let last = members.last()?;
    let points: Vec<GeoPoint> = members.iter().map(|p| p.location).collect();
    let labels: Vec<String> = members.iter().map(|p| p.label()).collect();
    Some(MarkerGroup {
        id,
        location: mean_location(&points)?,
        anchor: seed.location,
        last: last.location,
        label: labels.join(LABEL_SEPARATOR),
        colour: seed.marker_colour,
        member_links: members.iter().map(|p| p.link.clone()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarkerColour;
    use std::collections::HashSet;

    fn place(name: &str, lat: f64, lon: f64) -> Place {
        Place {
            link: format!("https://maps.example/place/{}", name),
            location: GeoPoint::new(lat, lon),
            name: name.to_string(),
            open_time: None,
            close_time: None,
            marker_colour: MarkerColour::Blue,
        }
    }

    // ~0.0001 degrees of latitude is ~11 m
    const STEP: f64 = 0.0001;

    #[test]
    fn test_single_place() {
        let groups = group_places(&[place("A", -33.865, 151.209)], 0.01);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].location, GeoPoint::new(-33.865, 151.209));
        assert_eq!(groups[0].label, "<span><b>A</b></span>");
        assert_eq!(groups[0].member_links, vec!["https://maps.example/place/A"]);
    }

    #[test]
    fn test_nearby_places_merge() {
        let places = [place("A", 0.0, 0.0), place("B", 0.00005, 0.0), place("C", 1.0, 1.0)];
        let groups = group_places(&places, 0.01);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "<span><b>A</b></span><br><br><span><b>B</b></span>");
        assert_eq!(groups[0].location, GeoPoint::new(0.000025, 0.0));
        assert_eq!(groups[0].anchor, GeoPoint::new(0.0, 0.0));
        assert_eq!(groups[0].last, GeoPoint::new(0.00005, 0.0));
        assert_eq!(groups[1].member_links.len(), 1);
    }

    #[test]
    fn test_distance_measured_from_seed_only() {
        // B is within range of A, C is within range of B but not of A.
        let places = [
            place("A", 0.0, 0.0),
            place("B", 0.6 * STEP, 0.0),
            place("C", 1.2 * STEP, 0.0),
        ];
        let threshold = 0.01; // ~0.9 STEP
        assert_eq!(assign_groups(&places, threshold), vec![0, 0, 1]);
    }

    #[test]
    fn test_input_order_matters() {
        let a = place("A", 0.0, 0.0);
        let b = place("B", 0.6 * STEP, 0.0);
        let c = place("C", 1.2 * STEP, 0.0);
        let forward = assign_groups(&[a.clone(), b.clone(), c.clone()], 0.01);
        let seeded_by_b = assign_groups(&[b, a, c], 0.01);
        assert_eq!(forward, vec![0, 0, 1]);
        // B seeds and claims both neighbours
        assert_eq!(seeded_by_b, vec![0, 0, 0]);
    }

    #[test]
    fn test_partition_property() {
        let mut places = Vec::new();
        for i in 0..40 {
            let f = i as f64;
            places.push(place(&format!("P{}", i), (f * 0.37).sin() * 0.001, (f * 0.11).cos() * 0.001));
        }
        for threshold in [0.001, 0.01, 0.05, 0.2, 10.0] {
            let groups = group_places(&places, threshold);
            let mut seen = HashSet::new();
            let mut count = 0;
            for g in &groups {
                for link in &g.member_links {
                    assert!(seen.insert(link.clone()), "{} in two groups", link);
                    count += 1;
                }
            }
            assert_eq!(count, places.len());
        }
    }

    #[test]
    fn test_large_threshold_single_group() {
        let places = [place("A", 0.0, 0.0), place("B", 2.0, 2.0)];
        let groups = group_places(&places, 1000.0);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].location, GeoPoint::new(1.0, 1.0));
    }

    #[test]
    fn test_group_colour_from_seed() {
        let mut a = place("A", 0.0, 0.0);
        a.marker_colour = MarkerColour::Green;
        let b = place("B", 0.0, 0.0);
        let groups = group_places(&[a, b], 0.01);
        assert_eq!(groups[0].colour, MarkerColour::Green);
    }

    #[test]
    fn test_empty_input() {
        assert!(group_places(&[], 0.01).is_empty());
    }
}
