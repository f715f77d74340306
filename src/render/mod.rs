//! Map view construction, HTML rendering and output.
//!
//! The view is built from marker positions and a focus policy, handed to a
//! [`DocumentRenderer`] for the base document, then patched with three fixed
//! textual edits before being written out.

mod leaflet;

pub use leaflet::LeafletRenderer;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{FocusSize, FocusType, MapConfig};
use crate::error::{Error, Result};
use crate::geo::{bounds, mean_location};
use crate::models::{escape_html, Bounds, GeoPoint, MarkerGroup};

// ============================================================================
// View Model
// ============================================================================

/// Awesome-markers icon triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Icon {
    pub colour: String,
    pub icon: String,
    pub prefix: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapMarker {
    pub location: GeoPoint,
    pub popup_html: String,
    pub icon: Icon,
}

/// Everything the renderer needs to draw a map.
#[derive(Clone, Debug, PartialEq)]
pub struct MapView {
    pub center: GeoPoint,
    pub zoom: u32,
    /// Set when the viewport should be re-fit after creation.
    pub fit_bounds: Option<Bounds>,
    pub markers: Vec<MapMarker>,
}

/// Produces the base HTML document for a view.
pub trait DocumentRenderer {
    fn render(&self, view: &MapView) -> String;
}

/// Per-run overrides of the configured focus policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct FocusOverrides {
    pub focus_type: Option<FocusType>,
    pub focus_size: Option<FocusSize>,
}

// ============================================================================
// View Construction
// ============================================================================

/// Location the map is centred on.
pub fn focus_location(points: &[GeoPoint], focus_type: FocusType) -> Option<GeoPoint> {
    match focus_type {
        FocusType::First => points.first().copied(),
        FocusType::Last => points.last().copied(),
        FocusType::Centre => mean_location(points),
    }
}

/// Icon for a marker, falling back to configured values and finally to a
/// blue circle.
pub fn icon_for(colour: Option<&str>, icon: Option<&str>, prefix: Option<&str>, config: &MapConfig) -> Icon {
    fn pick(value: Option<&str>, configured: &str, fallback: &str) -> String {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| Some(configured.trim()).filter(|v| !v.is_empty()))
            .unwrap_or(fallback)
            .to_string()
    }
    let configured_colour = config.marker_colour.as_str();
    Icon {
        colour: pick(colour, configured_colour, "blue"),
        icon: pick(icon, &config.marker_icon, "circle"),
        prefix: pick(prefix, &config.marker_prefix, "fa"),
    }
}

/// Where a group's marker is drawn: its seed for `first`, its last member
/// for `last` and the member mean for `centre`.
pub fn group_position(group: &MarkerGroup, focus_type: FocusType) -> GeoPoint {
    match focus_type {
        FocusType::First => group.anchor,
        FocusType::Last => group.last,
        FocusType::Centre => group.location,
    }
}

/// One marker per group, positioned according to `focus_type`.
pub fn markers_from_groups(groups: &[MarkerGroup], config: &MapConfig, focus_type: FocusType) -> Vec<MapMarker> {
    groups
        .iter()
        .map(|group| MapMarker {
            location: group_position(group, focus_type),
            popup_html: group.label.clone(),
            icon: icon_for(Some(group.colour.as_str()), None, None, config),
        })
        .collect()
}

/// Assemble the view.
///
/// `focus_points` decide the centre; the fit bounds, when requested, always
/// cover the marker positions.
pub fn build_view(
    focus_points: &[GeoPoint],
    markers: Vec<MapMarker>,
    config: &MapConfig,
    overrides: FocusOverrides,
) -> Result<MapView> {
    let focus_type = overrides.focus_type.unwrap_or(config.focus_type);
    let focus_size = overrides.focus_size.unwrap_or(config.focus_size);

    let center = focus_location(focus_points, focus_type)
        .ok_or_else(|| Error::InputData("No valid destinations to map.".to_string()))?;

    let fit_bounds = match focus_size {
        FocusSize::Fit => {
            let positions: Vec<GeoPoint> = markers.iter().map(|m| m.location).collect();
            bounds(&positions)
        }
        FocusSize::Zoom(_) => None,
    };

    debug!(
        "Map view: focus={} centre=({}, {}) zoom={} markers={}",
        focus_type,
        center.latitude,
        center.longitude,
        focus_size.initial_zoom(),
        markers.len()
    );

    Ok(MapView {
        center,
        zoom: focus_size.initial_zoom(),
        fit_bounds,
        markers,
    })
}

// ============================================================================
// Post-processing
// ============================================================================

const TITLE_ANCHOR: &str = "<head>\n    \n    <meta";
const POPUP_WIDTH_FROM: &str = "L.popup({\n  \"maxWidth\": \"100%\",\n});";
const POPUP_WIDTH_TO: &str = "L.popup({\n  \"width\": \"100px\",\n});";
const DOCUMENT_END: &str = "</html>";
const REMOVE_ATTRIBUTION_SCRIPT: &str = "<script>\n\
document.addEventListener(\"DOMContentLoaded\", function() {\n\
    $('.leaflet-control-attribution').remove();\n\
});\n\
</script>\n";

/// Apply the three textual edits to a rendered document: inject a title
/// (when non-empty), narrow popups to a fixed width, and remove the
/// attribution control once the page has loaded.
pub fn post_process(html: &str, title: &str) -> String {
    let mut out = html.to_string();

    if !title.is_empty() {
        let with_title = format!(
            "<head>\n    \n    <title>{}</title>\n<meta",
            escape_html(title)
        );
        out = out.replacen(TITLE_ANCHOR, &with_title, 1);
    }

    out = out.replace(POPUP_WIDTH_FROM, POPUP_WIDTH_TO);

    match out.rfind(DOCUMENT_END) {
        Some(pos) => out.insert_str(pos, REMOVE_ATTRIBUTION_SCRIPT),
        None => out.push_str(REMOVE_ATTRIBUTION_SCRIPT),
    }
    out
}

/// Render the view and apply the post-processing edits.
pub fn render_document(renderer: &dyn DocumentRenderer, view: &MapView, title: &str) -> String {
    post_process(&renderer.render(view), title)
}

// ============================================================================
// Output
// ============================================================================

/// Write the document, appending `.html` when missing. Returns the path
/// actually written.
pub fn save_map(html: &str, path: &Path) -> Result<PathBuf> {
    let target = with_html_extension(path);
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&target, html)?;
    info!("Map saved to {}", target.display());
    Ok(target)
}

/// `path` with `.html` appended unless it already ends with it.
pub fn with_html_extension(path: &Path) -> PathBuf {
    if path.to_string_lossy().ends_with(".html") {
        path.to_path_buf()
    } else {
        let mut s = path.as_os_str().to_owned();
        s.push(".html");
        PathBuf::from(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarkerColour;

    fn marker(lat: f64, lon: f64) -> MapMarker {
        MapMarker {
            location: GeoPoint::new(lat, lon),
            popup_html: "<span><b>X</b></span>".to_string(),
            icon: Icon {
                colour: "blue".to_string(),
                icon: "circle".to_string(),
                prefix: "fa".to_string(),
            },
        }
    }

    fn config(focus_type: FocusType, focus_size: FocusSize) -> MapConfig {
        MapConfig {
            focus_type,
            focus_size,
            ..MapConfig::default()
        }
    }

    #[test]
    fn test_focus_centre_is_mean() {
        let points = [GeoPoint::new(0.0, 0.0), GeoPoint::new(2.0, 2.0)];
        assert_eq!(focus_location(&points, FocusType::Centre), Some(GeoPoint::new(1.0, 1.0)));
    }

    #[test]
    fn test_focus_first_and_last() {
        let points = [GeoPoint::new(5.0, 5.0), GeoPoint::new(0.0, 0.0), GeoPoint::new(-3.0, 7.0)];
        assert_eq!(focus_location(&points, FocusType::First), Some(GeoPoint::new(5.0, 5.0)));
        assert_eq!(focus_location(&points, FocusType::Last), Some(GeoPoint::new(-3.0, 7.0)));
        assert_eq!(focus_location(&[], FocusType::First), None);
    }

    #[test]
    fn test_build_view_zoom() {
        let points = [GeoPoint::new(0.0, 0.0)];
        let view = build_view(
            &points,
            vec![marker(0.0, 0.0)],
            &config(FocusType::Centre, FocusSize::Zoom(14)),
            FocusOverrides::default(),
        )
        .unwrap();
        assert_eq!(view.zoom, 14);
        assert_eq!(view.fit_bounds, None);
    }

    #[test]
    fn test_build_view_fit_bounds() {
        let points = [GeoPoint::new(0.0, 0.0), GeoPoint::new(2.0, 2.0)];
        let markers = vec![marker(1.0, -1.0), marker(-2.0, 3.0)];
        let view = build_view(
            &points,
            markers,
            &config(FocusType::Centre, FocusSize::Fit),
            FocusOverrides::default(),
        )
        .unwrap();
        assert_eq!(view.zoom, crate::config::FIT_NOMINAL_ZOOM);
        assert_eq!(view.center, GeoPoint::new(1.0, 1.0));
        let corners = view.fit_bounds.unwrap().as_corners();
        assert_eq!(corners, [[-2.0, -1.0], [1.0, 3.0]]);

        let html = LeafletRenderer.render(&view);
        assert!(html.contains("map_0.fitBounds([[-2, -1], [1, 3]], {});"));
    }

    #[test]
    fn test_overrides_win() {
        let points = [GeoPoint::new(0.0, 0.0), GeoPoint::new(2.0, 2.0)];
        let overrides = FocusOverrides {
            focus_type: Some(FocusType::Last),
            focus_size: Some(FocusSize::Zoom(3)),
        };
        let view = build_view(&points, vec![], &config(FocusType::First, FocusSize::Fit), overrides).unwrap();
        assert_eq!(view.center, GeoPoint::new(2.0, 2.0));
        assert_eq!(view.zoom, 3);
        assert_eq!(view.fit_bounds, None);
    }

    #[test]
    fn test_build_view_without_points_fails() {
        let result = build_view(&[], vec![], &MapConfig::default(), FocusOverrides::default());
        assert!(matches!(result, Err(Error::InputData(_))));
    }

    #[test]
    fn test_icon_fallbacks() {
        let mut cfg = MapConfig::default();
        cfg.marker_icon = String::new();
        cfg.marker_prefix = "glyphicon".to_string();
        let icon = icon_for(Some("red"), Some(" "), None, &cfg);
        assert_eq!(icon.colour, "red");
        assert_eq!(icon.icon, "circle");
        assert_eq!(icon.prefix, "glyphicon");
    }

    fn group() -> MarkerGroup {
        MarkerGroup {
            id: 0,
            location: GeoPoint::new(10.000025, 20.0),
            anchor: GeoPoint::new(10.0, 20.0),
            last: GeoPoint::new(10.00005, 20.0),
            label: "<span><b>A</b></span><br><br><span><b>B</b></span>".to_string(),
            colour: MarkerColour::Green,
            member_links: vec!["a".to_string(), "b".to_string()],
        }
    }

    #[test]
    fn test_markers_from_groups() {
        let markers = markers_from_groups(&[group()], &MapConfig::default(), FocusType::Centre);
        assert_eq!(markers[0].location, GeoPoint::new(10.000025, 20.0));
        assert_eq!(markers[0].icon.colour, "green");
        assert_eq!(markers[0].popup_html, "<span><b>A</b></span><br><br><span><b>B</b></span>");
    }

    #[test]
    fn test_group_marker_at_seed_for_first() {
        let markers = markers_from_groups(&[group()], &MapConfig::default(), FocusType::First);
        assert_eq!(markers[0].location, GeoPoint::new(10.0, 20.0));
    }

    #[test]
    fn test_group_marker_at_last_member_for_last() {
        let markers = markers_from_groups(&[group()], &MapConfig::default(), FocusType::Last);
        assert_eq!(markers[0].location, GeoPoint::new(10.00005, 20.0));
    }

    #[test]
    fn test_post_process_edits() {
        let view = MapView {
            center: GeoPoint::new(0.0, 0.0),
            zoom: 10,
            fit_bounds: None,
            markers: vec![marker(0.0, 0.0)],
        };
        let html = render_document(&LeafletRenderer, &view, "Trip");
        assert!(html.contains("<head>\n    \n    <title>Trip</title>\n<meta"));
        assert!(html.contains(POPUP_WIDTH_TO));
        assert!(!html.contains(POPUP_WIDTH_FROM));
        assert!(html.contains("$('.leaflet-control-attribution').remove();"));
        assert!(html.ends_with("</script>\n</html>"));
    }

    #[test]
    fn test_post_process_without_title() {
        let html = post_process("<html>\n<head>\n    \n    <meta charset=\"utf-8\">\n</html>", "");
        assert!(!html.contains("<title>"));
        assert!(html.contains("DOMContentLoaded"));
    }

    #[test]
    fn test_save_map_appends_extension() {
        let dir = tempfile::tempdir().unwrap();
        let written = save_map("<html></html>", &dir.path().join("out/trip")).unwrap();
        assert_eq!(written, dir.path().join("out/trip.html"));
        assert_eq!(fs::read_to_string(&written).unwrap(), "<html></html>");

        let kept = save_map("<html></html>", &dir.path().join("map.html")).unwrap();
        assert_eq!(kept, dir.path().join("map.html"));
    }
}
