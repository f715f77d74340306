//! Base HTML document for a Leaflet map.
//!
//! Produces a self-contained page in the layout folium emits, so the fixed
//! textual edits in the parent module find their anchors.

use serde_json::json;
use std::fmt::Write;

use super::{DocumentRenderer, MapView};

const LEAFLET_JS: &str = "https://cdn.jsdelivr.net/npm/leaflet@1.9.3/dist/leaflet.js";
const LEAFLET_CSS: &str = "https://cdn.jsdelivr.net/npm/leaflet@1.9.3/dist/leaflet.css";
const JQUERY_JS: &str = "https://code.jquery.com/jquery-3.7.1.min.js";
const AWESOME_MARKERS_JS: &str =
    "https://cdnjs.cloudflare.com/ajax/libs/Leaflet.awesome-markers/2.0.2/leaflet.awesome-markers.js";
const AWESOME_MARKERS_CSS: &str =
    "https://cdnjs.cloudflare.com/ajax/libs/Leaflet.awesome-markers/2.0.2/leaflet.awesome-markers.css";
const FONT_AWESOME_CSS: &str =
    "https://cdn.jsdelivr.net/npm/@fortawesome/fontawesome-free@6.2.0/css/all.min.css";
const TILE_URL: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";
const TILE_ATTRIBUTION: &str =
    "&copy; <a href=\"https://www.openstreetmap.org/copyright\">OpenStreetMap</a> contributors";

/// Renders a [`MapView`] with Leaflet, OpenStreetMap tiles and
/// awesome-markers icons.
#[derive(Clone, Copy, Debug, Default)]
pub struct LeafletRenderer;

impl DocumentRenderer for LeafletRenderer {
    fn render(&self, view: &MapView) -> String {
        let map_id = "map_0";
        let mut html = String::with_capacity(4096 + view.markers.len() * 512);

        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n    \n");
        html.push_str("    <meta http-equiv=\"content-type\" content=\"text/html; charset=UTF-8\" />\n");
        for src in [LEAFLET_JS, JQUERY_JS, AWESOME_MARKERS_JS] {
            let _ = writeln!(html, "    <script src=\"{}\"></script>", src);
        }
        for href in [LEAFLET_CSS, AWESOME_MARKERS_CSS, FONT_AWESOME_CSS] {
            let _ = writeln!(html, "    <link rel=\"stylesheet\" href=\"{}\"/>", href);
        }
        html.push_str(
            "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0, maximum-scale=1.0, user-scalable=no\" />\n",
        );
        html.push_str("    <style>html, body {width: 100%;height: 100%;margin: 0;padding: 0;}</style>\n");
        let _ = writeln!(
            html,
            "    <style>#{} {{position: absolute; width: 100.0%; height: 100.0%; left: 0.0%; top: 0.0%;}}</style>",
            map_id
        );
        html.push_str("</head>\n<body>\n");
        let _ = writeln!(html, "    <div class=\"folium-map\" id=\"{}\" ></div>", map_id);
        html.push_str("</body>\n<script>\n");

        let _ = writeln!(
            html,
            "    var {id} = L.map(\"{id}\", {{center: [{lat}, {lon}], crs: L.CRS.EPSG3857, zoom: {zoom}, zoomControl: true, preferCanvas: false}});",
            id = map_id,
            lat = view.center.latitude,
            lon = view.center.longitude,
            zoom = view.zoom,
        );
        let tile_options = json!({ "attribution": TILE_ATTRIBUTION, "maxZoom": 19 });
        let _ = writeln!(
            html,
            "    var tile_layer_0 = L.tileLayer(\"{}\", {}).addTo({});",
            TILE_URL, tile_options, map_id
        );
        if let Some(bounds) = view.fit_bounds {
            let corners = bounds.as_corners();
            let _ = writeln!(
                html,
                "    {}.fitBounds([[{}, {}], [{}, {}]], {{}});",
                map_id, corners[0][0], corners[0][1], corners[1][0], corners[1][1]
            );
        }

        for (i, marker) in view.markers.iter().enumerate() {
            let n = i + 1;
            let _ = writeln!(
                html,
                "    var marker_{n} = L.marker([{}, {}], {{}}).addTo({});",
                marker.location.latitude, marker.location.longitude, map_id
            );
            let icon_options = json!({
                "extraClasses": "fa-rotate-0",
                "icon": marker.icon.icon,
                "iconColor": "white",
                "markerColor": marker.icon.colour,
                "prefix": marker.icon.prefix,
            });
            let _ = writeln!(html, "    var icon_{n} = L.AwesomeMarkers.icon({});", icon_options);
            let _ = writeln!(html, "    marker_{n}.setIcon(icon_{n});");
            let _ = writeln!(html, "    var popup_{n} = L.popup({{\n  \"maxWidth\": \"100%\",\n}});");
            let _ = writeln!(
                html,
                "    var html_{n} = $(`<div id=\"html_{n}\" style=\"width: 100.0%; height: 100.0%;\">{}</div>`)[0];",
                escape_template_literal(&marker.popup_html)
            );
            let _ = writeln!(html, "    popup_{n}.setContent(html_{n});");
            let _ = writeln!(html, "    marker_{n}.bindPopup(popup_{n});");
        }

        html.push_str("</script>\n</html>");
        html
    }
}

fn escape_template_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bounds, GeoPoint};
    use crate::render::{Icon, MapMarker};

    fn view(fit: bool) -> MapView {
        MapView {
            center: GeoPoint::new(1.0, 2.0),
            zoom: 12,
            fit_bounds: fit.then(|| Bounds {
                south_west: GeoPoint::new(0.0, 0.5),
                north_east: GeoPoint::new(2.0, 3.5),
            }),
            markers: vec![MapMarker {
                location: GeoPoint::new(1.5, 2.5),
                popup_html: "<span><b>A`${x}</b></span>".to_string(),
                icon: Icon {
                    colour: "green".to_string(),
                    icon: "circle".to_string(),
                    prefix: "fa".to_string(),
                },
            }],
        }
    }

    #[test]
    fn test_document_structure() {
        let html = LeafletRenderer.render(&view(false));
        assert!(html.starts_with("<!DOCTYPE html>\n<html>\n<head>\n    \n    <meta"));
        assert!(html.ends_with("</html>"));
        assert!(html.contains("center: [1, 2]"));
        assert!(html.contains("zoom: 12"));
        assert!(html.contains("L.marker([1.5, 2.5], {})"));
        assert!(html.contains("\"markerColor\":\"green\""));
        assert!(html.contains("L.popup({\n  \"maxWidth\": \"100%\",\n});"));
        assert!(!html.contains("fitBounds"));
    }

    #[test]
    fn test_fit_bounds_emitted() {
        let html = LeafletRenderer.render(&view(true));
        assert!(html.contains("map_0.fitBounds([[0, 0.5], [2, 3.5]], {});"));
    }

    #[test]
    fn test_popup_escaped_for_template_literal() {
        let html = LeafletRenderer.render(&view(false));
        assert!(html.contains("<b>A\\`\\${x}</b>"));
    }
}
