//! Google Maps link parsing and short-link resolution.
//!
//! Coordinates and place names are pulled out of the URL text itself; no
//! network is needed unless short links (`maps.app.goo.gl/...`) have to be
//! expanded first.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, error};

use crate::models::GeoPoint;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// `@latitude,longitude` as found in the map viewport part of the URL.
pub static COORDINATES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@(-?\d+\.\d+),(-?\d+\.\d+)").unwrap());

/// `/maps/place/Place+Name` path segment.
pub static PLACE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"/maps/place/([^/]+)").unwrap());

// ============================================================================
// EXTRACTION
// ============================================================================

/// Extract the `@lat,lon` pair from a full Maps URL.
pub fn extract_coordinates(url: &str) -> Option<GeoPoint> {
    let caps = COORDINATES.captures(url)?;
    let lat: f64 = caps.get(1)?.as_str().parse().ok()?;
    let lon: f64 = caps.get(2)?.as_str().parse().ok()?;
    Some(GeoPoint::new(lat, lon))
}

/// Extract the place name from a full Maps URL, decoding `+` into spaces.
/// Returns an empty string when the URL has no place segment.
pub fn extract_place_name(url: &str) -> String {
    PLACE_NAME
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace('+', " "))
        .unwrap_or_default()
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Turns an input link into the URL the extractors should look at.
///
/// Implementations must be fail-soft: a link that cannot be resolved yields
/// `None` and the caller falls back to the original link.
pub trait LinkResolver: Send + Sync {
    fn resolve(&self, url: &str) -> Option<String>;
}

/// Leaves every link as written.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoResolve;

impl LinkResolver for NoResolve {
    fn resolve(&self, _url: &str) -> Option<String> {
        None
    }
}

/// Follows HTTP redirects to expand shortened links.
pub struct HttpResolver {
    client: Client,
}

impl HttpResolver {
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl LinkResolver for HttpResolver {
    fn resolve(&self, url: &str) -> Option<String> {
        resolve_shortened_url(&self.client, url)
    }
}

/// GET the URL following redirects; the final URL on HTTP 200, else `None`.
/// Network errors are logged and swallowed.
pub fn resolve_shortened_url(client: &Client, url: &str) -> Option<String> {
    match client.get(url).send() {
        Ok(response) if response.status() == StatusCode::OK => Some(response.url().to_string()),
        Ok(response) => {
            debug!(url, status = %response.status(), "Failed to resolve URL");
            None
        }
        Err(e) => {
            error!(url, "Error resolving URL: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_coordinates() {
        let url = "https://www.google.com/maps/place/Sydney+Opera+House/@-33.865,151.209,17z/data=!3m1";
        assert_eq!(extract_coordinates(url), Some(GeoPoint::new(-33.865, 151.209)));
    }

    #[test]
    fn test_extract_coordinates_no_match() {
        assert_eq!(extract_coordinates("no-match"), None);
        // Integers without a fractional part do not match the viewport pattern
        assert_eq!(extract_coordinates("https://maps.example/@12,34"), None);
    }

    #[test]
    fn test_extract_coordinates_takes_first_pair() {
        let url = "https://maps.example/@1.5,2.5/x/@3.5,4.5";
        assert_eq!(extract_coordinates(url), Some(GeoPoint::new(1.5, 2.5)));
    }

    #[test]
    fn test_extract_place_name() {
        let url = "https://www.google.com/maps/place/Sydney+Opera+House/@-33.8567844,151.2152967,17z";
        assert_eq!(extract_place_name(url), "Sydney Opera House");
    }

    #[test]
    fn test_extract_place_name_missing() {
        assert_eq!(extract_place_name("https://maps.app.goo.gl/abc123"), "");
    }

    #[test]
    fn test_no_resolve() {
        assert_eq!(NoResolve.resolve("https://maps.app.goo.gl/abc"), None);
    }

    /// Serve one canned HTTP response per connection on loopback, then stop.
    fn serve(responses: Vec<String>) -> String {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                    line.clear();
                }
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        format!("http://{}", addr)
    }

    fn response(status: &str, extra_headers: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\n{}Content-Length: 0\r\nConnection: close\r\n\r\n",
            status, extra_headers
        )
    }

    #[test]
    fn test_unreachable_host_resolves_to_none() {
        let resolver = HttpResolver::new(Duration::from_millis(200)).unwrap();
        assert_eq!(resolver.resolve("http://127.0.0.1:1/"), None);
    }

    #[test]
    fn test_non_ok_status_resolves_to_none() {
        let base = serve(vec![response("404 Not Found", "")]);
        let resolver = HttpResolver::new(Duration::from_secs(5)).unwrap();
        assert_eq!(resolver.resolve(&format!("{}/abc", base)), None);
    }

    #[test]
    fn test_redirect_followed_to_final_url() {
        let target = "/maps/place/Bondi+Beach/@-33.89,151.27,15z";
        let base = serve(vec![
            response("302 Found", &format!("Location: {}\r\n", target)),
            response("200 OK", ""),
        ]);
        let resolver = HttpResolver::new(Duration::from_secs(5)).unwrap();
        let resolved = resolver.resolve(&format!("{}/abc", base)).unwrap();
        assert_eq!(resolved, format!("{}{}", base, target));
        assert_eq!(extract_place_name(&resolved), "Bondi Beach");
    }
}
