use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::core::geo::{parse_coordinate, LatLon};
use crate::utils::log_helpers::truncate_log;

pub const DEFAULT_GEOCODER_BASE_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_GEOCODER_LANGUAGE: &str = "ko";
pub const DEFAULT_GEOCODER_USER_AGENT: &str = "incident-stream/0.1";
pub const DEFAULT_GEOCODER_TIMEOUT_MS: u64 = 8_000;

pub type GeoBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Resolves free-form addresses to coordinates. `Ok(None)` means the service
/// answered but knows no such place.
pub trait Geocoder: Send + Sync {
    fn lookup<'a>(&'a self, address: &'a str) -> GeoBoxFuture<'a, Result<Option<LatLon>, String>>;
}

#[derive(Debug, Clone)]
pub struct GeocoderSettings {
    pub base_url: String,
    pub language: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEOCODER_BASE_URL.to_string(),
            language: DEFAULT_GEOCODER_LANGUAGE.to_string(),
            user_agent: DEFAULT_GEOCODER_USER_AGENT.to_string(),
            timeout: Duration::from_millis(DEFAULT_GEOCODER_TIMEOUT_MS),
        }
    }
}

pub struct NominatimGeocoder {
    client: Client,
    search_url: Url,
    language: String,
}

impl NominatimGeocoder {
    pub fn new(settings: &GeocoderSettings) -> Result<Self, String> {
        let search_url = search_url(&settings.base_url)?;
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| format!("build geocoder client failed: {}", err))?;
        Ok(Self {
            client,
            search_url,
            language: settings.language.clone(),
        })
    }

    async fn search(&self, address: &str) -> Result<Option<LatLon>, String> {
        let query = address.trim();
        if query.is_empty() {
            return Ok(None);
        }

        debug!("[GEOCODE] lookup: {}", query);
        let resp = self
            .client
            .get(self.search_url.clone())
            .query(&[
                ("format", "json"),
                ("limit", "1"),
                ("q", query),
                ("accept-language", self.language.as_str()),
            ])
            .send()
            .await
            .map_err(|err| format!("geocoder request failed: {}", err))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| format!("geocoder read failed: {}", err))?;
        if !status.is_success() {
            return Err(format!(
                "geocoder status {}: {}",
                status.as_u16(),
                truncate_log(&body, 300)
            ));
        }

        let hit = parse_search_results(&body)?;
        if hit.is_none() {
            warn!("[GEOCODE] no match for address: {}", query);
        }
        Ok(hit)
    }
}

impl Geocoder for NominatimGeocoder {
    fn lookup<'a>(&'a self, address: &'a str) -> GeoBoxFuture<'a, Result<Option<LatLon>, String>> {
        Box::pin(self.search(address))
    }
}

fn search_url(base_url: &str) -> Result<Url, String> {
    let raw = format!("{}/search", base_url.trim().trim_end_matches('/'));
    Url::parse(&raw).map_err(|err| format!("invalid geocoder url {}: {}", raw, err))
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

pub fn parse_search_results(body: &str) -> Result<Option<LatLon>, String> {
    let hits: Vec<SearchHit> =
        serde_json::from_str(body).map_err(|err| format!("geocoder parse failed: {}", err))?;
    let Some(first) = hits.first() else {
        return Ok(None);
    };
    match (parse_coordinate(&first.lat), parse_coordinate(&first.lon)) {
        (Some(lat), Some(lon)) => Ok(Some(LatLon::new(lat, lon))),
        _ => Err(format!(
            "geocoder returned bad coordinates: lat={}, lon={}",
            first.lat, first.lon
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_search_results_takes_first_hit() {
        let body = r#"[{"lat":"36.81","lon":"127.11","display_name":"A"},{"lat":"1","lon":"2"}]"#;
        assert_eq!(
            parse_search_results(body),
            Ok(Some(LatLon::new(36.81, 127.11)))
        );
    }

    #[test]
    fn parse_search_results_handles_empty_and_broken_bodies() {
        assert_eq!(parse_search_results("[]"), Ok(None));
        assert!(parse_search_results("{\"error\":1}").is_err());
        assert!(parse_search_results(r#"[{"lat":"north","lon":"1"}]"#).is_err());
    }

    #[test]
    fn search_url_appends_path_once() {
        assert_eq!(
            search_url("https://geo.example.com/").map(|url| url.to_string()),
            Ok("https://geo.example.com/search".to_string())
        );
        assert!(search_url("not a url").is_err());
    }

    #[tokio::test]
    async fn blank_address_skips_the_network() {
        let geocoder = NominatimGeocoder::new(&GeocoderSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        })
        .expect("client");

        assert_eq!(geocoder.lookup("   ").await, Ok(None));
    }
}
