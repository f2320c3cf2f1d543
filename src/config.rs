use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::core::geo::{parse_coordinate, FireLocation};
use crate::services::arrival_batcher::{
    BatcherSettings, DEFAULT_FIT_PADDING, DEFAULT_FOCUS_ZOOM, DEFAULT_SETTLE_DELAY_MS,
};
use crate::services::geocoder::{
    GeocoderSettings, DEFAULT_GEOCODER_BASE_URL, DEFAULT_GEOCODER_LANGUAGE,
    DEFAULT_GEOCODER_TIMEOUT_MS, DEFAULT_GEOCODER_USER_AGENT,
};
use crate::services::incident_handlers::DEFAULT_CAMERA_AUTOPLAY_DELAY_MS;
use crate::services::session::SessionOptions;

/// Where the agent's answer comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// POST the prompt to `AGENT_API_URL` and read the streamed body.
    Http,
    /// Raw text on stdin, chunked as it arrives.
    Stdin,
    /// One JSON frame per stdin line.
    Frames,
}

impl InputSource {
    pub fn parse(value: &str) -> Option<InputSource> {
        match value.trim().to_lowercase().as_str() {
            "http" => Some(InputSource::Http),
            "stdin" => Some(InputSource::Stdin),
            "frames" => Some(InputSource::Frames),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InputSource::Http => "http",
            InputSource::Stdin => "stdin",
            InputSource::Frames => "frames",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub agent_api_url: String,
    pub agent_user_id: String,
    pub agent_session_id: String,
    pub agent_request_timeout_seconds: u64,
    pub input: InputSource,
    pub geocoder_base_url: String,
    pub geocoder_language: String,
    pub geocoder_user_agent: String,
    pub geocoder_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub focus_zoom: u8,
    pub fit_padding: u32,
    pub camera_autoplay_delay_ms: u64,
    pub fire_lat: Option<f64>,
    pub fire_lon: Option<f64>,
    pub fire_address: String,
    pub fire_name: String,
    pub log_level: String,
    pub log_dir: String,
    pub log_max_files: String,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn init_global() -> Result<&'static Config, String> {
        let cfg = Config::from_env()?;
        CONFIG.set(cfg).map_err(|_| "Config already initialized".to_string())?;
        CONFIG.get().ok_or_else(|| "Config not initialized".to_string())
    }

    fn from_env() -> Result<Config, String> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Config, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read_str = |key: &str, def: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| def.to_string())
        };
        let read_u64 = |key: &str, def: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(def)
        };

        let agent_api_url = read_str("AGENT_API_URL", "");
        let agent_user_id = read_str("AGENT_USER_ID", "dashboard");
        let agent_session_id = read_str("AGENT_SESSION_ID", "");
        let agent_session_id = if agent_session_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            agent_session_id
        };
        let agent_request_timeout_seconds = read_u64("AGENT_REQUEST_TIMEOUT_SECONDS", 300);

        let input = match lookup("STREAM_INPUT").filter(|v| !v.trim().is_empty()) {
            Some(raw) => InputSource::parse(&raw)
                .ok_or_else(|| format!("STREAM_INPUT must be http, stdin or frames, got {}", raw))?,
            None if agent_api_url.is_empty() => InputSource::Stdin,
            None => InputSource::Http,
        };
        if input == InputSource::Http && agent_api_url.is_empty() {
            return Err("STREAM_INPUT=http requires AGENT_API_URL".to_string());
        }

        let fire_lat = lookup("FIRE_LAT").and_then(|v| parse_coordinate(&v));
        let fire_lon = lookup("FIRE_LON").and_then(|v| parse_coordinate(&v));
        if fire_lat.is_some() != fire_lon.is_some() {
            return Err("FIRE_LAT and FIRE_LON must be set together".to_string());
        }

        let focus_zoom = lookup("FOCUS_ZOOM")
            .and_then(|v| v.trim().parse::<u8>().ok())
            .unwrap_or(DEFAULT_FOCUS_ZOOM);
        let fit_padding = lookup("FIT_PADDING")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_FIT_PADDING);

        Ok(Config {
            agent_api_url,
            agent_user_id,
            agent_session_id,
            agent_request_timeout_seconds,
            input,
            geocoder_base_url: read_str("GEOCODER_BASE_URL", DEFAULT_GEOCODER_BASE_URL),
            geocoder_language: read_str("GEOCODER_LANGUAGE", DEFAULT_GEOCODER_LANGUAGE),
            geocoder_user_agent: read_str("GEOCODER_USER_AGENT", DEFAULT_GEOCODER_USER_AGENT),
            geocoder_timeout_ms: read_u64("GEOCODER_TIMEOUT_MS", DEFAULT_GEOCODER_TIMEOUT_MS),
            settle_delay_ms: read_u64("SETTLE_DELAY_MS", DEFAULT_SETTLE_DELAY_MS),
            focus_zoom,
            fit_padding,
            camera_autoplay_delay_ms: read_u64(
                "CAMERA_AUTOPLAY_DELAY_MS",
                DEFAULT_CAMERA_AUTOPLAY_DELAY_MS,
            ),
            fire_lat,
            fire_lon,
            fire_address: read_str("FIRE_ADDRESS", ""),
            fire_name: read_str("FIRE_NAME", ""),
            log_level: read_str("LOG_LEVEL", "info"),
            log_dir: read_str("LOG_DIR", "logs"),
            log_max_files: read_str("LOG_MAX_FILES", "7d"),
        })
    }

    pub fn fire_location(&self) -> Option<FireLocation> {
        let (lat, lon) = (self.fire_lat?, self.fire_lon?);
        Some(FireLocation {
            lat,
            lon,
            address: self.fire_address.clone(),
            name: self.fire_name.clone(),
        })
    }

    pub fn geocoder_settings(&self) -> GeocoderSettings {
        GeocoderSettings {
            base_url: self.geocoder_base_url.clone(),
            language: self.geocoder_language.clone(),
            user_agent: self.geocoder_user_agent.clone(),
            timeout: Duration::from_millis(self.geocoder_timeout_ms),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            batcher: BatcherSettings {
                settle_delay: Duration::from_millis(self.settle_delay_ms),
                focus_zoom: self.focus_zoom,
                fit_padding: self.fit_padding,
            },
            camera_autoplay_delay: Duration::from_millis(self.camera_autoplay_delay_ms),
        }
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_request_timeout_seconds)
    }

    // stdout carries map commands, so the banner goes to stderr
    pub fn print(&self) {
        eprintln!("Current configuration:");
        eprintln!("  - STREAM_INPUT: {}", self.input.as_str());
        eprintln!(
            "  - AGENT_API_URL: {}",
            if self.agent_api_url.is_empty() { "(unset)" } else { self.agent_api_url.as_str() }
        );
        eprintln!("  - AGENT_USER_ID: {}", self.agent_user_id);
        eprintln!("  - AGENT_SESSION_ID: {}", self.agent_session_id);
        eprintln!("  - AGENT_REQUEST_TIMEOUT_SECONDS: {}", self.agent_request_timeout_seconds);
        eprintln!("  - GEOCODER_BASE_URL: {}", self.geocoder_base_url);
        eprintln!("  - GEOCODER_LANGUAGE: {}", self.geocoder_language);
        eprintln!("  - Map behaviour:");
        eprintln!("    • SETTLE_DELAY_MS: {}", self.settle_delay_ms);
        eprintln!("    • FOCUS_ZOOM: {}", self.focus_zoom);
        eprintln!("    • FIT_PADDING: {}", self.fit_padding);
        eprintln!("    • CAMERA_AUTOPLAY_DELAY_MS: {}", self.camera_autoplay_delay_ms);
        match (self.fire_lat, self.fire_lon) {
            (Some(lat), Some(lon)) => eprintln!("  - FIRE: {} ({}, {})", self.fire_name, lat, lon),
            _ => eprintln!("  - FIRE: (none selected)"),
        }
        eprintln!("  - LOG_LEVEL: {}", self.log_level);
        eprintln!("  - LOG_DIR: {}", self.log_dir);
    }
}
