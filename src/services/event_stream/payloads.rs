use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::geo::{parse_coordinate, LatLon};
use crate::utils::events::EventTypes;

pub const DEFAULT_STATION_LABEL: &str = "fire station";
pub const DEFAULT_WEATHER_ADDRESS: &str = "fire site";

const WINDY_MIN_FIELDS: usize = 7;
const CCTV_MIN_FIELDS: usize = 4;
const GEOCODE_MIN_FIELDS: usize = 2;
const SEVERE_ALERT_LEVEL: f64 = 2.0;
pub const DEFAULT_ALERT_MESSAGE: &str = "alert";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Geocode,
    Address,
    Windy,
    Cctv,
    Route,
    Alert,
}

impl EventKind {
    pub fn from_type(value: &str) -> Option<EventKind> {
        match value {
            EventTypes::GEOCODE => Some(EventKind::Geocode),
            EventTypes::ADDRESS => Some(EventKind::Address),
            EventTypes::WINDY => Some(EventKind::Windy),
            EventTypes::CCTV => Some(EventKind::Cctv),
            EventTypes::ROUTE => Some(EventKind::Route),
            EventTypes::ALERT => Some(EventKind::Alert),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Geocode => EventTypes::GEOCODE,
            EventKind::Address => EventTypes::ADDRESS,
            EventKind::Windy => EventTypes::WINDY,
            EventKind::Cctv => EventTypes::CCTV,
            EventKind::Route => EventTypes::ROUTE,
            EventKind::Alert => EventTypes::ALERT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("{kind} payload needs at least {expected} fields, got {actual}")]
    Arity {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{kind} payload has invalid coordinate `{value}`")]
    Coordinate { kind: &'static str, value: String },
    #[error("{kind} payload is empty")]
    Empty { kind: &'static str },
    #[error("{kind} payload is not valid JSON: {message}")]
    Json { kind: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeEvent {
    pub point: LatLon,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub point: LatLon,
    pub temperature: String,
    pub wind_speed: String,
    pub wind_direction: String,
    pub humidity: String,
    pub pressure: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraFeed {
    pub point: LatLon,
    pub address: String,
    pub stream_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    pub points: Vec<LatLon>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertNotice {
    pub level: f64,
    pub message: String,
}

impl AlertNotice {
    pub fn is_severe(&self) -> bool {
        self.level > SEVERE_ALERT_LEVEL
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Geocode(GeocodeEvent),
    Address(String),
    Weather(WeatherReport),
    Camera(CameraFeed),
    Route(RoutePlan),
    Alert(AlertNotice),
}

#[derive(Debug, Deserialize)]
struct RouteBody {
    #[serde(default)]
    route: Option<Vec<(f64, f64)>>,
}

#[derive(Debug, Deserialize)]
struct AlertBody {
    #[serde(default)]
    level: Value,
    #[serde(default)]
    alert: Option<String>,
}

/// Loose numeric reading of an alert level: numbers as-is, numeric strings
/// parsed, anything else counts as level 0.
fn alert_level(value: &Value) -> f64 {
    match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|level| level.is_finite())
            .unwrap_or(0.0),
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        _ => 0.0,
    }
}

pub fn decode(kind: EventKind, body: &str) -> Result<StreamEvent, PayloadError> {
    match kind {
        EventKind::Geocode => decode_geocode(body).map(StreamEvent::Geocode),
        EventKind::Address => decode_address(body).map(StreamEvent::Address),
        EventKind::Windy => decode_weather(body).map(StreamEvent::Weather),
        EventKind::Cctv => decode_camera(body).map(StreamEvent::Camera),
        EventKind::Route => decode_route(body).map(StreamEvent::Route),
        EventKind::Alert => decode_alert(body).map(StreamEvent::Alert),
    }
}

fn split_fields(body: &str) -> Vec<&str> {
    body.split(',').collect()
}

/// Fields from `start` onwards joined back together; the last positional
/// field of several payloads may itself contain commas.
fn remainder(fields: &[&str], start: usize) -> Option<String> {
    if fields.len() <= start {
        return None;
    }
    let joined = fields[start..].join(",");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn require_fields<'a>(
    kind: EventKind,
    body: &'a str,
    expected: usize,
) -> Result<Vec<&'a str>, PayloadError> {
    let fields = split_fields(body);
    if fields.len() < expected {
        return Err(PayloadError::Arity {
            kind: kind.as_str(),
            expected,
            actual: fields.len(),
        });
    }
    Ok(fields)
}

fn point_from(kind: EventKind, lat: &str, lon: &str) -> Result<LatLon, PayloadError> {
    let lat_value = parse_coordinate(lat).ok_or_else(|| PayloadError::Coordinate {
        kind: kind.as_str(),
        value: lat.trim().to_string(),
    })?;
    let lon_value = parse_coordinate(lon).ok_or_else(|| PayloadError::Coordinate {
        kind: kind.as_str(),
        value: lon.trim().to_string(),
    })?;
    Ok(LatLon::new(lat_value, lon_value))
}

fn decode_geocode(body: &str) -> Result<GeocodeEvent, PayloadError> {
    let fields = require_fields(EventKind::Geocode, body, GEOCODE_MIN_FIELDS)?;
    let point = point_from(EventKind::Geocode, fields[0], fields[1])?;
    let label = remainder(&fields, 2).unwrap_or_else(|| DEFAULT_STATION_LABEL.to_string());
    Ok(GeocodeEvent { point, label })
}

fn decode_address(body: &str) -> Result<String, PayloadError> {
    let address = body.trim();
    if address.is_empty() {
        return Err(PayloadError::Empty {
            kind: EventKind::Address.as_str(),
        });
    }
    Ok(address.to_string())
}

fn decode_weather(body: &str) -> Result<WeatherReport, PayloadError> {
    let fields = require_fields(EventKind::Windy, body, WINDY_MIN_FIELDS)?;
    let point = point_from(EventKind::Windy, fields[0], fields[1])?;
    Ok(WeatherReport {
        point,
        temperature: fields[2].trim().to_string(),
        wind_speed: fields[3].trim().to_string(),
        wind_direction: fields[4].trim().to_string(),
        humidity: fields[5].trim().to_string(),
        pressure: fields[6].trim().to_string(),
        address: remainder(&fields, 7).unwrap_or_else(|| DEFAULT_WEATHER_ADDRESS.to_string()),
    })
}

fn decode_camera(body: &str) -> Result<CameraFeed, PayloadError> {
    let fields = require_fields(EventKind::Cctv, body, CCTV_MIN_FIELDS)?;
    let point = point_from(EventKind::Cctv, fields[0], fields[1])?;
    let stream_url = remainder(&fields, 3).ok_or(PayloadError::Empty {
        kind: EventKind::Cctv.as_str(),
    })?;
    Ok(CameraFeed {
        point,
        address: fields[2].trim().to_string(),
        stream_url,
    })
}

fn decode_route(body: &str) -> Result<RoutePlan, PayloadError> {
    let parsed: RouteBody =
        serde_json::from_str(body.trim()).map_err(|err| PayloadError::Json {
            kind: EventKind::Route.as_str(),
            message: err.to_string(),
        })?;
    let points = parsed
        .route
        .unwrap_or_default()
        .into_iter()
        .map(|(lat, lon)| LatLon::new(lat, lon))
        .collect();
    Ok(RoutePlan { points })
}

fn decode_alert(body: &str) -> Result<AlertNotice, PayloadError> {
    let parsed: AlertBody =
        serde_json::from_str(body.trim()).map_err(|err| PayloadError::Json {
            kind: EventKind::Alert.as_str(),
            message: err.to_string(),
        })?;
    let message = parsed
        .alert
        .map(|alert| alert.trim().to_string())
        .filter(|alert| !alert.is_empty())
        .unwrap_or_else(|| DEFAULT_ALERT_MESSAGE.to_string());
    Ok(AlertNotice {
        level: alert_level(&parsed.level),
        message,
    })
}
