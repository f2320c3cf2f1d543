use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::geo::{GeoBounds, LatLon};
use crate::services::event_stream::{AlertNotice, CameraFeed, WeatherReport};

pub const STATION_LINK_COLOR: &str = "#007fff";
pub const CAMERA_LINK_COLOR: &str = "#9c27b0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Station,
    Cctv,
}

/// What the view should do next. Serialized one per line for whatever
/// front end renders the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MapCommand {
    CenterOn {
        point: LatLon,
        zoom: u8,
    },
    FitRegion {
        bounds: GeoBounds,
        padding: u32,
        max_zoom: u8,
    },
    AddMarker {
        kind: MarkerKind,
        point: LatLon,
        label: String,
    },
    DrawConnector {
        from: LatLon,
        to: LatLon,
        color: String,
    },
    ShowWeather {
        report: WeatherReport,
    },
    DrawRoute {
        points: Vec<LatLon>,
    },
    ShowAlert {
        level: f64,
        message: String,
        severe: bool,
    },
    OpenCameraFeed {
        stream_url: String,
        address: String,
    },
}

pub trait MapView: Send + Sync {
    fn center_on(&self, point: LatLon, zoom: u8);
    fn fit_to_region(&self, bounds: GeoBounds, padding: u32, max_zoom: u8);
    fn add_marker(&self, kind: MarkerKind, point: LatLon, label: &str);
    fn draw_connector(&self, from: LatLon, to: LatLon, color: &str);
    fn show_weather(&self, report: &WeatherReport);
    fn draw_route(&self, points: &[LatLon]);
    fn show_alert(&self, alert: &AlertNotice);
    fn open_camera_feed(&self, feed: &CameraFeed);
}

#[derive(Clone)]
pub struct MapCommandSender {
    tx: mpsc::UnboundedSender<MapCommand>,
}

impl MapCommandSender {
    pub fn send(&self, command: MapCommand) {
        if let Err(err) = self.tx.send(command) {
            warn!(error = %err, "map command send failed");
        }
    }
}

impl MapView for MapCommandSender {
    fn center_on(&self, point: LatLon, zoom: u8) {
        self.send(MapCommand::CenterOn { point, zoom });
    }

    fn fit_to_region(&self, bounds: GeoBounds, padding: u32, max_zoom: u8) {
        self.send(MapCommand::FitRegion {
            bounds,
            padding,
            max_zoom,
        });
    }

    fn add_marker(&self, kind: MarkerKind, point: LatLon, label: &str) {
        self.send(MapCommand::AddMarker {
            kind,
            point,
            label: label.to_string(),
        });
    }

    fn draw_connector(&self, from: LatLon, to: LatLon, color: &str) {
        self.send(MapCommand::DrawConnector {
            from,
            to,
            color: color.to_string(),
        });
    }

    fn show_weather(&self, report: &WeatherReport) {
        self.send(MapCommand::ShowWeather {
            report: report.clone(),
        });
    }

    fn draw_route(&self, points: &[LatLon]) {
        self.send(MapCommand::DrawRoute {
            points: points.to_vec(),
        });
    }

    fn show_alert(&self, alert: &AlertNotice) {
        self.send(MapCommand::ShowAlert {
            level: alert.level,
            message: alert.message.clone(),
            severe: alert.is_severe(),
        });
    }

    fn open_camera_feed(&self, feed: &CameraFeed) {
        self.send(MapCommand::OpenCameraFeed {
            stream_url: feed.stream_url.clone(),
            address: feed.address.clone(),
        });
    }
}

pub fn map_command_channel() -> (MapCommandSender, mpsc::UnboundedReceiver<MapCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MapCommandSender { tx }, rx)
}

#[derive(Debug, Serialize)]
struct MapCommandLine<'a> {
    timestamp: String,
    session_id: &'a str,
    command: &'a MapCommand,
}

pub fn to_json_line(session_id: &str, command: &MapCommand) -> String {
    let line = MapCommandLine {
        timestamp: chrono::Utc::now().to_rfc3339(),
        session_id,
        command,
    };
    serde_json::to_string(&line).unwrap_or_else(|err| {
        warn!(error = %err, "map command serialization failed");
        String::new()
    })
}

#[cfg(test)]
pub(crate) fn drain_commands(rx: &mut mpsc::UnboundedReceiver<MapCommand>) -> Vec<MapCommand> {
    let mut commands = Vec::new();
    while let Ok(command) = rx.try_recv() {
        commands.push(command);
    }
    commands
}
