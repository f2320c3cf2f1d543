use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::core::geo::{FireLocation, LatLon};
use crate::services::arrival_batcher::ArrivalBatcher;
use crate::services::event_stream::{
    AlertNotice, CameraFeed, EventHandlers, GeocodeEvent, RoutePlan, WeatherReport,
};
use crate::services::geocoder::Geocoder;
use crate::services::map_view::{MapView, MarkerKind, CAMERA_LINK_COLOR, STATION_LINK_COLOR};

pub const DEFAULT_CAMERA_AUTOPLAY_DELAY_MS: u64 = 1_200;

/// Everything the dashboard handlers reach for. Built once per session.
#[derive(Clone)]
pub struct IncidentContext {
    pub fire: Option<FireLocation>,
    pub view: Arc<dyn MapView>,
    pub geocoder: Arc<dyn Geocoder>,
    pub batcher: ArrivalBatcher,
    pub tasks: TaskTracker,
    pub token: CancellationToken,
    pub camera_autoplay_delay: Duration,
}

impl IncidentContext {
    fn fire_point(&self) -> Option<LatLon> {
        self.fire.as_ref().map(FireLocation::point)
    }

    fn link_from_fire(&self, to: LatLon, color: &str) {
        if let Some(from) = self.fire_point() {
            self.view.draw_connector(from, to, color);
        }
    }
}

pub fn build_incident_handlers(ctx: &IncidentContext) -> EventHandlers {
    let camera_opened = Arc::new(AtomicBool::new(false));

    let geocode_ctx = ctx.clone();
    let address_ctx = ctx.clone();
    let weather_ctx = ctx.clone();
    let camera_ctx = ctx.clone();
    let route_ctx = ctx.clone();
    let alert_ctx = ctx.clone();

    EventHandlers {
        on_geocode: Some(Arc::new(move |event: GeocodeEvent| {
            on_station(&geocode_ctx, event)
        })),
        on_address: Some(Arc::new(move |address: String| {
            on_address(&address_ctx, address)
        })),
        on_weather: Some(Arc::new(move |report: WeatherReport| {
            on_weather(&weather_ctx, report)
        })),
        on_camera: Some(Arc::new(move |feed: CameraFeed| {
            on_camera(&camera_ctx, &camera_opened, feed)
        })),
        on_route: Some(Arc::new(move |plan: RoutePlan| on_route(&route_ctx, plan))),
        on_alert: Some(Arc::new(move |alert: AlertNotice| {
            on_alert(&alert_ctx, alert)
        })),
    }
}

fn on_station(ctx: &IncidentContext, event: GeocodeEvent) {
    info!(
        "[EVENT] station: {} ({}, {})",
        event.label, event.point.lat, event.point.lon
    );
    ctx.view
        .add_marker(MarkerKind::Station, event.point, &event.label);
    ctx.link_from_fire(event.point, STATION_LINK_COLOR);
    ctx.batcher.enqueue_anchored(event.point, ctx.fire_point());
}

fn on_address(ctx: &IncidentContext, address: String) {
    let tasks = ctx.tasks.clone();
    let ctx = ctx.clone();
    tasks.spawn(async move {
        let lookup = ctx.geocoder.lookup(&address);
        let result = tokio::select! {
            _ = ctx.token.cancelled() => {
                debug!("[GEOCODE] cancelled: {}", address);
                return;
            }
            result = lookup => result,
        };

        match result {
            Ok(Some(point)) => {
                info!("[GEOCODE] resolved {} -> ({}, {})", address, point.lat, point.lon);
                ctx.view.add_marker(MarkerKind::Station, point, &address);
                ctx.link_from_fire(point, STATION_LINK_COLOR);
                ctx.batcher.enqueue(point);
            }
            Ok(None) => warn!("[GEOCODE] no coordinates for address: {}", address),
            Err(err) => warn!("[GEOCODE] lookup failed for {}: {}", address, err),
        }
    });
}

fn on_weather(ctx: &IncidentContext, mut report: WeatherReport) {
    if let Some(fire) = ctx.fire.as_ref() {
        report.point = fire.point();
        if !fire.address.trim().is_empty() {
            report.address = fire.address.clone();
        }
    }
    ctx.view.show_weather(&report);
}

fn on_camera(ctx: &IncidentContext, opened: &AtomicBool, feed: CameraFeed) {
    info!("[EVENT] cctv: {} ({}, {})", feed.address, feed.point.lat, feed.point.lon);
    ctx.view.add_marker(MarkerKind::Cctv, feed.point, &feed.address);
    ctx.link_from_fire(feed.point, CAMERA_LINK_COLOR);
    ctx.batcher.enqueue_anchored(feed.point, ctx.fire_point());

    if opened.swap(true, Ordering::SeqCst) {
        return;
    }
    let view = ctx.view.clone();
    let token = ctx.token.clone();
    let delay = ctx.camera_autoplay_delay;
    ctx.tasks.spawn(async move {
        tokio::select! {
            _ = token.cancelled() => debug!("[EVENT] camera autoplay cancelled"),
            _ = tokio::time::sleep(delay) => view.open_camera_feed(&feed),
        }
    });
}

fn on_route(ctx: &IncidentContext, plan: RoutePlan) {
    if plan.points.is_empty() {
        debug!("[EVENT] route without points, nothing drawn");
        return;
    }
    ctx.view.draw_route(&plan.points);
}

fn on_alert(ctx: &IncidentContext, alert: AlertNotice) {
    if alert.is_severe() {
        warn!("[EVENT] severe alert level={}: {}", alert.level, alert.message);
    } else {
        info!("[EVENT] alert level={}: {}", alert.level, alert.message);
    }
    ctx.view.show_alert(&alert);
}
