use std::sync::Arc;

use tracing::{debug, warn};

use super::extractor::RawEvent;
use super::payloads::{
    decode, AlertNotice, CameraFeed, EventKind, GeocodeEvent, RoutePlan, StreamEvent,
    WeatherReport,
};

pub type EventCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Handler table, fixed when the parser is built. A kind with no callback is
/// skipped without decoding its body.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub on_geocode: Option<EventCallback<GeocodeEvent>>,
    pub on_address: Option<EventCallback<String>>,
    pub on_weather: Option<EventCallback<WeatherReport>>,
    pub on_camera: Option<EventCallback<CameraFeed>>,
    pub on_route: Option<EventCallback<RoutePlan>>,
    pub on_alert: Option<EventCallback<AlertNotice>>,
}

impl EventHandlers {
    pub fn handles(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Geocode => self.on_geocode.is_some(),
            EventKind::Address => self.on_address.is_some(),
            EventKind::Windy => self.on_weather.is_some(),
            EventKind::Cctv => self.on_camera.is_some(),
            EventKind::Route => self.on_route.is_some(),
            EventKind::Alert => self.on_alert.is_some(),
        }
    }

    fn deliver(&self, event: StreamEvent) {
        match event {
            StreamEvent::Geocode(payload) => {
                if let Some(cb) = &self.on_geocode {
                    cb(payload);
                }
            }
            StreamEvent::Address(payload) => {
                if let Some(cb) = &self.on_address {
                    cb(payload);
                }
            }
            StreamEvent::Weather(payload) => {
                if let Some(cb) = &self.on_weather {
                    cb(payload);
                }
            }
            StreamEvent::Camera(payload) => {
                if let Some(cb) = &self.on_camera {
                    cb(payload);
                }
            }
            StreamEvent::Route(payload) => {
                if let Some(cb) = &self.on_route {
                    cb(payload);
                }
            }
            StreamEvent::Alert(payload) => {
                if let Some(cb) = &self.on_alert {
                    cb(payload);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered(EventKind),
    Rejected(EventKind),
    Unregistered(EventKind),
    Unknown,
}

pub(super) fn dispatch(handlers: &EventHandlers, raw: &RawEvent) -> DispatchOutcome {
    let Some(kind) = EventKind::from_type(raw.kind.as_str()) else {
        debug!("[EVENT] ignoring unknown type: {}", raw.kind);
        return DispatchOutcome::Unknown;
    };
    if !handlers.handles(kind) {
        debug!("[EVENT] no handler registered: {}", kind.as_str());
        return DispatchOutcome::Unregistered(kind);
    }

    match decode(kind, raw.body.as_str()) {
        Ok(event) => {
            debug!("[EVENT] dispatch: type={}", kind.as_str());
            handlers.deliver(event);
            DispatchOutcome::Delivered(kind)
        }
        Err(err) => {
            warn!("[EVENT] dropped malformed payload: {} body={:?}", err, raw.body);
            DispatchOutcome::Rejected(kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn raw(kind: &str, body: &str) -> RawEvent {
        RawEvent {
            kind: kind.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn dispatch_delivers_typed_payload_to_matching_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handlers = EventHandlers {
            on_alert: Some(Arc::new(move |alert: AlertNotice| sink.lock().push(alert))),
            ..Default::default()
        };

        let outcome = dispatch(&handlers, &raw("example2", r#"{"level":3,"alert":"X"}"#));

        assert_eq!(outcome, DispatchOutcome::Delivered(EventKind::Alert));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, "X");
    }

    #[test]
    fn dispatch_ignores_unknown_and_unregistered_types() {
        let handlers = EventHandlers::default();

        assert_eq!(
            dispatch(&handlers, &raw("traffic", "anything")),
            DispatchOutcome::Unknown
        );
        assert_eq!(
            dispatch(&handlers, &raw("geocode", "1,2")),
            DispatchOutcome::Unregistered(EventKind::Geocode)
        );
    }

    #[test]
    fn dispatch_rejects_malformed_payload_without_calling_handler() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let handlers = EventHandlers {
            on_weather: Some(Arc::new(move |_report: WeatherReport| *counter.lock() += 1)),
            ..Default::default()
        };

        let outcome = dispatch(&handlers, &raw("windy", "36.8,127.1,21,3.4"));

        assert_eq!(outcome, DispatchOutcome::Rejected(EventKind::Windy));
        assert_eq!(*calls.lock(), 0);
    }
}
