use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::geo::FireLocation;
use crate::services::arrival_batcher::{ArrivalBatcher, BatcherSettings};
use crate::services::event_stream::{EventParser, FeedReport, Transcript};
use crate::services::geocoder::Geocoder;
use crate::services::incident_handlers::{
    build_incident_handlers, IncidentContext, DEFAULT_CAMERA_AUTOPLAY_DELAY_MS,
};
use crate::services::map_view::MapView;
use crate::utils::log_helpers::{log_session_cancelled, log_session_end};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub batcher: BatcherSettings,
    pub camera_autoplay_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            batcher: BatcherSettings::default(),
            camera_autoplay_delay: Duration::from_millis(DEFAULT_CAMERA_AUTOPLAY_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub report: FeedReport,
    pub display_text: String,
    pub discarded_bytes: usize,
}

/// One streamed analysis: parser, transcript and the map side effects it
/// drives. Dropping a session cancels its timers and background lookups.
pub struct StreamSession {
    id: String,
    parser: EventParser,
    transcript: Transcript,
    batcher: ArrivalBatcher,
    tasks: TaskTracker,
    token: CancellationToken,
}

impl StreamSession {
    pub fn start(
        id: impl Into<String>,
        fire: Option<FireLocation>,
        view: Arc<dyn MapView>,
        geocoder: Arc<dyn Geocoder>,
        options: SessionOptions,
    ) -> Self {
        let token = CancellationToken::new();
        let tasks = TaskTracker::new();
        let batcher = ArrivalBatcher::new(view.clone(), options.batcher, token.clone());
        let ctx = IncidentContext {
            fire,
            view,
            geocoder,
            batcher: batcher.clone(),
            tasks: tasks.clone(),
            token: token.clone(),
            camera_autoplay_delay: options.camera_autoplay_delay,
        };

        Self {
            id: id.into(),
            parser: EventParser::new(build_incident_handlers(&ctx)),
            transcript: Transcript::default(),
            batcher,
            tasks,
            token,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn feed(&mut self, chunk: &str) -> FeedReport {
        self.transcript.push(chunk);
        self.parser.feed(chunk)
    }

    pub fn display_text(&self) -> String {
        self.transcript.render()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Ends the stream normally: waits for background lookups and for the
    /// last viewport move before reporting.
    pub async fn finish(mut self) -> SessionSummary {
        let discarded_bytes = self.parser.finish().map(|rest| rest.len()).unwrap_or(0);

        self.tasks.close();
        self.tasks.wait().await;
        self.batcher.settle().await;

        let report = self.parser.totals();
        log_session_end(&self.id, &report, discarded_bytes);
        SessionSummary {
            session_id: self.id.clone(),
            report,
            display_text: self.transcript.render(),
            discarded_bytes,
        }
    }

    pub fn abort(self) {
        log_session_cancelled(&self.id);
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.token.cancel();
        self.batcher.shutdown();
        self.tasks.close();
    }
}
