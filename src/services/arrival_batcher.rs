use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::geo::{GeoBounds, LatLon};
use crate::services::map_view::MapView;

pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;
pub const DEFAULT_FOCUS_ZOOM: u8 = 14;
pub const DEFAULT_FIT_PADDING: u32 = 50;

#[derive(Debug, Clone)]
pub struct BatcherSettings {
    pub settle_delay: Duration,
    pub focus_zoom: u8,
    pub fit_padding: u32,
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            focus_zoom: DEFAULT_FOCUS_ZOOM,
            fit_padding: DEFAULT_FIT_PADDING,
        }
    }
}

#[derive(Default)]
struct BatchState {
    pending: Vec<LatLon>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
    closed: bool,
}

impl BatchState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.deadline = None;
    }
}

/// Debounces marker arrivals into one viewport move. Every arrival restarts
/// the settle timer; the view only moves once arrivals stop for a full
/// settle delay. At most one timer is ever outstanding.
#[derive(Clone)]
pub struct ArrivalBatcher {
    state: Arc<Mutex<BatchState>>,
    idle: Arc<Notify>,
    view: Arc<dyn MapView>,
    settings: BatcherSettings,
    token: CancellationToken,
}

impl ArrivalBatcher {
    pub fn new(view: Arc<dyn MapView>, settings: BatcherSettings, token: CancellationToken) -> Self {
        Self {
            state: Arc::new(Mutex::new(BatchState::default())),
            idle: Arc::new(Notify::new()),
            view,
            settings,
            token,
        }
    }

    pub fn enqueue(&self, point: LatLon) {
        self.enqueue_anchored(point, None);
    }

    /// Like `enqueue`, but when nothing is pending yet `anchor` goes in first
    /// so the eventual fit also covers it.
    pub fn enqueue_anchored(&self, point: LatLon, anchor: Option<LatLon>) {
        let mut state = self.state.lock();
        if state.closed || self.token.is_cancelled() {
            debug!("[BATCH] session closed, dropping arrival");
            return;
        }
        if state.pending.is_empty() {
            if let Some(anchor) = anchor {
                state.pending.push(anchor);
            }
        }
        state.pending.push(point);
        self.reschedule(&mut state);
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Resolves once no flush is outstanding.
    pub async fn settle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.state.lock().deadline.is_none() {
                return;
            }
            notified.await;
        }
    }

    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.cancel_timer();
            state.pending.clear();
        }
        self.idle.notify_waiters();
    }

    fn reschedule(&self, state: &mut BatchState) {
        state.cancel_timer();
        state.generation += 1;

        let generation = state.generation;
        let deadline = Instant::now() + self.settings.settle_delay;
        state.deadline = Some(deadline);

        let batcher = self.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = batcher.token.cancelled() => batcher.shutdown(),
                _ = time::sleep_until(deadline) => batcher.flush(generation),
            }
        }));
    }

    fn flush(&self, generation: u64) {
        let points = {
            let mut state = self.state.lock();
            if state.closed || self.token.is_cancelled() || state.generation != generation {
                return;
            }
            state.timer = None;
            state.deadline = None;
            std::mem::take(&mut state.pending)
        };

        self.fit(&points);
        self.idle.notify_waiters();
    }

    fn fit(&self, points: &[LatLon]) {
        match points {
            [] => {}
            [single] => {
                info!(
                    "[BATCH] center on single arrival: lat={}, lon={}",
                    single.lat, single.lon
                );
                self.view.center_on(*single, self.settings.focus_zoom);
            }
            _ => {
                if let Some(bounds) = GeoBounds::covering(points) {
                    info!("[BATCH] fit region around {} arrivals", points.len());
                    self.view.fit_to_region(
                        bounds,
                        self.settings.fit_padding,
                        self.settings.focus_zoom,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::map_view::{drain_commands, map_command_channel, MapCommand};

    fn batcher() -> (
        ArrivalBatcher,
        tokio::sync::mpsc::UnboundedReceiver<MapCommand>,
        CancellationToken,
    ) {
        let (view, rx) = map_command_channel();
        let token = CancellationToken::new();
        let batcher = ArrivalBatcher::new(Arc::new(view), BatcherSettings::default(), token.clone());
        (batcher, rx, token)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_arrivals_produces_one_region_fit_after_quiet_period() {
        let (batcher, mut rx, _token) = batcher();
        let points: Vec<LatLon> = (0..5)
            .map(|i| LatLon::new(36.80 + i as f64 * 0.01, 127.10 + i as f64 * 0.02))
            .collect();

        for point in &points {
            batcher.enqueue(*point);
            time::sleep(Duration::from_millis(100)).await;
        }
        // last arrival at t=400ms, so nothing may move before t=900ms
        time::sleep(Duration::from_millis(398)).await;
        assert!(drain_commands(&mut rx).is_empty());
        assert_eq!(batcher.pending_len(), 5);

        time::sleep(Duration::from_millis(5)).await;
        let commands = drain_commands(&mut rx);
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            MapCommand::FitRegion {
                bounds,
                padding,
                max_zoom,
            } => {
                assert!(points.iter().all(|point| bounds.contains(*point)));
                assert_eq!(*padding, DEFAULT_FIT_PADDING);
                assert_eq!(*max_zoom, DEFAULT_FOCUS_ZOOM);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(batcher.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_arrival_centers_instead_of_fitting() {
        let (batcher, mut rx, _token) = batcher();

        batcher.enqueue(LatLon::new(37.1, 127.2));
        time::sleep(Duration::from_millis(600)).await;

        assert_eq!(
            drain_commands(&mut rx),
            vec![MapCommand::CenterOn {
                point: LatLon::new(37.1, 127.2),
                zoom: DEFAULT_FOCUS_ZOOM,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn anchor_is_only_added_to_an_empty_batch() {
        let (batcher, mut rx, _token) = batcher();
        let fire = LatLon::new(36.0, 127.0);

        batcher.enqueue_anchored(LatLon::new(36.5, 127.5), Some(fire));
        batcher.enqueue_anchored(LatLon::new(36.6, 127.6), Some(fire));
        assert_eq!(batcher.pending_len(), 3);

        batcher.settle().await;
        let commands = drain_commands(&mut rx);
        assert_eq!(commands.len(), 1);
        let MapCommand::FitRegion { bounds, .. } = &commands[0] else {
            panic!("expected region fit");
        };
        assert_eq!(bounds.south, 36.0);
        assert_eq!(bounds.north, 36.6);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_quiet_periods_flush_separately() {
        let (batcher, mut rx, _token) = batcher();

        batcher.enqueue(LatLon::new(1.0, 1.0));
        time::sleep(Duration::from_millis(700)).await;
        batcher.enqueue(LatLon::new(2.0, 2.0));
        batcher.enqueue(LatLon::new(3.0, 3.0));
        time::sleep(Duration::from_millis(700)).await;

        let commands = drain_commands(&mut rx);
        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[0], MapCommand::CenterOn { .. }));
        assert!(matches!(commands[1], MapCommand::FitRegion { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_pending_timer_and_later_arrivals() {
        let (batcher, mut rx, _token) = batcher();

        batcher.enqueue(LatLon::new(1.0, 1.0));
        batcher.shutdown();
        batcher.enqueue(LatLon::new(2.0, 2.0));
        time::sleep(Duration::from_millis(1_000)).await;

        assert!(drain_commands(&mut rx).is_empty());
        assert_eq!(batcher.pending_len(), 0);
        batcher.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_timer_after_cancel_does_not_move_the_view() {
        let (batcher, mut rx, token) = batcher();

        batcher.enqueue(LatLon::new(1.0, 1.0));
        let generation = batcher.state.lock().generation;
        token.cancel();
        // the sleep branch won the race before shutdown ran
        batcher.flush(generation);

        assert!(drain_commands(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_session_turns_stale_timer_into_no_op() {
        let (batcher, mut rx, token) = batcher();

        batcher.enqueue(LatLon::new(1.0, 1.0));
        token.cancel();
        time::sleep(Duration::from_millis(1_000)).await;

        assert!(drain_commands(&mut rx).is_empty());
        batcher.enqueue(LatLon::new(2.0, 2.0));
        assert_eq!(batcher.pending_len(), 0);
    }
}
