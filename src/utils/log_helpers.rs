use tracing::{error, info, warn};

use crate::services::event_stream::FeedReport;

pub fn truncate_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }

    let mut cut = max_len;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = value[..cut].to_string();
    out.push_str("...[truncated]");
    out
}

pub fn log_session_begin(session_id: &str, source: &str, has_fire: bool, geocoder_url: &str) {
    info!(
        "[STREAM] begin: session={}, source={}, fireSelected={}, geocoder={}",
        session_id,
        source,
        has_fire,
        if geocoder_url.is_empty() { "(default)" } else { geocoder_url }
    );
}

pub fn log_session_end(session_id: &str, report: &FeedReport, discarded_bytes: usize) {
    info!(
        "[STREAM] end: session={}, matched={}, delivered={}, rejected={}, ignored={}, discardedBytes={}",
        session_id,
        report.matched,
        report.delivered,
        report.rejected,
        report.ignored,
        discarded_bytes
    );
}

pub fn log_session_cancelled(session_id: &str) {
    warn!("[STREAM] cancelled: session={}", session_id);
}

pub fn log_session_error(err: &str) {
    error!("[STREAM] error: {}", err);
}
