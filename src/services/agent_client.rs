use std::future::Future;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::geo::FireLocation;
use crate::utils::log_helpers::truncate_log;

#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub prompt: String,
    pub actor_id: String,
    pub session_id: String,
}

/// Streams a plain-text analysis from the agent endpoint.
pub struct AgentClient {
    client: Client,
    url: String,
}

impl AgentClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| format!("build agent client failed: {}", err))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn stream_analysis<F>(
        &self,
        request: &AgentRequest,
        token: Option<CancellationToken>,
        on_chunk: F,
    ) -> Result<(), String>
    where
        F: FnMut(&str),
    {
        info!(
            "[AGENT] request: url={}, actor={}, session={}, promptLen={}",
            self.url,
            request.actor_id,
            request.session_id,
            request.prompt.len()
        );
        let resp = await_with_optional_abort(
            self.client.post(&self.url).json(request).send(),
            token.clone(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let err_text = truncate_log(&text, 2000);
            error!(
                "[AGENT] stream request failed: status={}, error={}",
                status, err_text
            );
            return Err(format!("agent status {}: {}", status.as_u16(), err_text));
        }

        consume_text_stream(Box::pin(resp.bytes_stream()), token, on_chunk).await
    }
}

pub(crate) async fn await_with_optional_abort<F, T, E>(
    future: F,
    token: Option<CancellationToken>,
) -> Result<T, String>
where
    F: Future<Output = Result<T, E>>,
    E: ToString,
{
    if let Some(token) = token {
        tokio::select! {
            _ = token.cancelled() => Err("aborted".to_string()),
            value = future => value.map_err(|err| err.to_string()),
        }
    } else {
        future.await.map_err(|err| err.to_string())
    }
}

/// Reassembles UTF-8 text from byte chunks that may split a character.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    carry: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(text) => {
                    out.push_str(text);
                    self.carry.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + bad);
                        }
                        None => {
                            // incomplete tail, wait for the next chunk
                            self.carry.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.carry).to_string();
        self.carry.clear();
        Some(rest)
    }
}

/// Next stream item, or `Err("aborted")` as soon as the token fires, even
/// while the source is idle.
async fn next_or_abort<S>(
    stream: &mut S,
    token: Option<&CancellationToken>,
) -> Result<Option<S::Item>, String>
where
    S: Stream + Unpin,
{
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err("aborted".to_string()),
            item = stream.next() => Ok(item),
        },
        None => Ok(stream.next().await),
    }
}

pub(crate) async fn consume_text_stream<S, E, F>(
    mut stream: S,
    token: Option<CancellationToken>,
    mut on_chunk: F,
) -> Result<(), String>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: ToString,
    F: FnMut(&str),
{
    let mut decoder = Utf8ChunkDecoder::default();

    while let Some(chunk) = next_or_abort(&mut stream, token.as_ref()).await? {
        let bytes = chunk.map_err(|err| err.to_string())?;
        let text = decoder.push(&bytes);
        if !text.is_empty() {
            on_chunk(&text);
        }
    }

    if let Some(rest) = decoder.finish() {
        on_chunk(&rest);
    }
    Ok(())
}

/// One line of the framed transport.
#[derive(Debug, Default, Deserialize)]
pub struct AgentFrame {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stop: Option<Value>,
    #[serde(default)]
    pub end_event_loop: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameUpdate {
    pub status: Option<String>,
    pub data: Option<String>,
    pub finished: bool,
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

impl AgentFrame {
    pub fn into_update(self) -> FrameUpdate {
        let finished = truthy(self.stop.as_ref()) || truthy(self.end_event_loop.as_ref());
        if self.intent.is_some() {
            return FrameUpdate {
                status: self.message,
                data: None,
                finished: false,
            };
        }
        FrameUpdate {
            status: None,
            data: self.data.filter(|data| !data.is_empty()),
            finished,
        }
    }
}

pub fn decode_frame(line: &str) -> Option<FrameUpdate> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<AgentFrame>(trimmed) {
        Ok(frame) => Some(frame.into_update()),
        Err(err) => {
            debug!("[AGENT] ignoring undecodable frame: {} ({})", truncate_log(trimmed, 200), err);
            None
        }
    }
}

/// Feeds `data` of each frame to `on_data` until a frame says the stream is
/// over or the source runs dry.
pub async fn consume_frame_stream<S, E, F>(
    mut lines: S,
    token: Option<CancellationToken>,
    mut on_data: F,
) -> Result<(), String>
where
    S: Stream<Item = Result<String, E>> + Unpin,
    E: ToString,
    F: FnMut(&str),
{
    while let Some(line) = next_or_abort(&mut lines, token.as_ref()).await? {
        let line = line.map_err(|err| err.to_string())?;
        let Some(update) = decode_frame(&line) else {
            continue;
        };
        if let Some(status) = update.status.as_deref() {
            info!("[AGENT] status: {}", status);
        }
        if let Some(data) = update.data.as_deref() {
            on_data(data);
        }
        if update.finished {
            debug!("[AGENT] frame stream finished");
            break;
        }
    }
    Ok(())
}

pub fn build_analysis_prompt(fire: &FireLocation) -> String {
    let place = if fire.address.trim().is_empty() {
        fire.name.trim()
    } else {
        fire.address.trim()
    };
    format!(
        "A wildfire has been reported at {} (lat {}, lon {}). \
         Analyse the situation and propose a suppression and dispatch plan: \
         nearby fire stations, available CCTV, current weather and wind, \
         and an access route for the first responders.",
        place, fire.lat, fire.lon
    )
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[tokio::test]
    async fn text_stream_reassembles_split_multibyte_characters() {
        let word = "화재 발생".as_bytes().to_vec();
        let chunks: Vec<Result<bytes::Bytes, String>> = vec![
            Ok(bytes::Bytes::copy_from_slice(&word[..1])),
            Ok(bytes::Bytes::copy_from_slice(&word[1..5])),
            Ok(bytes::Bytes::copy_from_slice(&word[5..])),
        ];
        let mut out = Vec::new();

        consume_text_stream(stream::iter(chunks), None, |text| out.push(text.to_string()))
            .await
            .expect("stream should finish");

        assert_eq!(out.concat(), "화재 발생");
        assert!(out.iter().all(|piece| !piece.contains(char::REPLACEMENT_CHARACTER)));
    }

    #[tokio::test]
    async fn text_stream_propagates_transport_errors() {
        let chunks: Vec<Result<bytes::Bytes, String>> = vec![
            Ok(bytes::Bytes::from_static(b"partial")),
            Err("connection reset".to_string()),
        ];
        let mut seen = String::new();

        let result = consume_text_stream(stream::iter(chunks), None, |text| seen.push_str(text)).await;

        assert_eq!(result, Err("connection reset".to_string()));
        assert_eq!(seen, "partial");
    }

    #[tokio::test]
    async fn text_stream_stops_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let chunks: Vec<Result<bytes::Bytes, String>> =
            vec![Ok(bytes::Bytes::from_static(b"never"))];

        let result = consume_text_stream(stream::iter(chunks), Some(token), |_| {}).await;

        assert_eq!(result, Err("aborted".to_string()));
    }

    #[tokio::test]
    async fn text_stream_aborts_while_source_is_idle() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            consume_text_stream(
                stream::pending::<Result<bytes::Bytes, String>>(),
                Some(token),
                |_| {},
            ),
        )
        .await;

        assert_eq!(result, Ok(Err("aborted".to_string())));
    }

    #[tokio::test]
    async fn frame_stream_aborts_while_source_is_idle() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            consume_frame_stream(
                stream::pending::<Result<String, String>>(),
                Some(token),
                |_| {},
            ),
        )
        .await;

        assert_eq!(result, Ok(Err("aborted".to_string())));
    }

    #[test]
    fn decoder_replaces_invalid_bytes_and_flushes_tail() {
        let mut decoder = Utf8ChunkDecoder::default();
        assert_eq!(decoder.push(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.push(&[0xEC, 0x97]), "");
        assert_eq!(decoder.finish(), Some("\u{FFFD}".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn frame_stream_feeds_data_and_stops_on_stop_flag() {
        let lines: Vec<Result<String, String>> = vec![
            Ok(r#"{"intent":"thinking","message":"looking up stations"}"#.to_string()),
            Ok(r#"{"data":"<event type=\"geocode\">1,2"}"#.to_string()),
            Ok("not json".to_string()),
            Ok(r#"{"data":"</event>","stop":true}"#.to_string()),
            Ok(r#"{"data":"after stop"}"#.to_string()),
        ];
        let mut fed = String::new();

        consume_frame_stream(stream::iter(lines), None, |data| fed.push_str(data))
            .await
            .expect("frames should finish");

        assert_eq!(fed, "<event type=\"geocode\">1,2</event>");
    }

    #[test]
    fn decode_frame_reads_end_of_loop_variants() {
        assert_eq!(
            decode_frame(r#"{"end_event_loop":1}"#),
            Some(FrameUpdate {
                finished: true,
                ..Default::default()
            })
        );
        assert_eq!(
            decode_frame(r#"{"data":"x","stop":false}"#),
            Some(FrameUpdate {
                data: Some("x".to_string()),
                ..Default::default()
            })
        );
        assert_eq!(decode_frame("   "), None);
        assert_eq!(
            decode_frame(r#"{"intent":"plan","message":"routing","stop":true}"#),
            Some(FrameUpdate {
                status: Some("routing".to_string()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn analysis_prompt_names_the_fire_site() {
        let prompt = build_analysis_prompt(&FireLocation {
            lat: 36.1,
            lon: 127.2,
            address: String::new(),
            name: "Gyeryong fire".to_string(),
        });
        assert!(prompt.contains("Gyeryong fire"));
        assert!(prompt.contains("lat 36.1, lon 127.2"));
    }

    #[tokio::test]
    async fn await_with_optional_abort_returns_aborted_when_token_cancelled() {
        let token = CancellationToken::new();
        token.cancel();

        let result = await_with_optional_abort(
            futures::future::pending::<Result<i32, String>>(),
            Some(token),
        )
        .await;

        assert_eq!(result, Err("aborted".to_string()));
    }
}
