mod config;
mod core;
mod logger;
mod services;
mod utils;

use std::sync::Arc;

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_stream::wrappers::LinesStream;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use crate::config::{Config, InputSource};
use crate::services::agent_client::{
    build_analysis_prompt, consume_frame_stream, consume_text_stream, AgentClient, AgentRequest,
};
use crate::services::geocoder::NominatimGeocoder;
use crate::services::map_view::{map_command_channel, to_json_line, MapView};
use crate::services::session::StreamSession;
use crate::utils::log_helpers::{log_session_begin, log_session_error};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cfg = match Config::init_global() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = logger::init_logger(cfg) {
        eprintln!("Failed to init logger: {err}");
        std::process::exit(1);
    }

    cfg.print();

    if let Err(err) = run(cfg).await {
        log_session_error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run(cfg: &'static Config) -> anyhow::Result<()> {
    let fire = cfg.fire_location();
    let session_id = cfg.agent_session_id.clone();

    let (view, mut commands) = map_command_channel();
    let printer_session = session_id.clone();
    let printer = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            let line = to_json_line(&printer_session, &command);
            if !line.is_empty() {
                println!("{line}");
            }
        }
    });

    let geocoder = NominatimGeocoder::new(&cfg.geocoder_settings()).map_err(|err| anyhow!(err))?;
    let view: Arc<dyn MapView> = Arc::new(view);
    let mut session = StreamSession::start(
        session_id.clone(),
        fire.clone(),
        view,
        Arc::new(geocoder),
        cfg.session_options(),
    );
    log_session_begin(
        session.id(),
        cfg.input.as_str(),
        fire.is_some(),
        &cfg.geocoder_base_url,
    );

    // Ctrl-C ends the session itself, not just the transport
    let shutdown = session.cancellation_token();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let token = Some(shutdown.clone());
    let streamed = match cfg.input {
        InputSource::Http => {
            let prompt = resolve_prompt(fire.as_ref())?;
            let client = AgentClient::new(cfg.agent_api_url.clone(), cfg.agent_timeout())
                .map_err(|err| anyhow!(err))?;
            let request = AgentRequest {
                prompt,
                actor_id: cfg.agent_user_id.clone(),
                session_id: session_id.clone(),
            };
            client
                .stream_analysis(&request, token, |text| {
                    session.feed(text);
                })
                .await
        }
        InputSource::Stdin => {
            let stdin = Box::pin(ReaderStream::new(tokio::io::stdin()));
            consume_text_stream(stdin, token, |text| {
                session.feed(text);
            })
            .await
        }
        InputSource::Frames => {
            let lines = Box::pin(LinesStream::new(BufReader::new(tokio::io::stdin()).lines()));
            consume_frame_stream(lines, token, |data| {
                session.feed(data);
            })
            .await
        }
    };

    match streamed {
        Ok(()) => {
            let summary = session.finish().await;
            if !summary.display_text.is_empty() {
                eprintln!("{}", summary.display_text);
            }
        }
        Err(err) if shutdown.is_cancelled() => {
            info!("stream stopped: {}", err);
            let partial = session.display_text();
            if !partial.is_empty() {
                eprintln!("{}", partial);
            }
            session.abort();
        }
        Err(err) => {
            error!("[STREAM] transport failed: {}", err);
            session.abort();
            drain_printer(printer).await;
            return Err(anyhow!("agent stream failed: {}", err));
        }
    }

    drain_printer(printer).await;
    Ok(())
}

fn resolve_prompt(fire: Option<&crate::core::geo::FireLocation>) -> anyhow::Result<String> {
    let from_args = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if !from_args.trim().is_empty() {
        return Ok(from_args.trim().to_string());
    }
    fire.map(build_analysis_prompt)
        .ok_or_else(|| anyhow!("no prompt given and no fire location configured"))
}

// The session owned the last command sender, so the printer ends once the
// queue is flushed.
async fn drain_printer(printer: tokio::task::JoinHandle<()>) {
    if let Err(err) = printer.await {
        error!("map command printer failed: {}", err);
    }
}
