use std::io;
use std::sync::Arc;

use feed_core::{FeedEngine, FeedEvent, MergeOrigin, SendOutcome};
use feed_http::HttpFeedClient;
use time::UtcOffset;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::error::CliError;
use crate::view::FeedView;

const SCROLL_STEP: usize = 10;

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Empty,
    Send(String),
    Reply { author_ref: String, text: String },
    Older,
    Up(usize),
    Down(usize),
    Bottom,
    Quit,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Send(line.to_string());
    };
    let mut words = command.splitn(2, char::is_whitespace);
    let name = words.next().unwrap_or_default();
    let rest = words.next().unwrap_or_default().trim();
    match name {
        "quit" | "q" => Input::Quit,
        "older" => Input::Older,
        "bottom" => Input::Bottom,
        "up" => Input::Up(rest.parse().unwrap_or(SCROLL_STEP)),
        "down" => Input::Down(rest.parse().unwrap_or(SCROLL_STEP)),
        "reply" => {
            let mut parts = rest.splitn(2, char::is_whitespace);
            match (parts.next(), parts.next().map(str::trim)) {
                (Some(author_ref), Some(text)) if !author_ref.is_empty() && !text.is_empty() => {
                    Input::Reply {
                        author_ref: author_ref.trim_start_matches('#').to_string(),
                        text: text.to_string(),
                    }
                }
                _ => Input::Unknown(line.to_string()),
            }
        }
        _ => Input::Unknown(line.to_string()),
    }
}

enum Flow {
    Continue,
    Exit,
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.feed_config()?;
    let client = HttpFeedClient::new(&cli.api_base)?;
    info!(
        target: "feed.cli",
        api_base = %cli.api_base,
        page_size = config.page_size,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "starting feed"
    );

    let engine = FeedEngine::new(Arc::new(client), config)?;
    let mut events = engine.subscribe();
    let mut poller = engine.start_polling();
    let mut view = FeedView::new(UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let result: Result<(), CliError> = async {
        view.paint(&engine)?;
        loop {
            let flow = tokio::select! {
                _ = tokio::signal::ctrl_c() => Ok(Flow::Exit),
                line = lines.next_line() => on_line(&engine, &mut view, line),
                event = events.recv() => on_event(&engine, &mut view, event),
            };
            if let Flow::Exit = flow? {
                return Ok(());
            }
        }
    }
    .await;

    poller.stop();
    println!();
    info!(target: "feed.cli", "feed closed");
    result
}

fn on_line(
    engine: &FeedEngine,
    view: &mut FeedView,
    line: io::Result<Option<String>>,
) -> Result<Flow, CliError> {
    let Some(line) = line? else {
        return Ok(Flow::Exit);
    };
    match parse_input(&line) {
        Input::Quit => return Ok(Flow::Exit),
        Input::Empty => {}
        Input::Send(text) => spawn_send(engine, text),
        Input::Reply { author_ref, text } => {
            spawn_send(engine, engine.compose_reply(&author_ref, &text));
        }
        Input::Older => {
            if !view.scroll_to_top(engine) {
                let reason = if engine.is_loading_history() {
                    "history is still loading"
                } else if !engine.has_more() {
                    "start of history reached"
                } else {
                    "waiting for the first messages"
                };
                view.notice(reason);
            }
        }
        Input::Up(lines) => {
            view.scroll_by(engine, -(lines as isize));
        }
        Input::Down(lines) => {
            view.scroll_by(engine, lines as isize);
        }
        Input::Bottom => view.scroll_to_bottom(engine),
        Input::Unknown(text) => {
            view.notice(format!("unknown command: {text} (try /older, /reply <id> <text>, /quit)"));
        }
    }
    view.paint(engine)?;
    Ok(Flow::Continue)
}

fn on_event(
    engine: &FeedEngine,
    view: &mut FeedView,
    event: Result<FeedEvent, RecvError>,
) -> Result<Flow, CliError> {
    match event {
        Ok(FeedEvent::Updated { .. }) => view.settle(engine),
        Err(RecvError::Lagged(skipped)) => {
            debug!(target: "feed.cli", skipped, "event stream lagged");
            view.settle(engine);
        }
        Ok(FeedEvent::SendFailed {
            content, reason, ..
        }) => view.notice(format!("send failed ({reason}): {content}")),
        Ok(FeedEvent::HistoryExhausted) => view.notice("start of history reached"),
        Ok(FeedEvent::FetchFailed { origin, reason }) => {
            let what = match origin {
                MergeOrigin::Forward => "refresh",
                MergeOrigin::Backward => "history",
            };
            view.notice(format!("{what} failed: {reason}"));
        }
        Err(RecvError::Closed) => return Ok(Flow::Exit),
    }
    view.paint(engine)?;
    Ok(Flow::Continue)
}

fn spawn_send(engine: &FeedEngine, text: String) {
    let engine = engine.clone();
    tokio::spawn(async move {
        if let SendOutcome::Skipped = engine.send(&text).await {
            debug!(target: "feed.cli", "ignored blank message");
        }
    });
}
