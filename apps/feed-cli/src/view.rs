//! Line-oriented terminal rendering of the feed.
//!
//! Every rendered item takes one line, so heights handed to the scroll
//! anchor are line counts.

use std::io::{self, Write};

use crossterm::cursor::MoveTo;
use crossterm::style::{Print, PrintStyledContent, Stylize};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::queue;
use feed_core::{FeedEngine, RenderItem, RenderKind, ScrollAdjustment};
use time::macros::format_description;
use time::UtcOffset;

/// Header, notice and prompt rows.
const CHROME_ROWS: u16 = 3;
const FALLBACK_ROWS: usize = 20;

pub const PENDING_MARKER: &str = "moderation...";
pub const FAILED_MARKER: &str = "failed";

#[derive(Debug, PartialEq, Eq)]
pub struct LineParts {
    pub time: String,
    pub author: Option<String>,
    pub content: String,
    pub marker: Option<&'static str>,
}

pub fn line_parts(item: &RenderItem, offset: UtcOffset) -> LineParts {
    let time = item
        .timestamp
        .to_offset(offset)
        .format(format_description!("[hour]:[minute]"))
        .unwrap_or_else(|_| "--:--".to_string());
    let marker = match item.kind {
        RenderKind::Confirmed => None,
        RenderKind::Pending => Some(PENDING_MARKER),
        RenderKind::Failed => Some(FAILED_MARKER),
    };
    LineParts {
        time,
        author: item.author_ref.as_ref().map(|r| format!("#{r}")),
        // Multi-line drafts (reply links) are flattened onto one row.
        content: item.content.replace('\n', " "),
        marker,
    }
}

pub struct FeedView {
    offset: UtcOffset,
    top: usize,
    notice: Option<String>,
}

impl FeedView {
    pub fn new(offset: UtcOffset) -> Self {
        Self {
            offset,
            top: 0,
            notice: None,
        }
    }

    pub fn notice(&mut self, text: impl Into<String>) {
        self.notice = Some(text.into());
    }

    /// Applies the anchor's verdict for the latest mutation.
    pub fn settle(&mut self, engine: &FeedEngine) {
        let height = engine.render().len();
        let rows = viewport_rows();
        match engine.settle_viewport(height as f64) {
            ScrollAdjustment::ShiftBy(delta) if delta > 0.0 => {
                self.top = self.top.saturating_add(delta as usize);
            }
            ScrollAdjustment::FollowBottom => self.top = height.saturating_sub(rows),
            ScrollAdjustment::ShiftBy(_) | ScrollAdjustment::Keep => {}
        }
        self.top = self.top.min(height.saturating_sub(rows));
    }

    pub fn scroll_by(&mut self, engine: &FeedEngine, delta: isize) -> bool {
        let height = engine.render().len();
        let rows = viewport_rows();
        let max_top = height.saturating_sub(rows);
        self.top = self.top.saturating_add_signed(delta).min(max_top);
        self.report(engine, height, rows)
    }

    /// Jumps to the oldest loaded line, which starts a history page when one
    /// is available. Returns whether a page was started.
    pub fn scroll_to_top(&mut self, engine: &FeedEngine) -> bool {
        let height = engine.render().len();
        let rows = viewport_rows();
        self.top = 0;
        self.report(engine, height, rows)
    }

    pub fn scroll_to_bottom(&mut self, engine: &FeedEngine) {
        let height = engine.render().len();
        let rows = viewport_rows();
        self.top = height.saturating_sub(rows);
        self.report(engine, height, rows);
    }

    fn report(&self, engine: &FeedEngine, height: usize, rows: usize) -> bool {
        engine.on_viewport_scrolled(self.top as f64, height as f64, rows as f64)
    }

    pub fn paint(&mut self, engine: &FeedEngine) -> io::Result<()> {
        let items = engine.render();
        let rows = viewport_rows();
        self.top = self.top.min(items.len().saturating_sub(rows));

        let mut out = io::stdout().lock();
        queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;

        let status = if engine.is_loading_history() {
            " (loading older...)"
        } else if !engine.has_more() {
            " (start of history)"
        } else {
            ""
        };
        let header = format!("{} messages loaded{status}", engine.confirmed_len());
        queue!(out, PrintStyledContent(header.bold()), Print("\r\n"))?;

        for item in items.iter().skip(self.top).take(rows) {
            let parts = line_parts(item, self.offset);
            queue!(out, PrintStyledContent(parts.time.dark_grey()), Print(" "))?;
            if let Some(author) = parts.author {
                queue!(out, PrintStyledContent(author.cyan()), Print(" "))?;
            }
            queue!(out, Print(parts.content))?;
            match parts.marker {
                Some(FAILED_MARKER) => {
                    queue!(out, Print(" "), PrintStyledContent(FAILED_MARKER.red()))?
                }
                Some(marker) => queue!(out, Print(" "), PrintStyledContent(marker.dark_grey()))?,
                None => {}
            }
            queue!(out, Print("\r\n"))?;
        }

        if let Some(notice) = self.notice.as_deref() {
            queue!(out, PrintStyledContent(notice.yellow()))?;
        }
        queue!(out, Print("\r\n> "))?;
        out.flush()
    }
}

fn viewport_rows() -> usize {
    terminal::size()
        .map(|(_, rows)| usize::from(rows.saturating_sub(CHROME_ROWS).max(1)))
        .unwrap_or(FALLBACK_ROWS)
}
