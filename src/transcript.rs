//! Text shown in the dialog's answer view.
//!
//! The engine describes what happened as [`EngineMsg`]s; the GUI and the
//! headless `ask` command both fold those into a [`Transcript`] and render it.

use crate::archive::ArchiveRecord;
use crate::messages::EngineMsg;

const BOT: &str = "[Mygemini]";
const RULE_WIDTH: usize = 50;

pub fn greeting() -> String {
    format!("{} How can I help you?", BOT)
}

pub fn archive_notice() -> String {
    "\n[DB] Conversations are saved automatically. Questions are looked up in the DB first."
        .to_string()
}

pub fn question(text: &str) -> String {
    format!("[Question] {}\n", text)
}

pub fn pending() -> String {
    format!("{} Generating a response...", BOT)
}

pub fn answer(text: &str) -> String {
    format!("{} {}\n", BOT, text)
}

/// Spoken and shown form of a failed request.
pub fn failure(title: &str, message: &str) -> String {
    format!("{} occurred: {}", title, message)
}

pub fn error(title: &str, message: &str) -> String {
    format!("{} {}\n", BOT, failure(title, message))
}

pub fn search_started(term: &str) -> String {
    format!("\n[DB search] Searching past records for '{}'...", term)
}

pub fn search_hits(count: usize) -> String {
    format!("[DB result] Found {} related record(s):", count)
}

pub fn search_miss() -> String {
    "[DB result] No past records match this question. Asking Gemini.".to_string()
}

pub fn search_failed(err: &str) -> String {
    format!("[DB error] Record search failed: {}", err)
}

pub fn save_failed(err: &str) -> String {
    format!("[DB error] Failed to save record: {}", err)
}

/// Header plus Q/A previews for one archive hit (`index` is 1-based).
pub fn record(index: usize, record: &ArchiveRecord, preview_chars: usize) -> Vec<String> {
    vec![
        format!("--- [Record {}] {} ---", index, record.create_at),
        format!(
            "  Q: {}...",
            ArchiveRecord::preview(&record.question, preview_chars)
        ),
        format!(
            "  A: {}...",
            ArchiveRecord::preview(&record.answer, preview_chars)
        ),
    ]
}

pub fn rule() -> String {
    "-".repeat(RULE_WIDTH)
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    paragraphs: Vec<String>,
    pending: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, line: impl Into<String>) {
        self.paragraphs.push(line.into());
    }

    pub fn set_pending(&mut self, line: impl Into<String>) {
        self.paragraphs.push(line.into());
        self.pending = Some(self.paragraphs.len() - 1);
    }

    /// Replace the pending placeholder, or append when there is none.
    pub fn resolve_pending(&mut self, line: impl Into<String>) {
        match self.pending.take() {
            Some(idx) if idx < self.paragraphs.len() => self.paragraphs[idx] = line.into(),
            _ => self.paragraphs.push(line.into()),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn apply(&mut self, msg: &EngineMsg) {
        match msg {
            EngineMsg::Line(line) => self.append(line.clone()),
            EngineMsg::Pending(line) => self.set_pending(line.clone()),
            EngineMsg::Resolve(line) => self.resolve_pending(line.clone()),
            EngineMsg::StateChanged(_) => {}
        }
    }

    pub fn paragraphs(&self) -> &[String] {
        &self.paragraphs
    }

    pub fn render(&self) -> String {
        self.paragraphs.join("\n")
    }
}
