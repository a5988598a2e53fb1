use anyhow::{Context, Result};
use gtk4::prelude::*;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::config::UiConfig;
use crate::error::MygeminiError;
use crate::messages::{EngineMsg, EngineState};
use crate::transcript::{self, Transcript};

const DEFAULT_LAYOUT: &str = include_str!("../../ui/mygemini.ui");

pub const WINDOW_ID: &str = "main_window";
pub const SEND_ID: &str = "btn_send";
pub const QUESTION_ID: &str = "entry_question";
pub const ANSWER_ID: &str = "text_answer";

/// GtkBuilder source from `layout_file`, or the bundled layout.
pub fn layout_source(ui: &UiConfig) -> Result<String> {
    match ui.layout_file {
        Some(ref file) => std::fs::read_to_string(Path::new(file))
            .with_context(|| format!("Layout file not found: {}", file)),
        None => Ok(DEFAULT_LAYOUT.to_string()),
    }
}

fn required<T: IsA<gtk4::glib::Object>>(builder: &gtk4::Builder, id: &str) -> Result<T> {
    builder
        .object::<T>(id)
        .ok_or_else(|| MygeminiError::Ui(format!("layout is missing required widget '{}'", id)).into())
}

#[derive(Clone)]
pub struct AskDialog {
    window: gtk4::Window,
    send: gtk4::Button,
    question: gtk4::Entry,
    answer: gtk4::TextView,
    transcript: Rc<RefCell<Transcript>>,
}

impl AskDialog {
    pub fn load(app: &gtk4::Application, ui: &UiConfig, model: &str) -> Result<Self> {
        let source = layout_source(ui)?;
        let builder = gtk4::Builder::new();
        builder
            .add_from_string(&source)
            .map_err(|e| MygeminiError::Ui(format!("invalid layout: {}", e)))?;

        let window: gtk4::Window = required(&builder, WINDOW_ID)?;
        let send: gtk4::Button = required(&builder, SEND_ID)?;
        let question: gtk4::Entry = required(&builder, QUESTION_ID)?;
        let answer: gtk4::TextView = required(&builder, ANSWER_ID)?;

        window.set_application(Some(app));
        window.set_title(Some(&ui.title_for(model)));
        answer.set_editable(false);
        answer.set_cursor_visible(false);

        Ok(Self {
            window,
            send,
            question,
            answer,
            transcript: Rc::new(RefCell::new(Transcript::new())),
        })
    }

    pub fn window(&self) -> &gtk4::Window {
        &self.window
    }

    pub fn show_greeting(&self, archive_enabled: bool) {
        {
            let mut t = self.transcript.borrow_mut();
            t.append(transcript::greeting());
            if archive_enabled {
                t.append(transcript::archive_notice());
            }
        }
        self.refresh();
    }

    /// Calls `on_submit` with the entry text on click or Enter.
    pub fn connect_submit<F: Fn(String) + 'static>(&self, on_submit: F) {
        let on_submit = Rc::new(on_submit);

        let dialog = self.clone();
        let submit = on_submit.clone();
        self.send.connect_clicked(move |_| {
            if let Some(q) = dialog.take_question() {
                submit(q);
            }
        });

        let dialog = self.clone();
        self.question.connect_activate(move |_| {
            if !dialog.send.is_sensitive() {
                return;
            }
            if let Some(q) = dialog.take_question() {
                on_submit(q);
            }
        });
    }

    /// Trimmed entry text, clearing the entry. `None` when blank.
    fn take_question(&self) -> Option<String> {
        let text = self.question.text().trim().to_string();
        if text.is_empty() {
            return None;
        }
        self.question.set_text("");
        Some(text)
    }

    pub fn apply(&self, msg: &EngineMsg) {
        match msg {
            EngineMsg::StateChanged(state) => {
                self.send.set_sensitive(*state == EngineState::Idle);
            }
            other => {
                self.transcript.borrow_mut().apply(other);
                self.refresh();
            }
        }
    }

    fn refresh(&self) {
        let buffer = self.answer.buffer();
        buffer.set_text(&self.transcript.borrow().render());
        let mut end = buffer.end_iter();
        self.answer.scroll_to_iter(&mut end, 0.0, false, 0.0, 0.0);
    }

    pub fn present(&self) {
        self.window.present();
    }
}
