use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::conversation::ChatHistory;
use crate::llm::GeminiClient;
use crate::messages::{EngineMsg, EngineState, GuiMsg};
use crate::speech::SpeechWorker;
use crate::transcript;

/// Channel from the engine to a listener. Unbounded: a turn emits one line
/// per archive hit and must never drop its closing `StateChanged`.
pub fn listener_channel() -> (
    async_channel::Sender<EngineMsg>,
    async_channel::Receiver<EngineMsg>,
) {
    async_channel::unbounded()
}

/// Runs questions through archive lookup, Gemini and speech, off the GUI thread.
pub struct Engine {
    config: Config,
    state: EngineState,
    gemini: GeminiClient,
    history: ChatHistory,
    archive: Option<ArchiveStore>,
    speech: Option<SpeechWorker>,
    gui_rx: Option<async_channel::Receiver<GuiMsg>>,
    engine_txs: Vec<async_channel::Sender<EngineMsg>>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        let gemini = GeminiClient::new(&config.gemini)?;

        let archive = if config.archive.enabled {
            let db_path = PathBuf::from(&config.archive.path);
            match ArchiveStore::open(&db_path, config.archive.max_entries) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!("Failed to open archive: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let speech = if config.speech.enabled {
            match SpeechWorker::spawn(config.speech.clone()) {
                Ok(worker) => Some(worker),
                Err(e) => {
                    warn!("Failed to start speech worker: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config,
            state: EngineState::Idle,
            gemini,
            history: ChatHistory::new(),
            archive,
            speech,
            gui_rx: None,
            engine_txs: Vec::new(),
        })
    }

    pub fn with_channels(
        mut self,
        gui_rx: async_channel::Receiver<GuiMsg>,
        engine_txs: Vec<async_channel::Sender<EngineMsg>>,
    ) -> Self {
        self.gui_rx = Some(gui_rx);
        self.engine_txs = engine_txs;
        self
    }

    /// Adds a listener without a GUI command channel (headless use).
    pub fn with_listener(mut self, tx: async_channel::Sender<EngineMsg>) -> Self {
        self.engine_txs.push(tx);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn archive_enabled(&self) -> bool {
        self.archive.is_some()
    }

    fn broadcast(&self, msg: EngineMsg) {
        for tx in &self.engine_txs {
            if tx.try_send(msg.clone()).is_err() {
                debug!("Listener gone, dropping {:?}", msg);
            }
        }
    }

    fn line(&self, text: String) {
        self.broadcast(EngineMsg::Line(text));
    }

    fn set_state(&mut self, state: EngineState) {
        self.state = state;
        self.broadcast(EngineMsg::StateChanged(state));
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Engine running with model {}", self.gemini.model());
        self.set_state(EngineState::Idle);

        if let Some(gui_rx) = self.gui_rx.take() {
            loop {
                match gui_rx.recv().await {
                    Ok(GuiMsg::Ask(question)) => {
                        self.ask(&question).await;
                    }
                    Ok(GuiMsg::Quit) => {
                        info!("Quit requested from GUI");
                        break;
                    }
                    Err(_) => {
                        info!("GUI channel closed, shutting down");
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One full turn for `question`.
    pub async fn ask(&mut self, question: &str) {
        let question = question.trim();
        if question.is_empty() {
            return;
        }
        if self.state != EngineState::Idle {
            warn!("Question received while {}, ignoring", self.state);
            return;
        }

        if self.lookup_archive(question) {
            self.set_state(EngineState::Idle);
            return;
        }

        self.line(transcript::question(question));
        self.broadcast(EngineMsg::Pending(transcript::pending()));
        self.history.push_user(question);
        self.set_state(EngineState::Generating);

        let result = self.gemini.generate(&self.history).await;
        match result {
            Ok(answer) => {
                self.history.push_model(answer.as_str());
                self.broadcast(EngineMsg::Resolve(transcript::answer(&answer)));
                self.store(question, &answer);
                self.speak(&answer);
            }
            Err(e) => {
                error!("Gemini request failed: {}", e);
                self.history.rollback_user();
                let message = e.to_string();
                self.broadcast(EngineMsg::Resolve(transcript::error(e.title(), &message)));
                self.speak(&transcript::failure(e.title(), &message));
            }
        }

        self.set_state(EngineState::Idle);
    }

    /// Shows archived matches for `question`. Returns true when any were found,
    /// which ends the turn without calling Gemini.
    fn lookup_archive(&mut self, question: &str) -> bool {
        if self.archive.is_none() {
            return false;
        }
        self.set_state(EngineState::Searching);
        self.line(transcript::search_started(question));

        let Some(archive) = self.archive.as_ref() else {
            return false;
        };
        let records = match archive.search(question) {
            Ok(records) => records,
            Err(e) => {
                warn!("Archive search failed: {}", e);
                self.line(transcript::search_failed(&e.to_string()));
                return false;
            }
        };
        info!("Archive search returned {} records", records.len());

        if records.is_empty() {
            self.line(transcript::search_miss());
            return false;
        }

        self.line(transcript::search_hits(records.len()));
        let preview_chars = self.config.archive.preview_chars;
        for (i, record) in records.iter().enumerate() {
            for text in transcript::record(i + 1, record, preview_chars) {
                self.line(text);
            }
        }
        self.line(transcript::rule());
        true
    }

    fn store(&self, question: &str, answer: &str) {
        let Some(ref archive) = self.archive else {
            return;
        };
        match archive.save(question, answer) {
            Ok(create_at) => info!("Saved answer to archive at {}", create_at),
            Err(e) => {
                warn!("Failed to save answer to archive: {}", e);
                self.line(transcript::save_failed(&e.to_string()));
            }
        }
    }

    fn speak(&self, text: &str) {
        if let Some(ref speech) = self.speech {
            speech.say(text);
        }
    }

    /// Lets queued speech finish, then stops the worker.
    pub async fn shutdown(mut self) {
        if let Some(mut speech) = self.speech.take() {
            let _ = tokio::task::spawn_blocking(move || speech.shutdown()).await;
        }
        info!("Engine shut down cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::messages::EngineMsg;
    use crate::test_support::{answer_body, error_body, serve_once};
    use crate::transcript::Transcript;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.gemini.api_key = "test-key".to_string();
        config.gemini.endpoint = "http://127.0.0.1:1".to_string();
        config.gemini.timeout_ms = 2000;
        config.speech.enabled = false;
        config.archive.path = temp_dir
            .path()
            .join("archive.db")
            .to_string_lossy()
            .to_string();
        config
    }

    fn drain(rx: &async_channel::Receiver<EngineMsg>) -> Vec<EngineMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    fn render(msgs: &[EngineMsg]) -> String {
        let mut transcript = Transcript::new();
        for msg in msgs {
            transcript.apply(msg);
        }
        transcript.render()
    }

    #[tokio::test]
    async fn test_empty_question_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = async_channel::unbounded();
        let mut engine = Engine::new(test_config(&temp_dir)).unwrap().with_listener(tx);

        engine.ask("   ").await;
        assert!(drain(&rx).is_empty());
        assert!(engine.history().is_empty());
    }

    #[tokio::test]
    async fn test_failed_request_rolls_back_history() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.archive.enabled = false;
        let (tx, rx) = async_channel::unbounded();
        let mut engine = Engine::new(config).unwrap().with_listener(tx);

        engine.ask("What is Rust?").await;

        assert!(engine.history().is_empty());
        assert_eq!(engine.state(), EngineState::Idle);

        let msgs = drain(&rx);
        let text = render(&msgs);
        assert!(text.contains("[Question] What is Rust?"));
        assert!(text.contains("[Mygemini] Unexpected error occurred:"));
        assert!(!text.contains("Generating a response"));
        assert!(matches!(
            msgs.last(),
            Some(EngineMsg::StateChanged(EngineState::Idle))
        ));
    }

    #[tokio::test]
    async fn test_archive_hit_skips_gemini() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        {
            let store = ArchiveStore::open(
                std::path::Path::new(&config.archive.path),
                config.archive.max_entries,
            )
            .unwrap();
            store
                .save("What is Rust?", "Rust is a systems programming language.")
                .unwrap();
        }

        let (tx, rx) = async_channel::unbounded();
        let mut engine = Engine::new(config).unwrap().with_listener(tx);
        assert!(engine.archive_enabled());

        engine.ask("Rust").await;

        let text = render(&drain(&rx));
        assert!(text.contains("[DB search] Searching past records for 'Rust'..."));
        assert!(text.contains("[DB result] Found 1 related record(s):"));
        assert!(text.contains("  Q: What is Rust?..."));
        assert!(!text.contains("[Question]"));
        assert!(engine.history().is_empty());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_archive_miss_falls_through_to_gemini() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = async_channel::unbounded();
        let mut engine = Engine::new(test_config(&temp_dir)).unwrap().with_listener(tx);

        engine.ask("never asked before").await;

        let text = render(&drain(&rx));
        assert!(text.contains("[DB result] No past records match this question. Asking Gemini."));
        assert!(text.contains("[Question] never asked before"));
        assert!(text.contains("occurred:"));
    }

    #[tokio::test]
    async fn test_many_archive_hits_still_end_idle() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        {
            let store = ArchiveStore::open(
                std::path::Path::new(&config.archive.path),
                config.archive.max_entries,
            )
            .unwrap();
            for i in 1..=30 {
                store.save(&format!("rust q{}", i), "answer").unwrap();
            }
        }

        let (tx, rx) = listener_channel();
        let mut engine = Engine::new(config).unwrap().with_listener(tx);
        engine.ask("rust").await;

        let msgs = drain(&rx);
        assert!(matches!(
            msgs.last(),
            Some(EngineMsg::StateChanged(EngineState::Idle))
        ));
        let text = render(&msgs);
        assert!(text.contains("[DB result] Found 30 related record(s):"));
        assert!(text.contains("[Record 30]"));
    }

    #[tokio::test]
    async fn test_successful_turn_records_and_archives_answer() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.gemini.endpoint = serve_once(200, &answer_body("Rust is a language.")).await;
        let archive_path = PathBuf::from(&config.archive.path);
        let max_entries = config.archive.max_entries;

        let (tx, rx) = listener_channel();
        let mut engine = Engine::new(config).unwrap().with_listener(tx);
        engine.ask("What is Rust?").await;

        let roles: Vec<Role> = engine.history().messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model]);
        assert_eq!(engine.state(), EngineState::Idle);

        let msgs = drain(&rx);
        let text = render(&msgs);
        assert!(text.contains("[Question] What is Rust?"));
        assert!(text.contains("[Mygemini] Rust is a language."));
        assert!(!text.contains("Generating a response"));
        assert!(matches!(
            msgs.last(),
            Some(EngineMsg::StateChanged(EngineState::Idle))
        ));

        let store = ArchiveStore::open(&archive_path, max_entries).unwrap();
        let records = store.search("What is Rust?").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].answer, "Rust is a language.");
    }

    #[tokio::test]
    async fn test_api_error_is_shown_and_rolled_back() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.archive.enabled = false;
        config.gemini.endpoint = serve_once(400, &error_body(400, "API key not valid.")).await;

        let (tx, rx) = listener_channel();
        let mut engine = Engine::new(config).unwrap().with_listener(tx);
        engine.ask("What is Rust?").await;

        assert!(engine.history().is_empty());
        let text = render(&drain(&rx));
        assert!(text.contains("[Mygemini] API error occurred:"));
        assert!(text.contains("API key not valid."));
        assert!(!text.contains("Generating a response"));
    }

    #[tokio::test]
    async fn test_run_stops_on_quit() {
        let temp_dir = TempDir::new().unwrap();
        let (gui_tx, gui_rx) = async_channel::unbounded();
        let (tx, rx) = async_channel::unbounded();
        let engine = Engine::new(test_config(&temp_dir))
            .unwrap()
            .with_channels(gui_rx, vec![tx]);

        gui_tx.send(GuiMsg::Ask("  ".to_string())).await.unwrap();
        gui_tx.send(GuiMsg::Quit).await.unwrap();
        engine.run().await.unwrap();

        let msgs = drain(&rx);
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], EngineMsg::StateChanged(EngineState::Idle)));
    }

    #[tokio::test]
    async fn test_run_stops_when_gui_channel_closes() {
        let temp_dir = TempDir::new().unwrap();
        let (gui_tx, gui_rx) = async_channel::unbounded::<GuiMsg>();
        let engine = Engine::new(test_config(&temp_dir))
            .unwrap()
            .with_channels(gui_rx, Vec::new());

        drop(gui_tx);
        assert!(engine.run().await.is_ok());
    }
}
