pub mod archive;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod llm;
pub mod messages;
pub mod speech;
pub mod transcript;

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(feature = "gui")]
pub mod gui;

pub use archive::ArchiveStore;
pub use config::Config;
pub use engine::Engine;
pub use error::MygeminiError;
pub use llm::GeminiClient;
pub use speech::SpeechWorker;
