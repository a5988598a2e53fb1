use thiserror::Error;

#[derive(Error, Debug)]
pub enum MygeminiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not reach the Gemini server (error: {0})")]
    Api(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("UI error: {0}")]
    Ui(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MygeminiError {
    /// Short label shown in the dialog ahead of a failed answer.
    pub fn title(&self) -> &'static str {
        match self {
            MygeminiError::Api(_) => "API error",
            _ => "Unexpected error",
        }
    }
}
