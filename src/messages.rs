#[derive(Debug, Clone)]
pub enum EngineMsg {
    StateChanged(EngineState),
    /// Append a paragraph to the transcript.
    Line(String),
    /// Show a placeholder that a later `Resolve` replaces.
    Pending(String),
    Resolve(String),
}

#[derive(Debug, Clone)]
pub enum GuiMsg {
    Ask(String),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Searching,
    Generating,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Searching => write!(f, "searching"),
            EngineState::Generating => write!(f, "generating"),
        }
    }
}
