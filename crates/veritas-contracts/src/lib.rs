//! Data contracts shared by the Veritas engine and its front ends.

pub mod chat {
    mod command_registry;
    mod intent_parser;

    pub use command_registry::CHAT_HELP_COMMANDS;
    pub use intent_parser::{parse_intent, Intent};
}
pub mod models;
pub mod providers;
pub mod verdict;

pub use verdict::{AnalysisResult, ArtifactCategory, ArtifactFinding, Classification, VerdictError};
