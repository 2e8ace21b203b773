use thiserror::Error;

/// Failure kinds the generation pipeline distinguishes between.
///
/// Each kind is terminal for its own scope: `MalformedOutput` and
/// `ClientNotReady` end the whole run, `PageStream` ends a streamed run early
/// while keeping its panels, and the remaining two only affect one panel or
/// one character.
#[derive(Debug, Error)]
pub enum ComicError {
    #[error("malformed AI output: {0}")]
    MalformedOutput(String),

    #[error("no image returned for panel {panel} on page {page}")]
    PanelImageMissing { page: u32, panel: u32 },

    #[error("generation failed on page {page}: {message}")]
    PageStream { page: u32, message: String },

    #[error("model sheet for \"{character}\" failed: {reason}")]
    ModelSheet { character: String, reason: String },

    #[error("AI client not initialized. Please provide a valid API key (config.yml or GEMINI_API_KEY)")]
    ClientNotReady,
}
