pub mod characters;
pub mod export;
pub mod imaging;
pub mod llm;
pub mod model_sheet;
pub mod prompt;
pub mod script;
pub mod setup;
pub mod workflow;
