use crate::core::config::Config;
use crate::core::error::ComicError;
use crate::core::io::{join, write_json, Storage};
use crate::core::state::{AppStep, Character, ComicState, GenerationStage, StateEvent};
use crate::services::imaging::{GenerationContext, GenerationStrategy, ImagesOutcome};
use crate::services::llm::GenAiClient;
use crate::utils::image::extension_for;
use anyhow::{anyhow, Result};
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;

/// How a generation run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Assembly finished; some panels may still be in error.
    Completed,
    /// A streamed page failed. Panels before it are kept.
    Truncated { page: u32 },
    /// Nothing to show; the run went back to configuration.
    Aborted(anyhow::Error),
}

pub struct WorkflowManager {
    config: Config,
    characters: Vec<Character>,
    client: Option<Arc<dyn GenAiClient>>,
    state: ComicState,
    storage: Arc<dyn Storage>,
}

impl WorkflowManager {
    pub fn new(
        config: Config,
        characters: Vec<Character>,
        client: Option<Arc<dyn GenAiClient>>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config,
            characters,
            client,
            state: ComicState::new(),
            storage,
        }
    }

    pub fn subscribe<F>(&mut self, f: F)
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.state.subscribe(f);
    }

    pub fn state(&self) -> &ComicState {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Back to a pristine configuration step.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    fn abort(&mut self, message: String, cause: anyhow::Error) -> RunOutcome {
        error!("{}", message);
        self.state.fail_to(AppStep::Configuration, message);
        RunOutcome::Aborted(cause)
    }

    pub async fn run(&mut self) -> RunOutcome {
        let Some(client) = self.client.clone() else {
            let err = ComicError::ClientNotReady;
            return self.abort(err.to_string(), err.into());
        };

        let script = match self.config.story.script_text() {
            Ok(script) if !script.trim().is_empty() => script,
            Ok(_) => return self.abort("Story script is empty.".to_string(), anyhow!("empty story script")),
            Err(e) => return self.abort(format!("{:#}", e), e),
        };

        self.state.begin_run();
        let strategy = GenerationStrategy::for_model(&self.config.story.image_model);
        info!(
            "Generating {} page(s) with {} ({} image generation)",
            self.config.story.pages,
            self.config.story.image_model,
            strategy.name()
        );

        let ctx = GenerationContext {
            client: &client,
            story: &self.config.story,
            script: &script,
            characters: &self.characters,
        };
        let outcome = strategy.run(&ctx, &mut self.state).await;

        match outcome {
            Err(e) => {
                let message = match strategy {
                    GenerationStrategy::Discrete(_) => format!("Story generation failed: {:#}", e),
                    GenerationStrategy::Streaming(_) => {
                        format!("Failed to break down story into pages: {:#}", e)
                    }
                };
                self.abort(message, e)
            }
            Ok(ImagesOutcome::Truncated { page, error }) => {
                self.save_artifacts().await;
                let reason = match &error {
                    ComicError::PageStream { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                let message = format!(
                    "Generation failed on page {}: {}. The comic may be incomplete.",
                    page, reason
                );
                warn!("{}", message);
                self.state.fail_to(AppStep::Comic, message);
                RunOutcome::Truncated { page }
            }
            Ok(ImagesOutcome::Completed) => {
                self.state
                    .set_progress(GenerationStage::Assembly, "Assembling comic...", 99.0);
                self.save_artifacts().await;
                self.state.finish();
                info!(
                    "Generation complete: {} panel(s) done, {} failed",
                    self.state.successful_panels(),
                    self.state.failed_panels()
                );
                RunOutcome::Completed
            }
        }
    }

    /// Build artifacts are a convenience; failing to write them never fails the run.
    async fn save_artifacts(&self) {
        if let Err(e) = self.write_artifacts().await {
            warn!("Failed to save build artifacts: {:#}", e);
        }
    }

    async fn write_artifacts(&self) -> Result<()> {
        let build = &self.config.build_folder;

        for stale in self.storage.list(build).await? {
            let is_panel = Path::new(&stale)
                .file_name()
                .map(|n| n.to_string_lossy().starts_with("panel_"))
                .unwrap_or(false);
            if is_panel {
                self.storage.delete(&stale).await?;
            }
        }

        write_json(self.storage.as_ref(), &join(build, "script.json"), &self.state.panels()).await?;
        for panel in self.state.panels() {
            if let Some(image) = &panel.image {
                let name = format!("panel_{:04}.{}", panel.id + 1, extension_for(&image.mime_type));
                self.storage.write(&join(build, &name), &image.bytes).await?;
            }
        }
        Ok(())
    }
}
