use super::{GenerationContext, ImagesOutcome};
use crate::core::error::ComicError;
use crate::core::state::{ComicState, GenerationStage, Panel, PanelStatus};
use crate::services::llm::{ChatSession, Modality, Part};
use crate::services::{prompt, script};
use anyhow::Result;
use futures_util::StreamExt;
use log::{debug, error, info};

const IMAGES_START: f64 = 10.0;
const IMAGES_SPAN: f64 = 85.0;

/// Builds panels from an interleaved text/image stream. Text accumulates
/// until an image arrives; the image closes the panel.
#[derive(Debug)]
pub struct PanelStreamAssembler {
    page: u32,
    next_panel: u32,
    next_id: usize,
    buffer: String,
}

impl PanelStreamAssembler {
    pub fn new(page: u32, first_id: usize) -> Self {
        Self {
            page,
            next_panel: 1,
            next_id: first_id,
            buffer: String::new(),
        }
    }

    pub fn push(&mut self, part: Part) -> Option<Panel> {
        match part {
            Part::Text(text) => {
                self.buffer.push_str(&text);
                None
            }
            Part::Image(image) => {
                let (panel_text, scene_description) = split_panel_text(&self.buffer);
                let panel = Panel {
                    id: self.next_id,
                    page: self.page,
                    panel: self.next_panel,
                    scene_description,
                    panel_text,
                    image: Some(image),
                    status: PanelStatus::Done,
                };
                self.next_id += 1;
                self.next_panel += 1;
                self.buffer.clear();
                Some(panel)
            }
        }
    }

    /// Id the next page should start from.
    pub fn next_id(&self) -> usize {
        self.next_id
    }

    /// Text received after the last image; it never becomes a panel.
    pub fn leftover(&self) -> &str {
        self.buffer.trim()
    }
}

/// First line is the caption, the rest describes the scene.
pub fn split_panel_text(buffer: &str) -> (String, String) {
    let trimmed = buffer.trim();
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));

    let panel_text = if first.is_empty() { "..." } else { first };
    let scene = rest.trim();
    let scene = if scene.is_empty() { "AI generated scene." } else { scene };
    (panel_text.to_string(), scene.to_string())
}

/// One multimodal chat stream per page, with every character reference
/// sent ahead of the page summary.
#[derive(Debug, Clone)]
pub struct StreamingStrategy {
    model: String,
}

impl StreamingStrategy {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }

    pub async fn break_down(&self, ctx: &GenerationContext<'_>, state: &mut ComicState) -> Result<Vec<String>> {
        state.set_progress(GenerationStage::Story, "Breaking story into pages...", 0.0);
        let pages = script::break_down_pages(ctx.client.as_ref(), ctx.story, ctx.script).await?;
        state.set_progress(GenerationStage::Story, "Parsing page structure...", 5.0);
        info!("Story broken down into {} page summaries", pages.len());
        Ok(pages)
    }

    /// Stops at the first failing page. Panels already pushed stay `Done`.
    pub async fn generate_images(
        &self,
        ctx: &GenerationContext<'_>,
        pages: &[String],
        state: &mut ComicState,
    ) -> ImagesOutcome {
        state.set_progress(GenerationStage::Images, "Starting image generation...", IMAGES_START);
        state.set_panels(Vec::new());

        let mut next_id = 0;
        for (i, summary) in pages.iter().enumerate() {
            let page = i as u32 + 1;
            state.set_progress(
                GenerationStage::Images,
                format!("Generating panels for page {}...", page),
                IMAGES_START + (i as f64 / pages.len() as f64) * IMAGES_SPAN,
            );

            if let Err(e) = self.generate_page(ctx, page, summary, &mut next_id, state).await {
                error!("Native image generation failed for page {}: {:#}", page, e);
                return ImagesOutcome::Truncated {
                    page,
                    error: ComicError::PageStream {
                        page,
                        message: format!("{:#}", e),
                    },
                };
            }
        }
        ImagesOutcome::Completed
    }

    async fn generate_page(
        &self,
        ctx: &GenerationContext<'_>,
        page: u32,
        summary: &str,
        next_id: &mut usize,
        state: &mut ComicState,
    ) -> Result<()> {
        let mut chat = ChatSession::new(ctx.client.clone(), &self.model, &[Modality::Text, Modality::Image]);
        let message = prompt::page_prompt_parts(ctx.story, ctx.characters, page, summary);
        let mut stream = chat.send_message_stream(message).await?;

        let mut assembler = PanelStreamAssembler::new(page, *next_id);
        let mut reply = Vec::new();
        while let Some(part) = stream.next().await {
            let part = part?;
            reply.push(part.clone());
            if let Some(panel) = assembler.push(part) {
                debug!("Page {} panel {} received", page, panel.panel);
                *next_id = assembler.next_id();
                state.push_panel(panel);
            }
        }
        chat.record_reply(reply);

        if !assembler.leftover().is_empty() {
            debug!("Page {} ended with text and no image: {}", page, assembler.leftover());
        }
        Ok(())
    }
}
