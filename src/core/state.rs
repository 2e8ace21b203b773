use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An image held in memory together with its MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn from_base64(mime_type: impl Into<String>, data: &str) -> anyhow::Result<Self> {
        let bytes = B64
            .decode(data.trim())
            .map_err(|e| anyhow::anyhow!("base64 decode: {e}"))?;
        Ok(Self::new(mime_type, bytes))
    }

    /// Encoded form used when embedding the image in an outbound request.
    pub fn to_base64(&self) -> String {
        B64.encode(&self.bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub description: String,
    pub reference_images: Vec<ImageData>,
    pub model_sheet: Option<ImageData>,
    pub generating_sheet: bool,
}

impl Character {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: format!("{:016x}", rand::random::<u64>()),
            name: name.into(),
            description: description.into(),
            reference_images: Vec::new(),
            model_sheet: None,
            generating_sheet: false,
        }
    }

    /// Model sheet when one exists, the raw uploads otherwise.
    pub fn preferred_references(&self) -> &[ImageData] {
        match &self.model_sheet {
            Some(sheet) => std::slice::from_ref(sheet),
            None => &self.reference_images,
        }
    }

    pub fn description_or_default(&self) -> &str {
        if self.description.trim().is_empty() {
            "No description provided."
        } else {
            &self.description
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelStatus {
    Pending,
    Generating,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub id: usize,
    pub page: u32,
    pub panel: u32,
    pub scene_description: String,
    pub panel_text: String,
    #[serde(skip)]
    pub image: Option<ImageData>,
    pub status: PanelStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStage {
    Idle,
    Story,
    Images,
    Assembly,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub stage: GenerationStage,
    pub message: String,
    pub percentage: f64,
}

impl Default for GenerationProgress {
    fn default() -> Self {
        Self {
            stage: GenerationStage::Idle,
            message: "Waiting to start...".to_string(),
            percentage: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStep {
    Configuration,
    Characters,
    Generation,
    Comic,
}

#[derive(Debug, Clone)]
pub enum StateEvent {
    StepChanged(AppStep),
    Progress(GenerationProgress),
    PanelsReset(usize),
    PanelUpdated(Panel),
    PanelAdded(Panel),
    Error(String),
}

pub type Subscriber = Box<dyn Fn(&StateEvent) + Send + Sync>;

/// Everything the generation run mutates. Observers are told about every
/// transition; nothing outside these methods touches the fields.
pub struct ComicState {
    step: AppStep,
    panels: Vec<Panel>,
    progress: GenerationProgress,
    error: Option<String>,
    subscribers: Vec<Subscriber>,
}

impl Default for ComicState {
    fn default() -> Self {
        Self {
            step: AppStep::Configuration,
            panels: Vec::new(),
            progress: GenerationProgress::default(),
            error: None,
            subscribers: Vec::new(),
        }
    }
}

impl ComicState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, f: F)
    where
        F: Fn(&StateEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(f));
    }

    fn emit(&self, event: StateEvent) {
        for s in &self.subscribers {
            s(&event);
        }
    }

    pub fn step(&self) -> AppStep {
        self.step
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn progress(&self) -> &GenerationProgress {
        &self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn successful_panels(&self) -> usize {
        self.panels
            .iter()
            .filter(|p| p.status == PanelStatus::Done && p.image.is_some())
            .count()
    }

    pub fn failed_panels(&self) -> usize {
        self.panels
            .iter()
            .filter(|p| p.status == PanelStatus::Error)
            .count()
    }

    pub fn set_step(&mut self, step: AppStep) {
        self.step = step;
        self.emit(StateEvent::StepChanged(step));
    }

    /// Enters the generation step with no panels, no error and zero progress.
    pub fn begin_run(&mut self) {
        self.error = None;
        self.panels.clear();
        self.progress = GenerationProgress::default();
        self.set_step(AppStep::Generation);
        self.emit(StateEvent::PanelsReset(0));
        self.emit(StateEvent::Progress(self.progress.clone()));
    }

    /// Percentages never go backwards within a run.
    pub fn set_progress(&mut self, stage: GenerationStage, message: impl Into<String>, percentage: f64) {
        let previous = self.progress.percentage;
        if percentage < previous {
            debug!("progress {percentage} below {previous}, holding");
        }
        self.progress = GenerationProgress {
            stage,
            message: message.into(),
            percentage: percentage.max(previous).min(100.0),
        };
        self.emit(StateEvent::Progress(self.progress.clone()));
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        let stage = self.progress.stage;
        let percentage = self.progress.percentage;
        self.set_progress(stage, message, percentage);
    }

    pub fn set_percentage(&mut self, percentage: f64) {
        let stage = self.progress.stage;
        let message = self.progress.message.clone();
        self.set_progress(stage, message, percentage);
    }

    pub fn set_panels(&mut self, panels: Vec<Panel>) {
        self.panels = panels;
        self.emit(StateEvent::PanelsReset(self.panels.len()));
    }

    /// Updates one panel in place. Returns false when the id is unknown.
    pub fn mark_panel(&mut self, id: usize, status: PanelStatus, image: Option<ImageData>) -> bool {
        let Some(panel) = self.panels.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        panel.status = status;
        if image.is_some() || status == PanelStatus::Error {
            panel.image = image;
        }
        let updated = panel.clone();
        self.emit(StateEvent::PanelUpdated(updated));
        true
    }

    pub fn push_panel(&mut self, panel: Panel) {
        self.panels.push(panel.clone());
        self.emit(StateEvent::PanelAdded(panel));
    }

    /// Records a user-facing error and moves to `step`.
    pub fn fail_to(&mut self, step: AppStep, message: impl Into<String>) {
        let message = message.into();
        self.error = Some(message.clone());
        self.emit(StateEvent::Error(message));
        self.set_step(step);
    }

    /// Assembly is over: full progress and the comic view.
    pub fn finish(&mut self) {
        self.set_progress(GenerationStage::Done, "Complete!", 100.0);
        self.set_step(AppStep::Comic);
    }

    pub fn reset(&mut self) {
        self.panels.clear();
        self.error = None;
        self.progress = GenerationProgress::default();
        self.emit(StateEvent::PanelsReset(0));
        self.emit(StateEvent::Progress(self.progress.clone()));
        self.set_step(AppStep::Configuration);
    }
}
