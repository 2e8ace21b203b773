//! Scripted `GenAiClient` for tests. Every call pops the next queued answer
//! for its kind; an empty queue is an error.

use super::{Content, ContentResponse, GenAiClient, ImageRequest, Modality, Part, PartStream, TextRequest};
use crate::core::state::ImageData;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub fn jpeg(tag: u8) -> ImageData {
    ImageData::new("image/jpeg", vec![0xFF, 0xD8, 0xFF, tag])
}

#[derive(Debug, Default)]
pub struct MockClient {
    texts: Mutex<VecDeque<Result<String, String>>>,
    images: Mutex<VecDeque<Result<Vec<ImageData>, String>>>,
    contents: Mutex<VecDeque<Result<ContentResponse, String>>>,
    streams: Mutex<VecDeque<Vec<Result<Part, String>>>>,
    pub calls: Arc<Mutex<Vec<&'static str>>>,
    pub text_requests: Mutex<Vec<TextRequest>>,
    pub image_requests: Mutex<Vec<ImageRequest>>,
    pub content_requests: Mutex<Vec<(String, Vec<Content>)>>,
    pub stream_requests: Mutex<Vec<(String, Vec<Content>)>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(self, body: &str) -> Self {
        self.texts.lock().unwrap().push_back(Ok(body.to_string()));
        self
    }

    pub fn text_error(self, message: &str) -> Self {
        self.texts.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn image(self, image: ImageData) -> Self {
        self.images.lock().unwrap().push_back(Ok(vec![image]));
        self
    }

    pub fn no_image(self) -> Self {
        self.images.lock().unwrap().push_back(Ok(vec![]));
        self
    }

    pub fn image_error(self, message: &str) -> Self {
        self.images.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn content(self, response: ContentResponse) -> Self {
        self.contents.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn content_error(self, message: &str) -> Self {
        self.contents.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn stream(self, parts: Vec<Result<Part, String>>) -> Self {
        self.streams.lock().unwrap().push_back(parts);
        self
    }

    pub fn count(&self, kind: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| **k == kind).count()
    }

    fn record(&self, kind: &'static str) {
        self.calls.lock().unwrap().push(kind);
    }
}

fn pop<T>(queue: &Mutex<VecDeque<Result<T, String>>>, kind: &str) -> Result<T> {
    match queue.lock().unwrap().pop_front() {
        Some(Ok(v)) => Ok(v),
        Some(Err(message)) => Err(anyhow!(message)),
        None => Err(anyhow!("no scripted {} response left", kind)),
    }
}

#[async_trait]
impl GenAiClient for MockClient {
    async fn generate_text(&self, request: &TextRequest) -> Result<String> {
        self.record("text");
        self.text_requests.lock().unwrap().push(request.clone());
        pop(&self.texts, "text")
    }

    async fn generate_images(&self, request: &ImageRequest) -> Result<Vec<ImageData>> {
        self.record("images");
        self.image_requests.lock().unwrap().push(request.clone());
        pop(&self.images, "image")
    }

    async fn generate_content(
        &self,
        model: &str,
        contents: &[Content],
        _modalities: &[Modality],
    ) -> Result<ContentResponse> {
        self.record("content");
        self.content_requests
            .lock()
            .unwrap()
            .push((model.to_string(), contents.to_vec()));
        pop(&self.contents, "content")
    }

    async fn stream_content(
        &self,
        model: &str,
        contents: &[Content],
        _modalities: &[Modality],
    ) -> Result<PartStream> {
        self.record("stream");
        self.stream_requests
            .lock()
            .unwrap()
            .push((model.to_string(), contents.to_vec()));
        let parts = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted stream left"))?;
        let items: Vec<Result<Part>> = parts.into_iter().map(|p| p.map_err(|m| anyhow!(m))).collect();
        Ok(futures_util::stream::iter(items).boxed())
    }
}
