use crate::core::config::Config;
use crate::core::error::ComicError;
use crate::core::state::ImageData;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use log::info;
use std::fmt::Debug;
use std::sync::Arc;

pub mod gemini;
#[cfg(test)]
pub(crate) mod mock;

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Image(ImageData),
}

impl Part {
    pub fn text(s: impl Into<String>) -> Self {
        Part::Text(s.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self { role: Role::User, parts }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self { role: Role::Model, parts }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Image,
}

#[derive(Debug, Clone)]
pub struct TextRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    /// Ask the service for `application/json` output.
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub aspect_ratio: String,
    pub seed: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ContentResponse {
    pub parts: Vec<Part>,
    pub finish_reason: Option<String>,
    pub block_reason: Option<String>,
}

impl ContentResponse {
    pub fn images(&self) -> impl Iterator<Item = &ImageData> {
        self.parts.iter().filter_map(|p| match p {
            Part::Image(img) => Some(img),
            Part::Text(_) => None,
        })
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Fragments of a streamed reply, in arrival order.
pub type PartStream = BoxStream<'static, Result<Part>>;

#[async_trait]
pub trait GenAiClient: Send + Sync + Debug {
    /// Single text completion.
    async fn generate_text(&self, request: &TextRequest) -> Result<String>;

    /// Still-image generation; zero or more images back.
    async fn generate_images(&self, request: &ImageRequest) -> Result<Vec<ImageData>>;

    /// One multimodal turn, answered in full.
    async fn generate_content(
        &self,
        model: &str,
        contents: &[Content],
        modalities: &[Modality],
    ) -> Result<ContentResponse>;

    /// One multimodal turn, answered as a stream of text/image fragments.
    async fn stream_content(
        &self,
        model: &str,
        contents: &[Content],
        modalities: &[Modality],
    ) -> Result<PartStream>;
}

/// Stateful conversation on top of `GenAiClient::stream_content`; every
/// message is sent together with the turns before it.
pub struct ChatSession {
    client: Arc<dyn GenAiClient>,
    model: String,
    modalities: Vec<Modality>,
    history: Vec<Content>,
}

impl ChatSession {
    pub fn new(client: Arc<dyn GenAiClient>, model: &str, modalities: &[Modality]) -> Self {
        Self {
            client,
            model: model.to_string(),
            modalities: modalities.to_vec(),
            history: Vec::new(),
        }
    }

    pub async fn send_message_stream(&mut self, parts: Vec<Part>) -> Result<PartStream> {
        self.history.push(Content::user(parts));
        self.client
            .stream_content(&self.model, &self.history, &self.modalities)
            .await
    }

    /// Appends the model's reply once the caller has consumed the stream.
    pub fn record_reply(&mut self, parts: Vec<Part>) {
        if !parts.is_empty() {
            self.history.push(Content::model(parts));
        }
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }
}

pub fn create_client(config: &Config) -> Result<Arc<dyn GenAiClient>> {
    let api_key = config.resolve_api_key().ok_or(ComicError::ClientNotReady)?;
    info!("Initializing Gemini client at {}", config.api.base_url);
    let client = gemini::GeminiClient::new(&api_key, &config.api.base_url, config.api.timeout_seconds)?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct EchoClient {
        seen_turns: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl GenAiClient for EchoClient {
        async fn generate_text(&self, _: &TextRequest) -> Result<String> {
            Ok(String::new())
        }
        async fn generate_images(&self, _: &ImageRequest) -> Result<Vec<ImageData>> {
            Ok(vec![])
        }
        async fn generate_content(&self, _: &str, _: &[Content], _: &[Modality]) -> Result<ContentResponse> {
            Ok(ContentResponse::default())
        }
        async fn stream_content(&self, _: &str, contents: &[Content], _: &[Modality]) -> Result<PartStream> {
            self.seen_turns.lock().unwrap().push(contents.len());
            Ok(futures_util::stream::iter(vec![Ok(Part::text("hi"))]).boxed())
        }
    }

    #[tokio::test]
    async fn test_chat_session_keeps_history() -> Result<()> {
        let client = Arc::new(EchoClient::default());
        let mut chat = ChatSession::new(client.clone(), "m", &[Modality::Text, Modality::Image]);

        let parts: Vec<Part> = chat
            .send_message_stream(vec![Part::text("one")])
            .await?
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_>>()?;
        chat.record_reply(parts);
        let second: Vec<_> = chat.send_message_stream(vec![Part::text("two")]).await?.collect().await;
        assert_eq!(second.len(), 1);

        assert_eq!(*client.seen_turns.lock().unwrap(), vec![1, 3]);
        assert_eq!(chat.history().len(), 3);
        assert_eq!(chat.history()[1].role, Role::Model);
        Ok(())
    }

    #[test]
    fn test_create_client_requires_key() {
        let mut config: Config = serde_yaml_ng::from_str("story: {script: x}").unwrap();
        config.api.api_key = Some("   ".to_string());
        if std::env::var(crate::core::config::API_KEY_ENV).is_err() {
            let err = create_client(&config).unwrap_err();
            assert!(err.downcast_ref::<ComicError>().is_some());
        }

        config.api.api_key = Some("key".to_string());
        assert!(create_client(&config).is_ok());
    }

    #[test]
    fn test_content_response_helpers() {
        let resp = ContentResponse {
            parts: vec![
                Part::text("a"),
                Part::Image(ImageData::new("image/png", vec![1])),
                Part::text("b"),
            ],
            ..Default::default()
        };
        assert_eq!(resp.text(), "ab");
        assert_eq!(resp.images().count(), 1);
    }
}
