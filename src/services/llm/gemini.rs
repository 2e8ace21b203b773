use super::{
    Content, ContentResponse, GenAiClient, ImageRequest, Modality, Part, PartStream, Role,
    TextRequest,
};
use crate::core::state::ImageData;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use url::Url;

/// Finish reasons that mean the service refused to answer.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    base_url: Url,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, base_url: &str, timeout_seconds: Option<u64>) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("Invalid base URL: {}", base_url))?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            api_key: api_key.to_string(),
            base_url,
            client: builder.build()?,
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> Result<Url> {
        let model = model.trim_start_matches("models/");
        self.base_url
            .join(&format!("models/{}:{}", model, method))
            .with_context(|| format!("Invalid model id: {}", model))
    }

    async fn post<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> Result<reqwest::Response> {
        debug!("POST {}", url.path());
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini API error ({}): {}", status, error_text));
        }
        Ok(resp)
    }
}

// --- Wire types ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct WireContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireBlob>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireBlob {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<WireContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Serialize, Debug)]
struct PredictRequest {
    instances: Vec<PredictInstance>,
    parameters: PredictParameters,
}

#[derive(Serialize, Debug)]
struct PredictInstance {
    prompt: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
    aspect_ratio: String,
    output_options: OutputOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    /// Seeds are ignored unless watermarking is off.
    #[serde(skip_serializing_if = "Option::is_none")]
    add_watermark: Option<bool>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OutputOptions {
    mime_type: String,
}

#[derive(Deserialize, Debug)]
struct PredictResponse {
    predictions: Option<Vec<Prediction>>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
    rai_filtered_reason: Option<String>,
}

// --- Conversions ---

impl From<&Part> for WirePart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(t) => WirePart {
                text: Some(t.clone()),
                inline_data: None,
            },
            Part::Image(img) => WirePart {
                text: None,
                inline_data: Some(WireBlob {
                    mime_type: img.mime_type.clone(),
                    data: img.to_base64(),
                }),
            },
        }
    }
}

impl From<&Content> for WireContent {
    fn from(content: &Content) -> Self {
        let role = match content.role {
            Role::User => "user",
            Role::Model => "model",
        };
        WireContent {
            role: Some(role.to_string()),
            parts: content.parts.iter().map(WirePart::from).collect(),
        }
    }
}

fn wire_parts_to_parts(parts: Vec<WirePart>) -> Result<Vec<Part>> {
    let mut out = Vec::new();
    for p in parts {
        if let Some(blob) = p.inline_data {
            out.push(Part::Image(ImageData::from_base64(blob.mime_type, &blob.data)?));
        } else if let Some(text) = p.text {
            out.push(Part::Text(text));
        }
    }
    Ok(out)
}

fn modality_names(modalities: &[Modality]) -> Option<Vec<String>> {
    if modalities.is_empty() {
        return None;
    }
    Some(
        modalities
            .iter()
            .map(|m| match m {
                Modality::Text => "TEXT".to_string(),
                Modality::Image => "IMAGE".to_string(),
            })
            .collect(),
    )
}

fn content_request(contents: &[Content], modalities: &[Modality]) -> GenerateRequest {
    GenerateRequest {
        contents: contents.iter().map(WireContent::from).collect(),
        system_instruction: None,
        generation_config: modality_names(modalities).map(|names| GenerationConfig {
            response_mime_type: None,
            response_modalities: Some(names),
        }),
    }
}

fn into_content_response(result: GenerateResponse) -> Result<ContentResponse> {
    if let Some(err) = result.error {
        return Err(anyhow!("Gemini API returned error: {}", err.message));
    }

    let block_reason = result.prompt_feedback.and_then(|f| f.block_reason);
    let mut response = ContentResponse {
        block_reason,
        ..Default::default()
    };

    if let Some(first) = result.candidates.and_then(|c| c.into_iter().next()) {
        response.finish_reason = first.finish_reason;
        if let Some(content) = first.content {
            response.parts = wire_parts_to_parts(content.parts)?;
        }
    }
    Ok(response)
}

/// Fragments carried by one SSE `data:` payload, and the error that ends the
/// stream after them, if any.
struct StreamEvent {
    parts: Vec<Part>,
    stop: Option<anyhow::Error>,
}

fn parse_stream_event(data: &str) -> Result<StreamEvent> {
    let result: GenerateResponse = serde_json::from_str(data)
        .map_err(|e| anyhow!("Failed to parse stream chunk: {}. Body: {}", e, data))?;
    let response = into_content_response(result)?;

    let stop = match (&response.block_reason, response.finish_reason.as_deref()) {
        (Some(reason), _) => Some(anyhow!("Prompt blocked: {}", reason)),
        (None, Some(reason)) if BLOCKING_FINISH_REASONS.contains(&reason) => {
            Some(anyhow!("Response stopped: {}", reason))
        }
        _ => None,
    };
    Ok(StreamEvent {
        parts: response.parts,
        stop,
    })
}

/// Splits a server-sent-event byte stream into `data:` payloads.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            self.handle_line(line, &mut events);
        }
        events
    }

    pub(crate) fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest).trim_end_matches(['\n', '\r']).to_string();
            self.handle_line(&line, &mut events);
        }
        self.handle_line("", &mut events);
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.join("\n"));
                self.data.clear();
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }
}

struct StreamState {
    inner: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<Part>>,
    done: bool,
}

impl StreamState {
    fn push_events(&mut self, events: Vec<String>) {
        for event in events {
            match parse_stream_event(&event) {
                Ok(StreamEvent { parts, stop }) => {
                    self.pending.extend(parts.into_iter().map(Ok));
                    if let Some(e) = stop {
                        self.pending.push_back(Err(e));
                        self.done = true;
                        return;
                    }
                }
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.done = true;
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl GenAiClient for GeminiClient {
    async fn generate_text(&self, request: &TextRequest) -> Result<String> {
        let url = self.endpoint(&request.model, "generateContent")?;
        let body = GenerateRequest {
            contents: vec![WireContent::from(&Content::user(vec![Part::text(&request.user)]))],
            system_instruction: Some(WireContent {
                role: None,
                parts: vec![WirePart::from(&Part::text(&request.system))],
            }),
            generation_config: request.json.then(|| GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_modalities: None,
            }),
        };

        let response_text = self.post(url, &body).await?.text().await?;
        let result: GenerateResponse = serde_json::from_str(&response_text).map_err(|e| {
            anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)
        })?;
        let response = into_content_response(result)?;

        let text = response.text();
        if text.trim().is_empty() {
            let reason = response
                .block_reason
                .or(response.finish_reason)
                .unwrap_or_else(|| "UNKNOWN".to_string());
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }
        Ok(text)
    }

    async fn generate_images(&self, request: &ImageRequest) -> Result<Vec<ImageData>> {
        let url = self.endpoint(&request.model, "predict")?;
        let body = PredictRequest {
            instances: vec![PredictInstance {
                prompt: request.prompt.clone(),
            }],
            parameters: PredictParameters {
                sample_count: 1,
                aspect_ratio: request.aspect_ratio.clone(),
                output_options: OutputOptions {
                    mime_type: "image/jpeg".to_string(),
                },
                seed: request.seed,
                add_watermark: request.seed.map(|_| false),
            },
        };

        let result: PredictResponse = self
            .post(url, &body)
            .await?
            .json()
            .await
            .context("Failed to parse Imagen response")?;
        if let Some(err) = result.error {
            return Err(anyhow!("Imagen API returned error: {}", err.message));
        }

        let mut images = Vec::new();
        for prediction in result.predictions.unwrap_or_default() {
            match prediction.bytes_base64_encoded {
                Some(data) => {
                    let mime = prediction.mime_type.unwrap_or_else(|| "image/jpeg".to_string());
                    images.push(ImageData::from_base64(mime, &data)?);
                }
                None => {
                    if let Some(reason) = prediction.rai_filtered_reason {
                        warn!("Image filtered: {}", reason);
                    }
                }
            }
        }
        Ok(images)
    }

    async fn generate_content(
        &self,
        model: &str,
        contents: &[Content],
        modalities: &[Modality],
    ) -> Result<ContentResponse> {
        let url = self.endpoint(model, "generateContent")?;
        let body = content_request(contents, modalities);
        let result: GenerateResponse = self
            .post(url, &body)
            .await?
            .json()
            .await
            .context("Failed to parse Gemini response")?;
        into_content_response(result)
    }

    async fn stream_content(
        &self,
        model: &str,
        contents: &[Content],
        modalities: &[Modality],
    ) -> Result<PartStream> {
        let mut url = self.endpoint(model, "streamGenerateContent")?;
        url.query_pairs_mut().append_pair("alt", "sse");
        let body = content_request(contents, modalities);

        let resp = self.post(url, &body).await?;
        let inner = resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed();

        let state = StreamState {
            inner,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures_util::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.done {
                    return None;
                }
                match st.inner.next().await {
                    Some(Ok(chunk)) => {
                        let events = st.decoder.feed(&chunk);
                        st.push_events(events);
                    }
                    Some(Err(e)) => {
                        st.pending.push_back(Err(anyhow!(e).context("Stream error")));
                        st.done = true;
                    }
                    None => {
                        let events = st.decoder.finish();
                        st.push_events(events);
                        st.done = true;
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
