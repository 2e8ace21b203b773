use crate::core::error::ComicError;
use crate::core::state::{Character, ImageData};
use crate::services::llm::{Content, GenAiClient, Modality};
use crate::services::prompt;
use log::{info, warn};

fn sheet_error(character: &Character, reason: impl Into<String>) -> ComicError {
    ComicError::ModelSheet {
        character: character.name.clone(),
        reason: reason.into(),
    }
}

/// Asks a multimodal model for one canonical reference image of `character`.
pub async fn generate_model_sheet(
    client: &dyn GenAiClient,
    model: &str,
    character: &Character,
) -> Result<ImageData, ComicError> {
    if character.reference_images.is_empty() {
        return Err(sheet_error(character, "upload at least one reference image first"));
    }

    info!("Generating model sheet for {}", character.name);
    let contents = [Content::user(prompt::model_sheet_parts(character))];
    let response = client
        .generate_content(model, &contents, &[Modality::Text, Modality::Image])
        .await
        .map_err(|e| sheet_error(character, format!("{:#}", e)))?;

    if let Some(reason) = &response.block_reason {
        return Err(sheet_error(character, format!("request blocked ({})", reason)));
    }
    if let Some(image) = response.images().find(|img| !img.is_empty()) {
        return Ok(image.clone());
    }

    let text = response.text();
    let reason = match (text.trim(), response.finish_reason.as_deref()) {
        ("", Some(finish)) if finish != "STOP" => format!("no image returned (finish reason {})", finish),
        ("", _) => "the model returned an empty response".to_string(),
        (text, _) => format!("the model answered with text only: {}", text),
    };
    Err(sheet_error(character, reason))
}

/// Folds a finished request back into the character. The `generating_sheet`
/// flag is cleared either way; the record is otherwise left alone on failure.
pub fn apply_model_sheet(character: &mut Character, result: Result<ImageData, ComicError>) -> Result<(), ComicError> {
    character.generating_sheet = false;
    match result {
        Ok(sheet) => {
            character.model_sheet = Some(sheet);
            Ok(())
        }
        Err(e) => {
            warn!("{}", e);
            Err(e)
        }
    }
}

/// Runs `generate_model_sheet` for one character and applies the result.
pub async fn refresh_model_sheet(
    client: &dyn GenAiClient,
    model: &str,
    character: &mut Character,
) -> Result<(), ComicError> {
    character.generating_sheet = true;
    let result = generate_model_sheet(client, model, character).await;
    apply_model_sheet(character, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::mock::{jpeg, MockClient};
    use crate::services::llm::{ContentResponse, Part};

    fn hero() -> Character {
        let mut c = Character::new("Hero", "red cape");
        c.reference_images = vec![jpeg(1), jpeg(2)];
        c
    }

    #[tokio::test]
    async fn test_sheet_supersedes_uploads() {
        let client = MockClient::new().content(ContentResponse {
            parts: vec![Part::text("Here it is"), Part::Image(jpeg(9))],
            ..Default::default()
        });
        let mut c = hero();
        refresh_model_sheet(&client, "gemini-2.0-flash-preview-image-generation", &mut c)
            .await
            .unwrap();

        assert!(!c.generating_sheet);
        assert_eq!(c.preferred_references(), &[jpeg(9)]);
        assert_eq!(c.reference_images.len(), 2);

        let requests = client.content_requests.lock().unwrap();
        let parts = &requests[0].1[0].parts;
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[2], Part::Text(_)));
    }

    #[tokio::test]
    async fn test_text_only_response_is_an_error() {
        let client = MockClient::new().content(ContentResponse {
            parts: vec![Part::text("I cannot draw that.")],
            finish_reason: Some("STOP".to_string()),
            ..Default::default()
        });
        let mut c = hero();
        let err = refresh_model_sheet(&client, "m", &mut c).await.unwrap_err();

        assert!(err.to_string().contains("text only: I cannot draw that."));
        assert!(!c.generating_sheet);
        assert!(c.model_sheet.is_none());
    }

    #[tokio::test]
    async fn test_blocked_and_empty_responses() {
        let client = MockClient::new()
            .content(ContentResponse {
                block_reason: Some("SAFETY".to_string()),
                ..Default::default()
            })
            .content(ContentResponse {
                finish_reason: Some("IMAGE_SAFETY".to_string()),
                ..Default::default()
            })
            .content(ContentResponse::default())
            .content_error("503 unavailable");
        let c = hero();

        let reasons: Vec<String> = [
            generate_model_sheet(&client, "m", &c).await,
            generate_model_sheet(&client, "m", &c).await,
            generate_model_sheet(&client, "m", &c).await,
            generate_model_sheet(&client, "m", &c).await,
        ]
        .into_iter()
        .map(|r| r.unwrap_err().to_string())
        .collect();

        assert!(reasons[0].contains("blocked (SAFETY)"));
        assert!(reasons[1].contains("IMAGE_SAFETY"));
        assert!(reasons[2].contains("empty response"));
        assert!(reasons[3].contains("503 unavailable"));
    }

    #[tokio::test]
    async fn test_no_references_skips_the_request() {
        let client = MockClient::new();
        let mut c = Character::new("Ghost", "");
        assert!(refresh_model_sheet(&client, "m", &mut c).await.is_err());
        assert_eq!(client.count("content"), 0);
        assert!(!c.generating_sheet);
    }
}
