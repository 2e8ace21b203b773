use crate::core::config::StoryConfig;
use crate::core::error::ComicError;
use crate::core::state::{Character, Panel, PanelStatus};
use crate::services::llm::{GenAiClient, TextRequest};
use crate::services::prompt;
use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const REQUIRED_PANEL_KEYS: [&str; 4] = ["page", "panel", "sceneDescription", "panelText"];

/// One panel as described by the story breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelScript {
    pub page: u32,
    pub panel: u32,
    pub scene_description: String,
    pub panel_text: String,
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if !s.starts_with("```") {
        return s.to_string();
    }
    // Language tag may be followed by a newline or sit on the same line
    let body = s[3..].trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

/// Raw parse first, then with code fences stripped, then give up.
pub fn parse_json_tolerant(text: &str) -> Result<Value, ComicError> {
    let raw_err = match serde_json::from_str::<Value>(text.trim()) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };
    debug!("Raw JSON parse failed ({}), retrying without code fences", raw_err);

    let stripped = strip_code_blocks(text);
    serde_json::from_str::<Value>(&stripped).map_err(|e| {
        ComicError::MalformedOutput(format!("response is not valid JSON ({}): {}", e, stripped))
    })
}

fn number_field(item: &Value, key: &str, index: usize) -> Result<u32, ComicError> {
    let value = &item[key];
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => Ok(n as u32),
        _ => Err(ComicError::MalformedOutput(format!(
            "panel {} has a non-numeric \"{}\": {}",
            index, key, value
        ))),
    }
}

fn text_field(item: &Value, key: &str) -> String {
    match &item[key] {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn parse_panel_breakdown(text: &str) -> Result<Vec<PanelScript>, ComicError> {
    let value = parse_json_tolerant(text)?;
    let Value::Array(items) = value else {
        return Err(ComicError::MalformedOutput(
            "Invalid panel structure received from AI. The response was not a valid array of panels with page numbers.".to_string(),
        ));
    };

    let mut panels = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Err(ComicError::MalformedOutput(format!("panel {} is not an object", i)));
        };
        if let Some(missing) = REQUIRED_PANEL_KEYS.iter().find(|k| !obj.contains_key(**k)) {
            return Err(ComicError::MalformedOutput(format!(
                "panel {} is missing \"{}\"",
                i, missing
            )));
        }
        panels.push(PanelScript {
            page: number_field(item, "page", i)?,
            panel: number_field(item, "panel", i)?,
            scene_description: text_field(item, "sceneDescription"),
            panel_text: text_field(item, "panelText"),
        });
    }
    Ok(panels)
}

pub fn parse_page_summaries(text: &str) -> Result<Vec<String>, ComicError> {
    let value = parse_json_tolerant(text)?;
    let malformed =
        || ComicError::MalformedOutput("AI did not return a valid array of page summary strings.".to_string());

    let Value::Array(items) = value else {
        return Err(malformed());
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            _ => Err(malformed()),
        })
        .collect()
}

/// Gives every panel a sequential id in source order.
pub fn number_panels(scripts: Vec<PanelScript>) -> Vec<Panel> {
    scripts
        .into_iter()
        .enumerate()
        .map(|(id, s)| Panel {
            id,
            page: s.page,
            panel: s.panel,
            scene_description: s.scene_description,
            panel_text: s.panel_text,
            image: None,
            status: PanelStatus::Pending,
        })
        .collect()
}

/// Panel-level breakdown for the discrete image path. Single attempt.
pub async fn break_down_story(
    client: &dyn GenAiClient,
    story: &StoryConfig,
    script: &str,
    characters: &[Character],
) -> Result<Vec<PanelScript>> {
    let request = TextRequest {
        model: story.text_model.clone(),
        system: prompt::story_breakdown_system(story, characters),
        user: prompt::story_breakdown_user(script),
        json: true,
    };
    let response = client.generate_text(&request).await?;
    Ok(parse_panel_breakdown(&response)?)
}

/// Page summaries for the streaming path. Single attempt.
pub async fn break_down_pages(
    client: &dyn GenAiClient,
    story: &StoryConfig,
    script: &str,
) -> Result<Vec<String>> {
    let request = TextRequest {
        model: story.text_model.clone(),
        system: prompt::page_breakdown_system(story),
        user: prompt::page_breakdown_user(script, story.pages),
        json: true,
    };
    let response = client.generate_text(&request).await?;
    let summaries = parse_page_summaries(&response)?;
    if summaries.len() != story.pages as usize {
        warn!(
            "Asked for {} page(s), AI returned {} summaries",
            story.pages,
            summaries.len()
        );
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"[
        {"page": 1, "panel": 1, "sceneDescription": "Rooftop at night", "panelText": "HERO: Here we go."},
        {"page": 1, "panel": 2, "sceneDescription": "Jump", "panelText": "Whoosh"},
        {"page": 2, "panel": 1, "sceneDescription": "Landing", "panelText": ""}
    ]"#;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
        assert_eq!(strip_code_blocks("```[1]```"), "[1]");
        assert_eq!(strip_code_blocks("```json [1, 2]```"), "[1, 2]");
        assert_eq!(strip_code_blocks("```JSON\r\n[1]\r\n```"), "[1]");
    }

    #[test]
    fn test_single_line_fence_with_tag_parses() {
        let text = r#"```json [{"page": 1, "panel": 1, "sceneDescription": "Gate", "panelText": "Hi"}]```"#;
        let panels = parse_panel_breakdown(text).unwrap();
        assert_eq!(panels.len(), 1);
        assert_eq!(panels[0].scene_description, "Gate");
    }

    #[test]
    fn test_tolerant_parse_fallback_order() {
        assert_eq!(parse_json_tolerant(" [1] ").unwrap(), serde_json::json!([1]));
        assert_eq!(
            parse_json_tolerant("```json\n[1, 2]\n```").unwrap(),
            serde_json::json!([1, 2])
        );
        assert!(matches!(
            parse_json_tolerant("Sure! Here you go: [1"),
            Err(ComicError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_parse_valid_breakdown_preserves_order() {
        let panels = parse_panel_breakdown(VALID).unwrap();
        assert_eq!(panels.len(), 3);
        assert_eq!((panels[1].page, panels[1].panel), (1, 2));
        assert_eq!(panels[2].panel_text, "");

        let numbered = number_panels(panels);
        let ids: Vec<usize> = numbered.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(numbered.iter().all(|p| p.status == PanelStatus::Pending));
        assert_eq!(numbered[2].page, 2);
    }

    #[test]
    fn test_parse_fenced_breakdown() {
        let fenced = format!("```json\n{}\n```", VALID);
        assert_eq!(parse_panel_breakdown(&fenced).unwrap().len(), 3);
    }

    #[test]
    fn test_reject_non_array() {
        let err = parse_panel_breakdown(r#"{"panels": []}"#).unwrap_err();
        assert!(err.to_string().contains("not a valid array"));
    }

    #[test]
    fn test_reject_missing_keys() {
        for key in REQUIRED_PANEL_KEYS {
            let mut item = serde_json::json!({
                "page": 1, "panel": 1, "sceneDescription": "s", "panelText": "t"
            });
            item.as_object_mut().unwrap().remove(key);
            let text = serde_json::json!([item]).to_string();
            let err = parse_panel_breakdown(&text).unwrap_err();
            assert!(err.to_string().contains(key), "{} -> {}", key, err);
        }
    }

    #[test]
    fn test_numeric_strings_are_accepted() {
        let text = r#"[{"page": "2", "panel": 3, "sceneDescription": "s", "panelText": null}]"#;
        let panels = parse_panel_breakdown(text).unwrap();
        assert_eq!((panels[0].page, panels[0].panel), (2, 3));
        assert!(parse_panel_breakdown(
            r#"[{"page": "two", "panel": 3, "sceneDescription": "s", "panelText": "t"}]"#
        )
        .is_err());
    }

    #[test]
    fn test_page_summaries() {
        assert_eq!(
            parse_page_summaries(r#"["one", "two"]"#).unwrap(),
            vec!["one".to_string(), "two".to_string()]
        );
        assert!(parse_page_summaries(r#"["one", 2]"#).is_err());
        assert!(parse_page_summaries(r#""one""#).is_err());
    }
}
