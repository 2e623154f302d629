//! `generateContent` request bodies and response parsing.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};

use gcb_core::{
    errors::Error,
    model::types::{
        GeneratedImage, Generation, ImageRequest, SafetyLevel, TextRequest, TokenUsage,
        HARM_CATEGORIES,
    },
    Result,
};

fn safety_settings(level: SafetyLevel) -> Value {
    Value::Array(
        HARM_CATEGORIES
            .iter()
            .map(|c| json!({ "category": c, "threshold": level.threshold() }))
            .collect(),
    )
}

fn system_instruction(body: &mut Value, system_prompt: &str) {
    if !system_prompt.trim().is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system_prompt }] });
    }
}

pub fn text_body(req: &TextRequest) -> Value {
    let mut parts = Vec::new();
    if let Some(img) = &req.image {
        parts.push(json!({
            "inline_data": { "mime_type": img.mime_type, "data": STANDARD.encode(&img.bytes) }
        }));
    }
    parts.push(json!({ "text": req.framed_prompt() }));

    let mut body = json!({
        "contents": [{ "role": "user", "parts": parts }],
        "safetySettings": safety_settings(req.safety),
    });
    system_instruction(&mut body, &req.system_prompt);
    body
}

/// Search sends the bare prompt (no channel context) with the search tool attached.
pub fn search_body(req: &TextRequest) -> Value {
    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": req.prompt }] }],
        "tools": [{ "google_search": {} }],
        "generationConfig": { "responseModalities": ["TEXT"] },
        "safetySettings": safety_settings(req.safety),
    });
    system_instruction(&mut body, &req.system_prompt);
    body
}

pub fn image_body(req: &ImageRequest) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": req.prompt }] }],
        "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        "safetySettings": safety_settings(req.safety),
    })
}

fn candidate_parts(resp: &Value) -> Result<&Vec<Value>> {
    if let Some(reason) = resp
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(Error::External(format!("prompt blocked: {reason}")));
    }

    let candidate = resp
        .pointer("/candidates/0")
        .ok_or_else(|| Error::External("gemini returned no candidates".to_string()))?;

    match candidate.pointer("/content/parts").and_then(Value::as_array) {
        Some(parts) if !parts.is_empty() => Ok(parts),
        _ => {
            let reason = candidate
                .get("finishReason")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN");
            Err(Error::External(format!(
                "gemini returned an empty answer (finish reason: {reason})"
            )))
        }
    }
}

fn usage(resp: &Value) -> Option<TokenUsage> {
    let meta = resp.get("usageMetadata")?;
    Some(TokenUsage {
        input_tokens: meta.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0),
        output_tokens: meta
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    })
}

/// Concatenate the text parts of the first candidate.
pub fn parse_generation(resp: &Value, requested_model: &str) -> Result<Generation> {
    let text: String = candidate_parts(resp)?
        .iter()
        .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(Error::External("gemini returned no text".to_string()));
    }

    let model = resp
        .get("modelVersion")
        .and_then(Value::as_str)
        .unwrap_or(requested_model)
        .to_string();

    Ok(Generation {
        text,
        model,
        usage: usage(resp),
    })
}

/// First image part plus the (trimmed) text parts as caption; both are required.
pub fn parse_image(resp: &Value) -> Result<GeneratedImage> {
    let mut image: Option<(String, Vec<u8>)> = None;
    let mut caption = String::new();

    for part in candidate_parts(resp)? {
        let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
        if let Some(inline) = inline {
            let mime = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if image.is_none() && mime.starts_with("image/") {
                let data = inline.get("data").and_then(Value::as_str).unwrap_or("");
                let bytes = STANDARD
                    .decode(data)
                    .map_err(|e| Error::External(format!("bad image payload: {e}")))?;
                image = Some((mime.to_string(), bytes));
            }
        } else if let Some(t) = part.get("text").and_then(Value::as_str) {
            caption.push_str(t.trim());
        }
    }

    match image {
        Some((mime_type, bytes)) if !caption.is_empty() && !bytes.is_empty() => {
            Ok(GeneratedImage {
                bytes,
                mime_type,
                caption,
            })
        }
        _ => Err(Error::External(
            "response is missing the image or its caption".to_string(),
        )),
    }
}

/// Best-effort message out of an error body (`{"error": {"message": ...}}`).
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcb_core::model::types::InlineImage;

    fn text_req() -> TextRequest {
        TextRequest {
            model: "gemini-2.0-flash".into(),
            system_prompt: "be brief".into(),
            prompt: "hello".into(),
            history: vec!["ann:  earlier".into()],
            image: None,
            safety: SafetyLevel::Strict,
        }
    }

    #[test]
    fn text_body_carries_prompt_context_and_safety() {
        let body = text_body(&text_req());
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        let text = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("The users prompt: hello"));
        assert!(text.contains("ann:  earlier"));

        let safety = body["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), 5);
        assert!(safety
            .iter()
            .all(|s| s["threshold"] == "BLOCK_MEDIUM_AND_ABOVE"));
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn image_part_precedes_text() {
        let mut req = text_req();
        req.system_prompt = "  ".into();
        req.image = Some(InlineImage {
            mime_type: "image/png".into(),
            bytes: b"png".to_vec(),
        });
        let body = text_body(&req);
        assert_eq!(body["contents"][0]["parts"][0]["inline_data"]["data"], "cG5n");
        assert!(body["contents"][0]["parts"][1]["text"].is_string());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn search_and_image_bodies() {
        let body = search_body(&text_req());
        assert_eq!(body["tools"][0], json!({ "google_search": {} }));
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");

        let body = image_body(&ImageRequest {
            model: "img".into(),
            prompt: "a cat".into(),
            safety: SafetyLevel::Relaxed,
        });
        assert_eq!(
            body["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
        assert_eq!(body["safetySettings"][0]["threshold"], "BLOCK_ONLY_HIGH");
    }

    #[test]
    fn parses_text_and_usage() {
        let resp = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "plan", "thought": true },
                { "text": "Hello " },
                { "text": "world" }
            ] } }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 3 },
            "modelVersion": "gemini-2.0-flash-001"
        });
        let g = parse_generation(&resp, "gemini-2.0-flash").unwrap();
        assert_eq!(g.text, "Hello world");
        assert_eq!(g.model, "gemini-2.0-flash-001");
        assert_eq!(
            g.usage,
            Some(TokenUsage {
                input_tokens: 12,
                output_tokens: 3
            })
        );
    }

    #[test]
    fn blocked_or_empty_answers_are_errors() {
        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = parse_generation(&blocked, "m").unwrap_err();
        assert!(err.to_string().contains("SAFETY"));

        let empty = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        assert!(parse_generation(&empty, "m").is_err());
        assert!(parse_generation(&json!({}), "m").is_err());
    }

    #[test]
    fn parses_image_with_caption() {
        let resp = json!({
            "candidates": [{ "content": { "parts": [
                { "text": " A cat. " },
                { "inlineData": { "mimeType": "image/png", "data": "cG5n" } }
            ] } }]
        });
        let img = parse_image(&resp).unwrap();
        assert_eq!(img.bytes, b"png");
        assert_eq!(img.mime_type, "image/png");
        assert_eq!(img.caption, "A cat.");

        let no_caption = json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "cG5n" } }
            ] } }]
        });
        assert!(parse_image(&no_caption).is_err());
    }

    #[test]
    fn error_message_prefers_api_message() {
        assert_eq!(
            error_message(r#"{"error":{"code":400,"message":"API key not valid"}}"#),
            "API key not valid"
        );
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }
}
