//! Local-server protocol (Ollama-compatible `/api/generate`).
//!
//! No credential. The response body is either a single JSON object or
//! newline-delimited JSON objects, each carrying a partial `response`
//! field; fragments are concatenated in order.

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{is_success, status_error};
use crate::error::Error;
use crate::transport::HttpClientPool;
use crate::types::{BackendConfig, InvocationRequest, InvocationResult};
use crate::Result;

pub(crate) fn build_body(request: &InvocationRequest) -> Value {
    json!({
        "model": request.config.model,
        "prompt": request.prompt,
        "stream": false,
        "options": {
            "temperature": request.config.temperature,
            "num_predict": request.config.max_tokens,
        },
    })
}

pub(crate) async fn invoke(
    pool: &HttpClientPool,
    request: &InvocationRequest,
    cancel: &CancellationToken,
) -> Result<InvocationResult> {
    let config = &request.config;
    let url = format!("{}/api/generate", config.base());
    let body = build_body(request);

    let (status, text) = pool
        .post_json(config, &url, &body, &[], None, request.read_timeout(), cancel)
        .await?;
    if !is_success(status) {
        return Err(status_error(status, &text));
    }
    parse_body(&text)
}

/// Parse a generate response: one JSON object, or one per line.
pub(crate) fn parse_body(text: &str) -> Result<InvocationResult> {
    let fragments: Vec<Value> = match serde_json::from_str::<Value>(text) {
        Ok(single) => vec![single],
        Err(_) => text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect(),
    };

    if fragments.is_empty() {
        return Err(Error::Api("empty response from local model".into()));
    }

    // A server-side failure arrives as an `error` field in the body.
    if let Some(err) = fragments
        .iter()
        .find_map(|f| f.get("error").and_then(|e| e.as_str()))
    {
        return Err(Error::Api(format!("local model error: {}", err)));
    }

    let mut content = String::new();
    for fragment in &fragments {
        if let Some(part) = fragment.get("response").and_then(|r| r.as_str()) {
            content.push_str(part);
        }
    }
    if content.trim().is_empty() {
        return Err(Error::Api("empty response from local model".into()));
    }

    let mut result = InvocationResult::ok(content.trim());
    if let Some(last) = fragments.last() {
        let prompt_eval = last.get("prompt_eval_count").and_then(|c| c.as_u64()).unwrap_or(0);
        let eval = last.get("eval_count").and_then(|c| c.as_u64()).unwrap_or(0);
        if prompt_eval + eval > 0 {
            result = result.with_tokens(prompt_eval + eval);
        }
    }
    Ok(result)
}

/// Tags/list probe.
pub(crate) async fn test_connection(
    pool: &HttpClientPool,
    config: &BackendConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let url = format!("{}/api/tags", config.base());
    let (status, text) = pool
        .get(config, &url, &[], None, config.read_timeout, cancel)
        .await?;
    if !is_success(status) {
        return Err(status_error(status, &text));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendKind, InvocationOptions};

    fn request() -> InvocationRequest {
        InvocationRequest {
            request_id: "req-1".into(),
            config: BackendConfig::new("l", BackendKind::Local, "http://localhost:11434", "llama3")
                .with_temperature(0.5)
                .with_max_tokens(128),
            prompt: "Hi".into(),
            credential: None,
            options: InvocationOptions::default(),
        }
    }

    #[test]
    fn test_build_body_carries_options() {
        let body = build_body(&request());
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 128);
        assert_eq!(body["options"]["temperature"], 0.5);
    }

    #[test]
    fn test_parse_single_object() {
        let r = parse_body(r#"{"response": "hello", "done": true, "eval_count": 7, "prompt_eval_count": 3}"#).unwrap();
        assert_eq!(r.content.as_deref(), Some("hello"));
        assert_eq!(r.tokens_used, Some(10));
    }

    #[test]
    fn test_parse_ndjson_concatenates_in_order() {
        let body = "{\"response\": \"Hel\", \"done\": false}\n{\"response\": \"lo \", \"done\": false}\n{\"response\": \"world\", \"done\": true}\n";
        let r = parse_body(body).unwrap();
        assert_eq!(r.content.as_deref(), Some("Hello world"));
    }

    #[test]
    fn test_parse_nothing_parses() {
        let err = parse_body("not json at all").unwrap_err();
        assert!(err.to_string().contains("empty response"));
    }

    #[test]
    fn test_parse_blank_fragments() {
        let err = parse_body(r#"{"done": true}"#).unwrap_err();
        assert!(err.to_string().contains("empty response"));
    }

    #[test]
    fn test_parse_server_error_field() {
        let err = parse_body(r#"{"error": "model 'x' not found"}"#).unwrap_err();
        assert!(err.to_string().contains("model 'x' not found"));
    }
}
