//! OpenAI-compatible Chat Completions provider.
//!
//! Sends one non-streaming request to `/v1/chat/completions`. Works with
//! OpenAI, DeepSeek, OpenRouter, Ollama and other compatible servers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use genie_tts_core::config::ProviderConfig;

use crate::CompletionProvider;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(id: &str, base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            &config.id,
            &config.base_url,
            &config.model,
            config.resolve_api_key(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, system: &str, prompt: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system".into(),
                content: system.into(),
            });
        }
        messages.push(ChatMessage {
            role: "user".into(),
            content: prompt.into(),
        });
        ChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Pull the assistant text out of a completion response.
fn assistant_text(response: ChatResponse) -> anyhow::Result<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("completion response has no choices"))?;
    if choice.message.role != "assistant" {
        anyhow::bail!("unexpected completion role: {}", choice.message.role);
    }
    Ok(choice.message.content)
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        let body = self.request_body(system, prompt);
        debug!(
            provider = %self.id,
            model = %body.model,
            base_url = %self.base_url,
            "Requesting completion"
        );

        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} API error {status}: {body}", self.id);
        }

        let parsed: ChatResponse = response.json().await?;
        assistant_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn test_request_body_skips_empty_system() {
        let provider =
            OpenAiCompatProvider::new("openai", "https://api.openai.com/", "gpt-4o-mini", None);
        assert_eq!(provider.base_url(), "https://api.openai.com");

        let request = provider.request_body("", "hi");
        let body = serde_json::to_value(request).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");

        let request = provider.request_body("be brief", "hi");
        let body = serde_json::to_value(request).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_assistant_text_extraction() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "你好"},
                "finish_reason": "stop"
            }]
        });
        let parsed: ChatResponse = serde_json::from_value(body).unwrap();
        assert_eq!(assistant_text(parsed).unwrap(), "你好");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(assistant_text(empty).is_err());

        let wrong_role: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"tool","content":"x"}}]}"#,
        )
        .unwrap();
        assert!(assistant_text(wrong_role).is_err());
    }

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn completions(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        seen.lock().unwrap().push((auth, body));
        Json(json!({
            "choices": [{"message": {"role": "assistant", "content": "  translated  "}}]
        }))
    }

    #[tokio::test]
    async fn test_complete_against_stub_server() {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = OpenAiCompatProvider::new(
            "local",
            &format!("http://{addr}"),
            "qwen2.5",
            Some("sk-test".into()),
        );
        let text = provider.complete("", "Hello there").await.unwrap();
        assert_eq!(text, "  translated  ");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("Bearer sk-test"));
        assert_eq!(seen[0].1["messages"][0]["content"], "Hello there");
    }

    #[tokio::test]
    async fn test_complete_surfaces_error_status() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = OpenAiCompatProvider::new("local", &format!("http://{addr}"), "m", None);
        let err = provider.complete("", "hi").await.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("bad key"));
    }
}
