//! Completion service: OpenAI-compatible Chat Completions over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::types::{ModelParams, Turn};

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API call failed: HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response had no message content")]
    EmptyResponse,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Next assistant message for `turns`, oldest first.
    async fn complete(
        &self,
        turns: &[Turn],
        params: &ModelParams,
    ) -> Result<String, CompletionError>;
}

pub struct OpenAiChat {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    project_id: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: &Config) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url().trim_end_matches('/')),
            api_key: config.api_key.clone(),
            project_id: config.project_id.clone(),
        })
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, CompletionError> {
        let mut request = self.client.post(&self.url).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(ref project) = self.project_id {
            request = request.header("OpenAI-Project", project);
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl CompletionService for OpenAiChat {
    async fn complete(
        &self,
        turns: &[Turn],
        params: &ModelParams,
    ) -> Result<String, CompletionError> {
        let body = json!({
            "model": params.model,
            "messages": turns,
            "max_tokens": params.max_output_tokens,
            "temperature": params.temperature,
        });

        info!(
            "chat_completions request: model={} msg_count={}",
            params.model,
            turns.len()
        );

        let mut response = self.post(&body).await?;

        // Retry once on 500 errors (transient upstream issues)
        if response.status().as_u16() == 500 {
            let text = response.text().await.unwrap_or_default();
            error!("API HTTP 500: {} | url={}", excerpt(&text, 500), self.url);
            tokio::time::sleep(Duration::from_secs(2)).await;
            response = self.post(&body).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body: excerpt(&text, 200).to_string(),
            });
        }

        let data: serde_json::Value = response.json().await?;
        reply_text(&data).ok_or(CompletionError::EmptyResponse)
    }
}

/// `choices[0].message.content`, trimmed; `None` if missing or blank.
fn reply_text(response: &serde_json::Value) -> Option<String> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn excerpt(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> Config {
        Config {
            api_key: Some("sk-test".into()),
            project_id: Some("proj_1".into()),
            base_url: Some(format!("{}/v1/", server.uri())),
            ..Config::default()
        }
    }

    fn history() -> Vec<Turn> {
        vec![Turn::system("persona"), Turn::user("sup")]
    }

    #[test]
    fn test_reply_text_trims() {
        let response = json!({"choices": [{"message": {"role": "assistant", "content": "  not much \n"}}]});
        assert_eq!(reply_text(&response).as_deref(), Some("not much"));
    }

    #[test]
    fn test_reply_text_missing_or_blank() {
        assert_eq!(reply_text(&json!({"choices": []})), None);
        assert_eq!(
            reply_text(&json!({"choices": [{"message": {"content": "   "}}]})),
            None
        );
        assert_eq!(
            reply_text(&json!({"choices": [{"message": {"content": null}}]})),
            None
        );
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("hi", 200), "hi");
    }

    #[tokio::test]
    async fn test_complete_sends_history_and_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("OpenAI-Project", "proj_1"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "max_tokens": 150,
                "messages": [
                    {"role": "system", "content": "persona"},
                    {"role": "user", "content": "sup"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": " nm, you? "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let chat = OpenAiChat::new(&config).unwrap();
        let reply = chat.complete(&history(), &config.model_params()).await.unwrap();
        assert_eq!(reply, "nm, you?");
    }

    #[tokio::test]
    async fn test_complete_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let config = config_for(&server);
        let chat = OpenAiChat::new(&config).unwrap();
        let err = chat
            .complete(&history(), &config.model_params())
            .await
            .unwrap_err();
        match err {
            CompletionError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_complete_retries_once_on_500() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream hiccup"))
            .expect(2)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let chat = OpenAiChat::new(&config).unwrap();
        let err = chat
            .complete(&history(), &config.model_params())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_complete_rejects_empty_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let config = config_for(&server);
        let chat = OpenAiChat::new(&config).unwrap();
        let err = chat
            .complete(&history(), &config.model_params())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::EmptyResponse));
    }
}
