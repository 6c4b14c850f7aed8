//! Answer generation through an OpenAI-compatible chat completions API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use ragscope_core::{AnswerGenerator, GenerationConfig, RagError, Result};

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions accurately \
using ONLY the provided context. If the context doesn't contain the answer, \
say \"I don't have enough information to answer this.\" \
Do not make up information.";

/// User message for one question.
fn user_prompt(query: &str, context: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {}\n\nAnswer:", context, query)
}

/// An [`AnswerGenerator`] that calls a chat completions endpoint (Groq by
/// default).
///
/// The model is instructed to answer only from the supplied context.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    api_key: String,
    config: GenerationConfig,
}

impl ChatCompletionsGenerator {
    /// Create a generator with an explicit API key.
    pub fn new(config: GenerationConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::generation("API key must not be empty"));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            config,
        })
    }

    /// Create a generator reading the API key from the environment variable
    /// named in `config`. A `.env` file in the working directory is loaded
    /// first if present.
    pub fn from_env(config: GenerationConfig) -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagError::generation(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        Self::new(config, api_key)
    }

    fn request<'a>(&'a self, query: &str, context: &str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(query, context),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl AnswerGenerator for ChatCompletionsGenerator {
    async fn generate(&self, query: &str, context: &str) -> Result<String> {
        debug!(
            model = %self.config.model,
            context_len = context.len(),
            "generating answer"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request(query, context))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "chat completion request failed");
                RagError::generation(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            error!(%status, "chat completion API error");
            return Err(RagError::generation(format!(
                "API returned {status}: {detail}"
            )));
        }

        let completion: ChatResponse = response.json().await.map_err(|e| {
            error!(error = %e, "failed to parse chat completion");
            RagError::generation(format!("failed to parse response: {e}"))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|answer| answer.trim().to_string())
            .ok_or_else(|| RagError::generation("API returned no answer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(status: &str, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];

            // Read headers, then the body by Content-Length
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, handle)
    }

    fn config(endpoint: String) -> GenerationConfig {
        GenerationConfig {
            endpoint,
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn test_user_prompt() {
        assert_eq!(
            user_prompt("Who sat?", "The cat sat."),
            "Context:\nThe cat sat.\n\nQuestion: Who sat?\n\nAnswer:"
        );
    }

    #[test]
    fn test_request_body() {
        let generator =
            ChatCompletionsGenerator::new(GenerationConfig::default(), "key").unwrap();
        let body = serde_json::to_value(generator.request("q", "ctx")).unwrap();

        assert_eq!(body["model"], "openai/gpt-oss-120b");
        assert_eq!(body["max_tokens"], 600);
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("I don't have enough information to answer this."));
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let err = ChatCompletionsGenerator::new(GenerationConfig::default(), "")
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "GENERATION_ERROR");
    }

    #[test]
    fn test_missing_env_var() {
        let config = GenerationConfig {
            api_key_env: "RAGSCOPE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..GenerationConfig::default()
        };
        let err = ChatCompletionsGenerator::from_env(config).err().unwrap();
        assert!(err.to_string().contains("RAGSCOPE_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[tokio::test]
    async fn test_generate_trims_answer() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"  On the mat.\n"}}]}"#,
        )
        .await;

        let generator = ChatCompletionsGenerator::new(config(url), "secret").unwrap();
        let answer = generator
            .generate("Where did the cat sit?", "The cat sat on the mat.")
            .await
            .unwrap();
        assert_eq!(answer, "On the mat.");

        let request = server.await.unwrap();
        assert!(request.contains("Bearer secret"));
        assert!(request.contains("Where did the cat sit?"));
    }

    #[tokio::test]
    async fn test_generate_api_error() {
        let (url, server) = serve_once(
            "401 Unauthorized",
            r#"{"error":{"message":"Invalid API Key"}}"#,
        )
        .await;

        let generator = ChatCompletionsGenerator::new(config(url), "wrong").unwrap();
        let err = generator.generate("q", "ctx").await.unwrap_err();
        assert_eq!(err.error_code(), "GENERATION_ERROR");
        assert!(err.to_string().contains("Invalid API Key"));

        server.await.unwrap();
    }
}
