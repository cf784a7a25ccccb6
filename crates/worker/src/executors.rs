use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gateway_core::models::{Channel, ChannelType, ProviderError, TestError, TestOutcome};
use gateway_core::traits::ChannelTester;
use serde_json::{json, Value};
use tracing::{debug, warn};

const GITHUB_MODELS_BASE_URL: &str = "https://models.inference.ai.azure.com";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// 按渠道类型构造测试请求、解析上游错误
pub trait ProviderAdapter: Send + Sync {
    fn build_request(
        &self,
        client: &reqwest::Client,
        channel: &Channel,
        model: &str,
    ) -> reqwest::RequestBuilder;

    /// 从错误响应体中提取结构化错误
    fn parse_error(&self, status_code: u16, body: &str) -> ProviderError {
        parse_error_body(status_code, body)
    }
}

/// OpenAI 兼容的 chat/completions 接口
pub struct OpenAiCompatibleAdapter {
    default_base_url: Option<&'static str>,
    path: &'static str,
}

impl OpenAiCompatibleAdapter {
    pub fn openai() -> Self {
        Self {
            default_base_url: None,
            path: "/v1/chat/completions",
        }
    }

    /// GitHub Models 使用 OpenAI 协议，但路径不带 /v1
    pub fn github() -> Self {
        Self {
            default_base_url: Some(GITHUB_MODELS_BASE_URL),
            path: "/chat/completions",
        }
    }
}

impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn build_request(
        &self,
        client: &reqwest::Client,
        channel: &Channel,
        model: &str,
    ) -> reqwest::RequestBuilder {
        let base = base_url(channel, self.default_base_url);
        let mut request = client.post(format!("{base}{}", self.path)).json(&json!({
            "model": model,
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        }));
        if let Some(key) = channel.key.as_deref() {
            request = request.bearer_auth(key);
        }
        request
    }
}

/// Gemini generateContent 接口
pub struct GeminiAdapter;

impl GeminiAdapter {
    /// 目录中的模型名可能带 `models/` 前缀
    pub fn normalize_model(model: &str) -> &str {
        model.strip_prefix("models/").unwrap_or(model)
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn build_request(
        &self,
        client: &reqwest::Client,
        channel: &Channel,
        model: &str,
    ) -> reqwest::RequestBuilder {
        let base = base_url(channel, Some(GEMINI_BASE_URL));
        let url = format!(
            "{base}/v1beta/models/{}:generateContent",
            Self::normalize_model(model)
        );
        let mut request = client.post(url).json(&json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "generationConfig": {"maxOutputTokens": 1},
        }));
        if let Some(key) = channel.key.as_deref() {
            request = request.header("x-goog-api-key", key);
        }
        request
    }
}

fn base_url<'a>(channel: &'a Channel, default: Option<&'a str>) -> &'a str {
    let configured = channel.base_url.trim_end_matches('/');
    if configured.is_empty() {
        default.unwrap_or_default()
    } else {
        configured
    }
}

/// 解析 `{"error": {...}}` 形式的错误响应
///
/// OpenAI 风格为 `{type, code, message}`，Gemini 风格为 `{code: 数字, status, message}`。
pub fn parse_error_body(status_code: u16, body: &str) -> ProviderError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let message = error
        .and_then(|e| e.get("message").and_then(Value::as_str))
        .map(str::to_string)
        .or_else(|| error.and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| truncate(body, 512));
    let error_type = error
        .and_then(|e| e.get("type").or_else(|| e.get("status")))
        .and_then(Value::as_str)
        .unwrap_or("upstream_error")
        .to_string();
    let code = error.and_then(|e| e.get("code")).and_then(|c| match c {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    ProviderError {
        status_code,
        error_type,
        code,
        message,
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

/// 基于 reqwest 的测试执行器
pub struct HttpChannelTester {
    client: reqwest::Client,
    request_timeout: Duration,
    openai: Arc<dyn ProviderAdapter>,
    gemini: Arc<dyn ProviderAdapter>,
    github: Arc<dyn ProviderAdapter>,
}

impl HttpChannelTester {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            request_timeout,
            openai: Arc::new(OpenAiCompatibleAdapter::openai()),
            gemini: Arc::new(GeminiAdapter),
            github: Arc::new(OpenAiCompatibleAdapter::github()),
        }
    }

    fn adapter_for(&self, channel_type: ChannelType) -> &dyn ProviderAdapter {
        match channel_type {
            ChannelType::Gemini => self.gemini.as_ref(),
            ChannelType::GitHub => self.github.as_ref(),
            ChannelType::OpenAi | ChannelType::Custom => self.openai.as_ref(),
        }
    }
}

#[async_trait]
impl ChannelTester for HttpChannelTester {
    async fn test(&self, channel: &Channel, model: &str) -> TestOutcome {
        let adapter = self.adapter_for(channel.channel_type);
        let start_time = Instant::now();

        debug!(
            channel_id = channel.id,
            channel_type = channel.channel_type.as_str(),
            model = model,
            "发送测试请求"
        );

        let response = match adapter
            .build_request(&self.client, channel, model)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let elapsed = start_time.elapsed();
                warn!(channel_id = channel.id, model = model, "测试请求失败: {}", e);
                let error = if e.is_timeout() {
                    TestError::timeout(e.to_string())
                } else {
                    TestError::transport(e.to_string())
                };
                return TestOutcome::failure(elapsed, error);
            }
        };

        let status_code = response.status().as_u16();
        let success = response.status().is_success();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return TestOutcome::failure(
                    start_time.elapsed(),
                    TestError::transport(format!("读取响应体失败: {e}")),
                )
            }
        };
        let elapsed = start_time.elapsed();

        if !success {
            return TestOutcome::provider_failure(elapsed, adapter.parse_error(status_code, &body));
        }

        // 部分上游在 200 响应里返回错误对象
        let embedded_error = serde_json::from_str::<Value>(&body)
            .ok()
            .is_some_and(|v| v.get("error").is_some_and(|e| !e.is_null()));
        if embedded_error {
            return TestOutcome::provider_failure(elapsed, adapter.parse_error(status_code, &body));
        }

        TestOutcome::success(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::models::ErrorKind;

    #[test]
    fn test_parse_openai_error() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        let error = parse_error_body(401, body);
        assert_eq!(error.status_code, 401);
        assert_eq!(error.error_type, "invalid_request_error");
        assert_eq!(error.code.as_deref(), Some("invalid_api_key"));
        assert_eq!(error.message, "Incorrect API key provided");
    }

    #[test]
    fn test_parse_gemini_error() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        let error = parse_error_body(400, body);
        assert_eq!(error.error_type, "INVALID_ARGUMENT");
        assert_eq!(error.code.as_deref(), Some("400"));
        assert_eq!(error.message, "API key not valid.");
    }

    #[test]
    fn test_parse_non_json_error() {
        let error = parse_error_body(502, "Bad Gateway");
        assert_eq!(error.error_type, "upstream_error");
        assert_eq!(error.message, "Bad Gateway");
        assert!(error.code.is_none());
    }

    #[test]
    fn test_gemini_model_normalization() {
        assert_eq!(GeminiAdapter::normalize_model("models/gemini-pro"), "gemini-pro");
        assert_eq!(GeminiAdapter::normalize_model("gemini-pro"), "gemini-pro");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = gateway_testing_utils::ChannelBuilder::new(1)
            .with_base_url(&format!("http://{addr}"))
            .build();
        let tester = HttpChannelTester::new(Duration::from_secs(2));
        let outcome = tester.test(&channel, "gpt-4o-mini").await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Transport));
        assert!(outcome.provider_error.is_none());
    }
}
