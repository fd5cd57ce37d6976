//! Upstream client for the generative-language API that rewrites student
//! text into formal school-record sentences. The prompt templates and
//! generation parameters mirror what teachers reviewed and approved; they are
//! data, not code, and stay in Korean because the output must be a Korean
//! record sentence.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1/models";

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("AI API key is not configured")]
    MissingKey,
    #[error("nothing to rewrite")]
    EmptyInput,
    #[error("http: {0}")]
    Http(String),
    #[error("upstream status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("empty response from AI")]
    EmptyCandidate,
}

#[derive(Debug, Clone)]
pub struct Rewrite {
    pub text: String,
    pub usage: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct AiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<ReqContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct ReqContent<'a> {
    parts: Vec<ReqPart<'a>>,
}

#[derive(Serialize)]
struct ReqPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: i32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<RespContent>,
}

#[derive(Deserialize)]
struct RespContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Deserialize)]
struct RespPart {
    #[serde(default)]
    text: String,
}

impl AiClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self, AiError> {
        if api_key.trim().is_empty() {
            return Err(AiError::MissingKey);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AiError::Http(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url,
        })
    }

    /// One help note → one record sentence.
    pub async fn rewrite_help_description(&self, description: &str) -> Result<Rewrite, AiError> {
        let trimmed = description.trim();
        if trimmed.is_empty() {
            return Err(AiError::EmptyInput);
        }
        self.generate(&help_prompt(trimmed)).await
    }

    /// Core learning + attitude checklist → 2-3 record sentences.
    pub async fn rewrite_learning_record(
        &self,
        core_learning: &str,
        learning_process: &[String],
    ) -> Result<Rewrite, AiError> {
        let trimmed = core_learning.trim();
        if trimmed.is_empty() {
            return Err(AiError::EmptyInput);
        }
        self.generate(&learning_prompt(trimmed, learning_process))
            .await
    }

    async fn generate(&self, prompt: &str) -> Result<Rewrite, AiError> {
        let body = GenerateRequest {
            contents: vec![ReqContent {
                parts: vec![ReqPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_k: 40,
                top_p: 0.95,
                max_output_tokens: 10000,
            },
        };
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );
        let res = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Http(e.to_string()))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| AiError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(AiError::Upstream {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        let parsed: GenerateResponse =
            serde_json::from_slice(&bytes).map_err(|e| AiError::Http(e.to_string()))?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(AiError::EmptyCandidate)?;
        Ok(Rewrite {
            text,
            usage: parsed.usage_metadata,
        })
    }
}

fn help_prompt(description: &str) -> String {
    format!(
        "다음은 초등학생이 친구를 도와준 내용입니다. 이것을 초등학교 생활기록부에 기록할 한 문장으로 변환하세요.

규칙:
- 반드시 한 문장으로만 작성
- 50자 이내로 간결하게
- \"~함\", \"~하였음\" 등 서술형 종결어미 사용
- 설명이나 부연 없이 변환된 문장만 출력
- 학생의 긍정적인 행동 강조

원본: {description}

변환:"
    )
}

fn learning_prompt(core_learning: &str, learning_process: &[String]) -> String {
    let process_text = if learning_process.is_empty() {
        "없음".to_string()
    } else {
        learning_process.join(", ")
    };
    format!(
        "다음은 초등학생의 배움기록입니다. 이를 생활기록부 형식으로 변환하세요.

핵심배움: {core_learning}
학습태도: {process_text}

규칙:
1. 주어 없이 서술 (예: \"친구를 도와주며~\", \"적극적으로~\")
2. 2-3문장으로 간결하게
3. \"~하였음\", \"~보였음\" 등 과거형 종결
4. 학습 내용과 태도를 자연스럽게 연결
5. 변환된 문장만 출력 (설명 금지)

예시:
\"분수의 덧셈에서 분모를 통분하는 방법을 이해하였으며, 친구를 도와주고 적극적으로 질문하는 등 협력적 학습 태도를 보였음.\"

변환:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_embed_the_inputs() {
        let p = help_prompt("25+8 계산을 알려줬어요");
        assert!(p.contains("원본: 25+8 계산을 알려줬어요"));
        assert!(p.contains("한 문장"));

        let lp = learning_prompt("분수의 통분", &["질문하기".into(), "돕기".into()]);
        assert!(lp.contains("핵심배움: 분수의 통분"));
        assert!(lp.contains("학습태도: 질문하기, 돕기"));
        let empty = learning_prompt("통분", &[]);
        assert!(empty.contains("학습태도: 없음"));
    }

    #[test]
    fn missing_key_is_rejected_up_front() {
        let err = AiClient::new(
            "  ".into(),
            DEFAULT_MODEL.into(),
            DEFAULT_BASE_URL.into(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AiError::MissingKey));
    }

    #[test]
    fn response_extraction_takes_the_first_candidate() {
        let raw = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "  받아올림의 원리를 설명함  "}]}},
                {"content": {"parts": [{"text": "두 번째 후보"}]}}
            ],
            "usageMetadata": {"promptTokenCount": 42}
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text.trim().to_string())
            .unwrap();
        assert_eq!(text, "받아올림의 원리를 설명함");
    }
}
