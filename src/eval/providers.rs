use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{Config, ANTHROPIC_API_URL, OPENAI_API_URL, PROVIDER_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::QualityScores;

const SYSTEM_PROMPT: &str = "You are an expert at evaluating prediction markets. \
    Always respond with valid JSON only, no additional text.";

/// One external scoring backend. The engine walks a list of these in priority
/// order and stops at the first that returns text with parseable scores.
#[async_trait]
pub trait ScoreProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the model's raw text reply to the prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Providers in priority order, one per configured credential.
pub fn build_provider_chain(cfg: &Config) -> Result<Vec<Box<dyn ScoreProvider>>> {
    let mut providers: Vec<Box<dyn ScoreProvider>> = Vec::new();
    if let Some(key) = &cfg.openai_api_key {
        providers.push(Box::new(OpenAiProvider::new(key.clone())?));
    }
    if let Some(key) = &cfg.anthropic_api_key {
        providers.push(Box::new(AnthropicProvider::new(key.clone())?));
    }
    Ok(providers)
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl ScoreProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let resp = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": "gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": prompt }
                ],
                "temperature": 0.1,
                "max_tokens": 500,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AppError::Provider(format!(
                "OpenAI API error: HTTP {}",
                resp.status()
            )));
        }

        let body: Value = resp.json().await?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::Provider("no content in OpenAI response".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl ScoreProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let resp = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": "claude-3-haiku-20240307",
                "max_tokens": 500,
                "messages": [
                    { "role": "user", "content": prompt }
                ],
                "temperature": 0.1,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AppError::Provider(format!(
                "Anthropic API error: HTTP {}",
                resp.status()
            )));
        }

        let body: Value = resp.json().await?;
        body.get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::Provider("no content in Anthropic response".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Extract scores from a model reply. Models sometimes wrap the JSON in
/// prose, so the parse window runs from the first brace to the last one.
/// Returns None when no well-formed score object can be recovered.
pub fn parse_scores(text: &str) -> Option<QualityScores> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: Value = serde_json::from_str(&text[start..=end]).ok()?;

    let explanation = parsed
        .get("explanation")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("No explanation provided")
        .to_string();

    Some(QualityScores {
        resolvability: coerce_score(parsed.get("resolvability")),
        clarity: coerce_score(parsed.get("clarity")),
        manipulability_risk: coerce_score(parsed.get("manipulabilityRisk")),
        explanation,
    })
}

/// Numbers and numeric strings round to the nearest integer and clamp to
/// 0..=10. Anything else is the neutral 5, never an error.
pub fn coerce_score(value: Option<&Value>) -> u8 {
    let num = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    };
    match num {
        Some(n) if n.is_finite() => n.round().clamp(0.0, 10.0) as u8,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_parse_from_clean_json() {
        let scores = parse_scores(
            r#"{"resolvability": 8, "clarity": 7, "manipulabilityRisk": 6, "explanation": "Solid market."}"#,
        )
        .unwrap();
        assert_eq!(scores.resolvability, 8);
        assert_eq!(scores.clarity, 7);
        assert_eq!(scores.manipulability_risk, 6);
        assert_eq!(scores.explanation, "Solid market.");
    }

    #[test]
    fn scores_parse_from_prose_wrapped_json() {
        let text = "Here is my assessment:\n\
            {\"resolvability\": 9, \"clarity\": 8, \"manipulabilityRisk\": 7, \
             \"explanation\": \"Clear and public.\"}\n\
            Let me know if you need more detail.";
        let scores = parse_scores(text).unwrap();
        assert_eq!(scores.resolvability, 9);
        assert_eq!(scores.explanation, "Clear and public.");
    }

    #[test]
    fn out_of_range_scores_clamp() {
        let scores = parse_scores(
            r#"{"resolvability": 15, "clarity": -3, "manipulabilityRisk": 6, "explanation": "x"}"#,
        )
        .unwrap();
        assert_eq!(scores.resolvability, 10);
        assert_eq!(scores.clarity, 0);
    }

    #[test]
    fn missing_or_non_numeric_scores_default_to_neutral() {
        let scores = parse_scores(
            r#"{"clarity": null, "manipulabilityRisk": {"oops": true}, "explanation": "x"}"#,
        )
        .unwrap();
        assert_eq!(scores.resolvability, 5);
        assert_eq!(scores.clarity, 5);
        assert_eq!(scores.manipulability_risk, 5);
    }

    #[test]
    fn numeric_strings_round_to_nearest() {
        assert_eq!(coerce_score(Some(&Value::String("7.4".to_string()))), 7);
        assert_eq!(coerce_score(Some(&Value::String("7.5".to_string()))), 8);
        assert_eq!(coerce_score(Some(&Value::String("abc".to_string()))), 5);
        assert_eq!(coerce_score(None), 5);
    }

    #[test]
    fn empty_explanation_gets_the_default() {
        let scores = parse_scores(
            r#"{"resolvability": 5, "clarity": 5, "manipulabilityRisk": 5, "explanation": ""}"#,
        )
        .unwrap();
        assert_eq!(scores.explanation, "No explanation provided");
    }

    #[test]
    fn braceless_text_yields_nothing() {
        assert!(parse_scores("I cannot evaluate this market.").is_none());
        assert!(parse_scores("").is_none());
    }

    #[test]
    fn malformed_json_in_braces_yields_nothing() {
        assert!(parse_scores("{resolvability: 8}").is_none());
        // Two objects in one reply make the brace window unparseable.
        assert!(parse_scores(r#"{"resolvability": 8} and {"clarity": 9}"#).is_none());
    }
}
