//! Semantic classifier collaborator.
//!
//! Trait seam plus a Gemini `generateContent` client. The classifier is a
//! best-effort collaborator: any transport failure or malformed verdict is
//! reported as an error and the caller fails open (see `RiskClassifier`).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Structured verdict returned by a semantic classifier.
#[derive(Debug, Clone, Deserialize)]
pub struct SemanticVerdict {
    pub risk_level: String,
    pub risk_score: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// A collaborator that classifies free text into a risk verdict.
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    async fn assess(&self, description: &str, category: &str) -> anyhow::Result<SemanticVerdict>;
}

/// Gemini-backed semantic classifier.
pub struct GeminiClassifier {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClassifier {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }

    fn prompt(description: &str, category: &str) -> String {
        format!(
            "You are a content safety reviewer for a peer-to-peer campus help platform.\n\
             Assess whether the following task violates platform policy.\n\n\
             Task category: {category}\n\
             Task description:\n{description}\n\n\
             Prohibited: academic dishonesty (exam or assignment ghostwriting), \
             purchase of tobacco/alcohol or other restricted goods, money lending, \
             adult content, gambling, illegal or dangerous activity, late-night \
             meetings in private residences.\n\n\
             Respond with JSON only, no other text:\n\
             {{\"risk_level\": \"safe/medium/high/critical\", \
             \"risk_score\": 0.0, \"reason\": \"short explanation\", \
             \"flags\": [\"risk markers\"]}}"
        )
    }
}

#[async_trait]
impl SemanticClassifier for GeminiClassifier {
    async fn assess(&self, description: &str, category: &str) -> anyhow::Result<SemanticVerdict> {
        let url = format!(
            "{GEMINI_API_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": Self::prompt(description, category) }] }],
            "generationConfig": { "temperature": 0.2 }
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("semantic classifier returned {}: {}", status, text);
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)?;
        let raw = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| anyhow::anyhow!("no candidates in classifier response"))?;

        let verdict: SemanticVerdict = serde_json::from_str(strip_code_fences(&raw))?;
        Ok(verdict)
    }
}

/// Models often wrap their JSON in a markdown code fence despite
/// instructions; strip it before parsing.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_verdict_parses_with_missing_optional_fields() {
        let v: SemanticVerdict =
            serde_json::from_str("{\"risk_level\":\"safe\",\"risk_score\":0.1}").unwrap();
        assert_eq!(v.risk_level, "safe");
        assert!(v.flags.is_empty());
    }
}
