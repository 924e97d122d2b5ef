//! Risk classifier - gates every task entering circulation.
//!
//! Two passes. First a deterministic keyword scan over three ordered tiers;
//! the first tier with a hit wins and short-circuits, so a critical hit can
//! never be downgraded by a later tier or by the semantic pass. Only when no
//! keyword matches is the semantic collaborator consulted, and any
//! unavailable or malformed response fails open to safe/auto-pass with a
//! degradation flag. Task submission never hard-fails because the semantic
//! classifier is down.

mod semantic;

pub use semantic::{GeminiClassifier, SemanticClassifier, SemanticVerdict};

use std::sync::Arc;

use serde::Serialize;

/// Keywords that mean immediate rejection: academic dishonesty, restricted
/// goods, lending, adult content, drugs, gambling. Kept in the platform's
/// operating language, matched by lowercase containment.
const CRITICAL_KEYWORDS: &[&str] = &[
    "代考", "代寫", "代寫報告", "代寫作業", "幫寫報告",
    "代購菸", "代購酒", "代買菸", "代買酒", "買菸", "買酒",
    "借錢", "貸款", "放貸", "高利貸", "借款", "急需用錢",
    "色情", "援交", "約炮", "一夜情", "陪睡",
    "毒品", "大麻", "搖頭丸", "k他命",
    "賭博", "線上賭場", "簽賭", "六合彩",
];

/// Keywords that route the task to manual review.
const HIGH_KEYWORDS: &[&str] = &[
    "幫寫", "幫做作業", "期末報告", "期中考", "考試答案",
    "成人", "18禁", "裸露", "性感",
    "現金交易", "大量現金", "匯款", "轉帳",
    "非法", "違法", "犯罪", "詐騙",
];

/// Keywords that warn but allow.
const MEDIUM_KEYWORDS: &[&str] = &[
    "代買", "代購", "代領", "幫買東西",
    "深夜", "半夜", "凌晨",
    "陪伴", "陪聊", "陪吃飯",
    "私人住處", "家裡", "宿舍房間",
];

/// Risk tier of a piece of task content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Safe,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// Parse a collaborator-supplied tier label. "low" collapses into safe.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "safe" | "low" => Some(Self::Safe),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn recommendation(&self) -> Recommendation {
        match self {
            Self::Safe => Recommendation::AutoPass,
            Self::Medium => Recommendation::WarnAllow,
            Self::High => Recommendation::ManualReview,
            Self::Critical => Recommendation::AutoReject,
        }
    }

    /// Only medium and high outcomes are appealable.
    pub fn can_appeal(&self) -> bool {
        matches!(self, Self::Medium | Self::High)
    }

    fn keyword_score(&self) -> f64 {
        match self {
            Self::Safe => 0.1,
            Self::Medium => 0.5,
            Self::High => 0.8,
            Self::Critical => 1.0,
        }
    }
}

/// Control-flow outcome of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    AutoPass,
    WarnAllow,
    ManualReview,
    AutoReject,
}

impl Recommendation {
    /// Whether a task with this outcome may enter circulation.
    pub fn allows_submission(&self) -> bool {
        matches!(self, Self::AutoPass | Self::WarnAllow)
    }
}

/// Full classification result surfaced to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub tier: RiskTier,
    pub score: f64,
    pub recommendation: Recommendation,
    pub reason: String,
    pub flags: Vec<String>,
    pub can_appeal: bool,
    /// True when the semantic collaborator was unavailable or returned a
    /// malformed verdict and the keyword pass alone decided the outcome.
    pub degraded: bool,
}

impl RiskAssessment {
    fn from_tier(tier: RiskTier, reason: String, flags: Vec<String>) -> Self {
        Self {
            tier,
            score: tier.keyword_score(),
            recommendation: tier.recommendation(),
            reason,
            flags,
            can_appeal: tier.can_appeal(),
            degraded: false,
        }
    }

    fn degraded_safe() -> Self {
        Self {
            tier: RiskTier::Safe,
            score: 0.1,
            recommendation: Recommendation::AutoPass,
            reason: "semantic review unavailable; keyword screening found no match".into(),
            flags: vec!["semantic_review_degraded".into()],
            can_appeal: false,
            degraded: true,
        }
    }
}

/// Tiered keyword screening with an optional semantic fallback.
pub struct RiskClassifier {
    semantic: Option<Arc<dyn SemanticClassifier>>,
}

impl RiskClassifier {
    pub fn new(semantic: Option<Arc<dyn SemanticClassifier>>) -> Self {
        Self { semantic }
    }

    /// Keyword-only classifier, used when no collaborator is configured.
    pub fn keyword_only() -> Self {
        Self { semantic: None }
    }

    /// Classify task content. Never fails: a degraded semantic pass yields
    /// a flagged safe outcome instead of an error.
    pub async fn classify(&self, description: &str, category: &str) -> RiskAssessment {
        if let Some(hit) = keyword_scan(description) {
            return hit;
        }

        let Some(semantic) = &self.semantic else {
            return RiskAssessment::degraded_safe();
        };
        match semantic.assess(description, category).await {
            Ok(verdict) => match RiskTier::parse(&verdict.risk_level) {
                Some(tier) => RiskAssessment {
                    tier,
                    score: verdict.risk_score.clamp(0.0, 1.0),
                    recommendation: tier.recommendation(),
                    reason: if verdict.reason.is_empty() {
                        "semantic review".into()
                    } else {
                        verdict.reason
                    },
                    flags: verdict.flags,
                    can_appeal: tier.can_appeal(),
                    degraded: false,
                },
                None => {
                    tracing::warn!(
                        tier = %verdict.risk_level,
                        "semantic classifier returned unknown tier, failing open"
                    );
                    RiskAssessment::degraded_safe()
                }
            },
            Err(e) => {
                tracing::warn!("semantic classification unavailable, failing open: {e}");
                RiskAssessment::degraded_safe()
            }
        }
    }
}

/// Scan the three keyword tiers in priority order. The first tier with any
/// hit decides the outcome.
fn keyword_scan(description: &str) -> Option<RiskAssessment> {
    let text = description.to_lowercase();
    let tiers: [(RiskTier, &[&str]); 3] = [
        (RiskTier::Critical, CRITICAL_KEYWORDS),
        (RiskTier::High, HIGH_KEYWORDS),
        (RiskTier::Medium, MEDIUM_KEYWORDS),
    ];
    for (tier, keywords) in tiers {
        let flags: Vec<String> = keywords
            .iter()
            .filter(|k| text.contains(**k))
            .map(|k| k.to_string())
            .collect();
        if !flags.is_empty() {
            let shown: Vec<&str> = flags.iter().take(3).map(String::as_str).collect();
            let reason = format!("flagged keywords: {}", shown.join(", "));
            return Some(RiskAssessment::from_tier(tier, reason, flags));
        }
    }
    None
}
