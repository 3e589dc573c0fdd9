use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Answers keyed by question id (`q1`, `q2`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSet(BTreeMap<String, String>);

impl AnswerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, question_id: &str) -> Option<&str> {
        self.0.get(question_id).map(String::as_str)
    }

    /// Answers with non-blank text, in question order.
    pub fn answered(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .0
            .iter()
            .filter(|(_, a)| !a.trim().is_empty())
            .map(|(q, a)| (q.as_str(), a.trim()))
            .collect();
        entries.sort_by_key(|(q, _)| question_position(q));
        entries.into_iter()
    }

    pub fn answered_count(&self) -> usize {
        self.answered().count()
    }

    /// Merge `other` into `self`; later answers overwrite earlier ones.
    pub fn merge(&mut self, other: AnswerSet) {
        self.0.extend(other.0);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AnswerSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// `q10` sorts after `q9`; ids without a numeric suffix sort last.
fn question_position(id: &str) -> (u32, String) {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits.parse().unwrap_or(u32::MAX), id.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    HighConcern,
    ConsideringChange,
    ChangeRecommended,
    ImproveCurrent,
    WaitAndObserve,
}

impl Classification {
    pub const ALL: [Classification; 5] = [
        Classification::HighConcern,
        Classification::ConsideringChange,
        Classification::ChangeRecommended,
        Classification::ImproveCurrent,
        Classification::WaitAndObserve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::HighConcern => "high_concern",
            Classification::ConsideringChange => "considering_change",
            Classification::ChangeRecommended => "change_recommended",
            Classification::ImproveCurrent => "improve_current",
            Classification::WaitAndObserve => "wait_and_observe",
        }
    }

    /// Lenient parse of model output; accepts the snake_case ids and a few common variants.
    pub fn parse_loose(s: &str) -> Option<Self> {
        let key = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|c| c.as_str() == key).or(match key.as_str() {
            "high" | "urgent" | "要注意" => Some(Classification::HighConcern),
            "considering" | "transfer" | "転職検討" => Some(Classification::ConsideringChange),
            "change" | "転職推奨" => Some(Classification::ChangeRecommended),
            "improve" | "stay" | "現職改善" => Some(Classification::ImproveCurrent),
            "wait" | "observe" | "様子見" => Some(Classification::WaitAndObserve),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "高" => Some(Urgency::High),
            "medium" | "mid" | "中" => Some(Urgency::Medium),
            "low" | "低" => Some(Urgency::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// ≥5 answers high, ≥3 medium, else low.
    pub fn from_answer_count(count: usize) -> Self {
        match count {
            n if n >= 5 => Confidence::High,
            n if n >= 3 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }

    /// One step lower; used when the model output was only partly recoverable.
    pub fn downgrade(self) -> Self {
        match self {
            Confidence::High => Confidence::Medium,
            Confidence::Medium | Confidence::Low => Confidence::Low,
        }
    }
}

/// Which path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisSource {
    Ai,
    AiFast,
    RuleBased,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub immediate: Vec<String>,
    pub short_term: Vec<String>,
    pub long_term: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecommendation {
    pub service_id: String,
    pub name: String,
    pub url: String,
    pub category: String,
    pub tags: Vec<String>,
    pub score: u32,
    pub rank: u32,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub classification: Classification,
    pub urgency: Urgency,
    pub confidence: Confidence,
    pub summary: String,
    pub advice: String,
    pub action_plan: ActionPlan,
    pub recommendations: Vec<ServiceRecommendation>,
    pub source: DiagnosisSource,
    pub is_partial: bool,
}

/// Shape the model is asked to return. Every field is optional on the way in
/// because extraction may only recover part of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AiDiagnosis {
    /// One of the classification ids.
    pub result_type: Option<String>,
    /// "high", "medium" or "low".
    pub urgency: Option<String>,
    /// Two or three sentences addressed to the user.
    pub summary: Option<String>,
    pub advice: Option<String>,
    pub reasoning: Option<String>,
    #[serde(default)]
    pub immediate_actions: Vec<String>,
    #[serde(default)]
    pub short_term_actions: Vec<String>,
    #[serde(default)]
    pub long_term_actions: Vec<String>,
    /// Catalog tags of services that fit the user.
    #[serde(default)]
    pub service_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickEvent {
    pub service_id: String,
    pub clicked_at_ms: u64,
}

/// One stored row per session: answers, latest result, click history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub session_id: String,
    pub version: crate::questionnaire::Version,
    pub answers: AnswerSet,
    pub result: Option<DiagnosisResult>,
    #[serde(default)]
    pub clicks: Vec<ClickEvent>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answered_skips_blank_and_orders_numerically() {
        let answers: AnswerSet = [("q10", "ten"), ("q2", "two"), ("q1", "  "), ("q9", "nine")]
            .into_iter()
            .collect();
        let ids: Vec<&str> = answers.answered().map(|(q, _)| q).collect();
        assert_eq!(ids, vec!["q2", "q9", "q10"]);
        assert_eq!(answers.answered_count(), 3);
    }

    #[test]
    fn confidence_thresholds() {
        assert_eq!(Confidence::from_answer_count(0), Confidence::Low);
        assert_eq!(Confidence::from_answer_count(2), Confidence::Low);
        assert_eq!(Confidence::from_answer_count(3), Confidence::Medium);
        assert_eq!(Confidence::from_answer_count(5), Confidence::High);
        assert_eq!(Confidence::from_answer_count(10), Confidence::High);
    }

    #[test]
    fn classification_loose_parse() {
        assert_eq!(
            Classification::parse_loose("High Concern"),
            Some(Classification::HighConcern)
        );
        assert_eq!(
            Classification::parse_loose("wait-and-observe"),
            Some(Classification::WaitAndObserve)
        );
        assert_eq!(Classification::parse_loose("様子見"), Some(Classification::WaitAndObserve));
        assert_eq!(Classification::parse_loose("nonsense"), None);
    }

    #[test]
    fn answer_set_is_a_flat_json_object() {
        let answers: AnswerSet = serde_json::from_str(r#"{"q1":"a","q2":"b"}"#).unwrap();
        assert_eq!(answers.get("q2"), Some("b"));
        assert_eq!(serde_json::to_string(&answers).unwrap(), r#"{"q1":"a","q2":"b"}"#);
    }
}
