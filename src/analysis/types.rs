// Payloads returned by the analysis service. Field names follow the service's
// JSON; anything it adds later is kept in `extra` so it survives a reload.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    #[serde(default, deserialize_with = "lenient_string")]
    pub confidence_level: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub emotional_stability: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sentiment_score: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub stress_level: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VideoAnalysisResult {
    #[serde(default, deserialize_with = "lenient_string")]
    pub posture: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub facial_expressions: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub gestures: Option<String>,
    #[serde(default)]
    pub sentiment_analysis: Option<SentimentAnalysis>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub detailed_feedback: Option<String>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub score: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AudioAnalysisResult {
    #[serde(default, deserialize_with = "lenient_string")]
    pub clarity: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub logicality: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub expertise: Option<String>,
    #[serde(default)]
    pub frequently_used_words: Vec<String>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub score: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The service sends scores as numbers or numeric strings.
fn lenient_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}
