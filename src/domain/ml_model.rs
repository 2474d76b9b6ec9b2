use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What kind of value a model predicts alongside the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    Margin,
    WinProbability,
}

impl PredictionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Margin => "margin",
            Self::WinProbability => "win_probability",
        }
    }
}

impl std::fmt::Display for PredictionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PredictionType {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "margin" => Ok(Self::Margin),
            "win_probability" | "win-probability" => Ok(Self::WinProbability),
            _ => Err("invalid prediction type; expected margin|win_probability"),
        }
    }
}

/// Registered ML model metadata. The model itself lives behind the external
/// prediction service; this record only drives selection and aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlModel {
    /// Unique model name, matching the prediction service's vocabulary.
    pub name: String,
    pub prediction_type: PredictionType,
    /// At most one principal model per prediction type; the principal's
    /// predicted winners are the ones submitted to competitions.
    pub is_principal: bool,
    /// Whether this model's predictions are eligible for tip submission.
    pub used_in_competitions: bool,
}
