use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Verdict labels for produce integrity, in the model's output order.
///
/// The wire strings are the labels the classifier head was trained against
/// and must not be localized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum VegetableCondition {
    #[serde(rename = "Utuh")]
    #[strum(serialize = "Utuh")]
    Intact,
    #[serde(rename = "Tidak Utuh")]
    #[strum(serialize = "Tidak Utuh")]
    NotIntact,
}

impl VegetableCondition {
    /// Output slot 0 is "Utuh", slot 1 is "Tidak Utuh".
    pub const LABELS: [VegetableCondition; 2] =
        [VegetableCondition::Intact, VegetableCondition::NotIntact];
}

/// Raw per-class scores as emitted by the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub utuh: f32,
    pub tidak_utuh: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prediction: VegetableCondition,
    pub confidence: f32,
    pub class_probabilities: ClassProbabilities,
}

/// Success envelope returned by the prediction endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub message: String,
    pub data: PredictionResult,
}
