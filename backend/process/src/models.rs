use bank::models::{Category, PredictionModel};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const PREDICT_PATH: &str = "/predict";

/// What the model server gets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRequest {
    pub donor_id: String,
    pub category: Category,
    pub date: NaiveDate,
    /// Past offer quantities in this category, oldest first.
    pub history: Vec<u32>,
}

/// What the model server answers.
#[derive(Debug, Deserialize)]
pub struct RemoteForecast {
    #[serde(alias = "quantity", alias = "prediction")]
    pub predicted_quantity: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Forecast {
    pub quantity: u32,
    pub confidence: f64,
    pub model: PredictionModel,
}
