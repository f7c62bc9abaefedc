//! Request and response shapes of the ESG backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ApiError;

/// Largest accepted headcount for a prediction.
pub const MAX_EMPLOYEES: u64 = 1_000_000;
/// Largest accepted batch.
pub const MAX_BATCH_SIZE: usize = 1000;

// ============================================================================
// Analytics
// ============================================================================

/// Row of the top-companies and search listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
  pub symbol: String,
  pub name: String,
  pub sector: String,
  pub total_esg_risk_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorAverage {
  pub sector: String,
  pub avg_esg_score: f64,
  pub company_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControversyCompany {
  pub symbol: String,
  pub name: String,
  pub controversy_score: f64,
  pub controversy_level: String,
}

/// Full record for one company. Scores are missing for thinly covered symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyDetail {
  pub symbol: String,
  pub name: String,
  pub sector: String,
  pub industry: Option<String>,
  pub total_esg_risk_score: Option<f64>,
  pub environment_risk_score: Option<f64>,
  pub social_risk_score: Option<f64>,
  pub governance_risk_score: Option<f64>,
  pub controversy_score: Option<f64>,
  pub controversy_level: Option<String>,
  pub esg_risk_level: Option<String>,
}

// ============================================================================
// Predictions
// ============================================================================

/// Input features for one risk prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
  pub environment_risk_score: f64,
  pub social_risk_score: f64,
  pub governance_risk_score: f64,
  pub controversy_score: f64,
  pub full_time_employees: u64,
}

impl PredictionRequest {
  /// Check the same bounds the backend enforces.
  pub fn validate(&self) -> Result<(), ApiError> {
    let scores = [
      ("environment_risk_score", self.environment_risk_score),
      ("social_risk_score", self.social_risk_score),
      ("governance_risk_score", self.governance_risk_score),
      ("controversy_score", self.controversy_score),
    ];
    for (name, score) in scores {
      if !(0.0..=100.0).contains(&score) {
        return Err(ApiError::validation(format!(
          "{} must be between 0 and 100, got {}",
          name, score
        )));
      }
    }
    if self.full_time_employees > MAX_EMPLOYEES {
      return Err(ApiError::validation(
        "full_time_employees unusually large",
      ));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
  pub risk_level: String,
  pub confidence: f64,
  #[serde(default)]
  pub probabilities: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPredictionRequest {
  pub items: Vec<PredictionRequest>,
}

impl BatchPredictionRequest {
  pub fn validate(&self) -> Result<(), ApiError> {
    if self.items.is_empty() {
      return Err(ApiError::validation("Batch must contain at least one item"));
    }
    if self.items.len() > MAX_BATCH_SIZE {
      return Err(ApiError::validation(format!(
        "Batch size must not exceed {}",
        MAX_BATCH_SIZE
      )));
    }
    for (i, item) in self.items.iter().enumerate() {
      item
        .validate()
        .map_err(|e| ApiError::validation(format!("item {}: {}", i, e)))?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPrediction {
  pub predictions: Vec<Prediction>,
  pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
  pub status: String,
  #[serde(rename = "type")]
  pub model_type: String,
  pub device: String,
  #[serde(default)]
  pub classes: Vec<String>,
  #[serde(default)]
  pub features: Vec<String>,
  #[serde(default)]
  pub metadata: Value,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
  pub status: String,
  pub version: String,
  pub environment: String,
  #[serde(default)]
  pub database: Value,
  #[serde(default)]
  pub cache: Value,
}

impl Health {
  pub fn is_healthy(&self) -> bool {
    self.status == "healthy"
  }
}
