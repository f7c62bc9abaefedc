//! Cache keys for the backend's read endpoints.

use sha2::{Digest, Sha256};

use crate::cache::QueryKey;

/// Query key types for backend reads.
///
/// Hashes look like `company_search:<sha256 hex>`, so a whole family can be
/// invalidated with [`ApiQueryKey::family_prefix`].
#[derive(Clone, Debug, PartialEq)]
pub enum ApiQueryKey {
  TopCompanies { limit: u32 },
  SectorAverages,
  HighControversy { min_score: f64 },
  CompanyDetail { symbol: String },
  CompanySearch {
    query: String,
    sector: Option<String>,
    limit: u32,
  },
  ModelInfo,
}

impl ApiQueryKey {
  /// Resource family name, also the readable part of the hash.
  pub fn family(&self) -> &'static str {
    match self {
      Self::TopCompanies { .. } => "top_companies",
      Self::SectorAverages => "sector_averages",
      Self::HighControversy { .. } => "high_controversy",
      Self::CompanyDetail { .. } => "company_detail",
      Self::CompanySearch { .. } => "company_search",
      Self::ModelInfo => "model_info",
    }
  }

  /// Prefix shared by every key of `family`.
  pub fn family_prefix(family: &str) -> String {
    format!("{}:", family)
  }

  fn normalized(&self) -> String {
    match self {
      Self::TopCompanies { limit } => limit.to_string(),
      Self::SectorAverages | Self::ModelInfo => String::new(),
      Self::HighControversy { min_score } => format!("{}", min_score),
      Self::CompanyDetail { symbol } => normalize(symbol).to_uppercase(),
      Self::CompanySearch {
        query,
        sector,
        limit,
      } => format!(
        "{}:{}:{}",
        normalize(query),
        sector.as_deref().map(normalize).unwrap_or_default(),
        limit
      ),
    }
  }
}

impl QueryKey for ApiQueryKey {
  fn cache_hash(&self) -> String {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(self.normalized().as_bytes());
    let result = hasher.finalize();
    format!("{}{}", Self::family_prefix(self.family()), hex::encode(result))
  }

  fn description(&self) -> String {
    match self {
      Self::TopCompanies { limit } => format!("top {} companies", limit),
      Self::SectorAverages => "sector averages".to_string(),
      Self::HighControversy { min_score } => {
        format!("companies with controversy >= {}", min_score)
      }
      Self::CompanyDetail { symbol } => format!("company {}", symbol),
      Self::CompanySearch {
        query,
        sector,
        limit,
      } => {
        if let Some(s) = sector {
          format!("search {:?} in {} (limit {})", query, s, limit)
        } else {
          format!("search {:?} (limit {})", query, limit)
        }
      }
      Self::ModelInfo => "model info".to_string(),
    }
  }
}

/// Trim and lowercase for case-insensitive matching.
fn normalize(text: &str) -> String {
  text.trim().to_lowercase()
}
