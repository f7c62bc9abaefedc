//! Bindings for the ESG analytics and prediction backend.

mod cached_client;
mod client;
mod keys;
mod types;

pub use cached_client::CachedEsgClient;
pub use client::{EsgClient, DEFAULT_MIN_CONTROVERSY, DEFAULT_SEARCH_LIMIT, DEFAULT_TOP_LIMIT};
pub use keys::ApiQueryKey;
pub use types::{
  BatchPrediction, BatchPredictionRequest, Company, CompanyDetail, ControversyCompany, Health,
  ModelInfo, Prediction, PredictionRequest, SectorAverage, MAX_BATCH_SIZE, MAX_EMPLOYEES,
};
