use color_eyre::Result;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::config::Config;
use crate::error::ApiError;
use crate::request::{HttpTransport, RequestDescriptor, RequestKey, RequestManager};

use super::types::{
  BatchPrediction, BatchPredictionRequest, Company, CompanyDetail, ControversyCompany, Health,
  ModelInfo, Prediction, PredictionRequest, SectorAverage,
};

pub const DEFAULT_TOP_LIMIT: u32 = 10;
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;
pub const DEFAULT_MIN_CONTROVERSY: f64 = 50.0;

const LIMIT_RANGE: RangeInclusive<u32> = 1..=100;
const MAX_QUERY_LEN: usize = 100;

/// ESG backend client.
///
/// Every call goes through the [`RequestManager`], so a newer call to the same
/// endpoint supersedes an older one and transient failures are retried. Inputs
/// are checked before anything is dispatched. Each method registers its request
/// when called; the returned future only drives it.
#[derive(Clone)]
pub struct EsgClient {
  manager: RequestManager,
  prefix: String,
  retry: u32,
  retry_delay: Duration,
  timeout: Duration,
}

impl EsgClient {
  pub fn new(config: &Config) -> Result<Self> {
    let transport = HttpTransport::with_timeout(config.api_url()?, config.timeout())?;
    Ok(Self::with_manager(RequestManager::new(transport), config))
  }

  /// Use an existing manager, e.g. one over a custom transport.
  pub fn with_manager(manager: RequestManager, config: &Config) -> Self {
    Self {
      manager,
      prefix: config.api_prefix().to_string(),
      retry: config.api.retry,
      retry_delay: config.retry_delay(),
      timeout: config.timeout(),
    }
  }

  pub fn manager(&self) -> &RequestManager {
    &self.manager
  }

  /// Companies ranked by total ESG risk.
  pub fn top_companies(
    &self,
    limit: u32,
  ) -> impl Future<Output = Result<Vec<Company>, ApiError>> + Send + 'static {
    let descriptor = check_range("limit", limit, LIMIT_RANGE)
      .map(|()| self.get("/analytics/companies/top").query("limit", limit));
    self.send(descriptor)
  }

  pub fn sector_averages(
    &self,
  ) -> impl Future<Output = Result<Vec<SectorAverage>, ApiError>> + Send + 'static {
    self.send(Ok(self.get("/analytics/sectors/average")))
  }

  /// Companies whose controversy score is at least `min_score`.
  pub fn high_controversy(
    &self,
    min_score: f64,
  ) -> impl Future<Output = Result<Vec<ControversyCompany>, ApiError>> + Send + 'static {
    let descriptor = check_score("min_score", min_score).map(|()| {
      self
        .get("/analytics/companies/high-controversy")
        .query("min_score", min_score)
    });
    self.send(descriptor)
  }

  pub fn company(
    &self,
    symbol: &str,
  ) -> impl Future<Output = Result<CompanyDetail, ApiError>> + Send + 'static {
    let descriptor = check_symbol(symbol)
      .map(|symbol| self.get(&format!("/analytics/companies/{}", symbol)));
    self.send(descriptor)
  }

  /// Search by name or symbol, optionally within one sector.
  pub fn search_companies(
    &self,
    query: &str,
    sector: Option<&str>,
    limit: u32,
  ) -> impl Future<Output = Result<Vec<Company>, ApiError>> + Send + 'static {
    let descriptor = check_search(query, sector, limit).map(|()| {
      let mut descriptor = self
        .get("/analytics/companies/search")
        .query("q", query.trim());
      if let Some(sector) = sector {
        descriptor = descriptor.query("sector", sector);
      }
      descriptor.query("limit", limit)
    });
    self.send(descriptor)
  }

  pub fn predict(
    &self,
    request: &PredictionRequest,
  ) -> impl Future<Output = Result<Prediction, ApiError>> + Send + 'static {
    let descriptor = request
      .validate()
      .and_then(|()| self.post("/predict/").json(request));
    self.send(descriptor)
  }

  pub fn predict_batch(
    &self,
    request: &BatchPredictionRequest,
  ) -> impl Future<Output = Result<BatchPrediction, ApiError>> + Send + 'static {
    let descriptor = request
      .validate()
      .and_then(|()| self.post("/predict/batch").json(request));
    self.send(descriptor)
  }

  pub fn model_info(&self) -> impl Future<Output = Result<ModelInfo, ApiError>> + Send + 'static {
    self.send(Ok(self.get("/predict/model/info")))
  }

  /// Backend health. Served at the root, outside the API prefix.
  pub fn health(&self) -> impl Future<Output = Result<Health, ApiError>> + Send + 'static {
    self.send(Ok(self.descriptor(RequestDescriptor::get("/health"))))
  }

  /// Supersede key of the search endpoint.
  pub fn search_key(&self) -> RequestKey {
    self.get("/analytics/companies/search").key()
  }

  pub fn cancel(&self, key: &RequestKey) -> bool {
    self.manager.cancel(key)
  }

  pub fn cancel_all(&self) -> usize {
    self.manager.cancel_all()
  }

  fn get(&self, path: &str) -> RequestDescriptor {
    self.descriptor(RequestDescriptor::get(format!("{}{}", self.prefix, path)))
  }

  fn post(&self, path: &str) -> RequestDescriptor {
    self.descriptor(RequestDescriptor::post(format!("{}{}", self.prefix, path)))
  }

  fn descriptor(&self, descriptor: RequestDescriptor) -> RequestDescriptor {
    descriptor
      .retry(self.retry)
      .retry_delay(self.retry_delay)
      .timeout(self.timeout)
  }

  fn send<T>(
    &self,
    descriptor: Result<RequestDescriptor, ApiError>,
  ) -> impl Future<Output = Result<T, ApiError>> + Send + 'static
  where
    T: DeserializeOwned + Send + 'static,
  {
    let call = descriptor.map(|d| self.manager.execute(d));
    async move { call?.await }
  }
}

fn check_range(name: &str, value: u32, range: RangeInclusive<u32>) -> Result<(), ApiError> {
  if range.contains(&value) {
    Ok(())
  } else {
    Err(ApiError::validation(format!(
      "{} must be between {} and {}, got {}",
      name,
      range.start(),
      range.end(),
      value
    )))
  }
}

fn check_score(name: &str, value: f64) -> Result<(), ApiError> {
  if (0.0..=100.0).contains(&value) {
    Ok(())
  } else {
    Err(ApiError::validation(format!(
      "{} must be between 0 and 100, got {}",
      name, value
    )))
  }
}

fn check_symbol(symbol: &str) -> Result<&str, ApiError> {
  let symbol = symbol.trim();
  if symbol.is_empty() {
    return Err(ApiError::validation("Symbol must not be empty"));
  }
  if symbol
    .chars()
    .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '%'))
  {
    return Err(ApiError::validation(format!("Invalid symbol: {:?}", symbol)));
  }
  Ok(symbol)
}

fn check_search(query: &str, sector: Option<&str>, limit: u32) -> Result<(), ApiError> {
  let len = query.trim().chars().count();
  if len == 0 || len > MAX_QUERY_LEN {
    return Err(ApiError::validation(format!(
      "Search query must be 1 to {} characters",
      MAX_QUERY_LEN
    )));
  }
  if sector.is_some_and(|s| s.chars().count() > MAX_QUERY_LEN) {
    return Err(ApiError::validation(format!(
      "Sector must be at most {} characters",
      MAX_QUERY_LEN
    )));
  }
  check_range("limit", limit, LIMIT_RANGE)
}
