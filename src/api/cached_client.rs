//! Cached ESG client that wraps EsgClient with the response cache.

use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::{ReadOptions, ResponseCache};
use crate::config::Config;
use crate::error::ApiError;
use crate::query::Query;

use super::client::EsgClient;
use super::keys::ApiQueryKey;
use super::types::{
  BatchPrediction, BatchPredictionRequest, Company, CompanyDetail, ControversyCompany, Health,
  ModelInfo, Prediction, PredictionRequest, SectorAverage,
};

/// ESG client with transparent caching of the read endpoints.
///
/// Predictions and health checks always go to the backend.
#[derive(Clone)]
pub struct CachedEsgClient {
  inner: EsgClient,
  cache: ResponseCache,
  options: ReadOptions,
}

impl CachedEsgClient {
  pub fn new(config: &Config) -> Result<Self> {
    let inner = EsgClient::new(config)?;
    Ok(Self::with_cache(inner, ResponseCache::new(), config.read_options()))
  }

  pub fn with_cache(inner: EsgClient, cache: ResponseCache, options: ReadOptions) -> Self {
    Self {
      inner,
      cache,
      options,
    }
  }

  pub fn inner(&self) -> &EsgClient {
    &self.inner
  }

  pub fn cache(&self) -> &ResponseCache {
    &self.cache
  }

  pub fn options(&self) -> ReadOptions {
    self.options
  }

  /// Start periodic eviction of idle entries.
  pub fn spawn_janitor(&self, config: &Config) -> JoinHandle<()> {
    self.cache.spawn_janitor(config.cleanup_interval())
  }

  pub async fn top_companies(&self, limit: u32) -> Result<Arc<Vec<Company>>, ApiError> {
    let inner = self.inner.clone();
    self
      .cache
      .fetch(
        &ApiQueryKey::TopCompanies { limit },
        move || inner.top_companies(limit),
        self.options,
      )
      .await
  }

  pub async fn sector_averages(&self) -> Result<Arc<Vec<SectorAverage>>, ApiError> {
    let inner = self.inner.clone();
    self
      .cache
      .fetch(
        &ApiQueryKey::SectorAverages,
        move || inner.sector_averages(),
        self.options,
      )
      .await
  }

  pub async fn high_controversy(
    &self,
    min_score: f64,
  ) -> Result<Arc<Vec<ControversyCompany>>, ApiError> {
    let inner = self.inner.clone();
    self
      .cache
      .fetch(
        &ApiQueryKey::HighControversy { min_score },
        move || inner.high_controversy(min_score),
        self.options,
      )
      .await
  }

  pub async fn company(&self, symbol: &str) -> Result<Arc<CompanyDetail>, ApiError> {
    let inner = self.inner.clone();
    let query_key = ApiQueryKey::CompanyDetail {
      symbol: symbol.to_string(),
    };
    self
      .cache
      .fetch(&query_key, move || inner.company(symbol), self.options)
      .await
  }

  pub async fn search_companies(
    &self,
    query: &str,
    sector: Option<&str>,
    limit: u32,
  ) -> Result<Arc<Vec<Company>>, ApiError> {
    let inner = self.inner.clone();
    let query_key = ApiQueryKey::CompanySearch {
      query: query.to_string(),
      sector: sector.map(String::from),
      limit,
    };
    self
      .cache
      .fetch(
        &query_key,
        move || inner.search_companies(query, sector, limit),
        self.options,
      )
      .await
  }

  pub async fn model_info(&self) -> Result<Arc<ModelInfo>, ApiError> {
    let inner = self.inner.clone();
    self
      .cache
      .fetch(&ApiQueryKey::ModelInfo, move || inner.model_info(), self.options)
      .await
  }

  /// Risk prediction (not cached - depends on caller input).
  pub async fn predict(&self, request: &PredictionRequest) -> Result<Prediction, ApiError> {
    self.inner.predict(request).await
  }

  /// Batch risk prediction (not cached).
  pub async fn predict_batch(
    &self,
    request: &BatchPredictionRequest,
  ) -> Result<BatchPrediction, ApiError> {
    self.inner.predict_batch(request).await
  }

  /// Backend health (not cached - must reflect the current state).
  pub async fn health(&self) -> Result<Health, ApiError> {
    self.inner.health().await
  }

  // ==========================================================================
  // Query handles
  // ==========================================================================

  pub fn top_companies_query(&self, limit: u32) -> Query<Vec<Company>> {
    let inner = self.inner.clone();
    self.query(&ApiQueryKey::TopCompanies { limit }, move || {
      inner.top_companies(limit)
    })
  }

  pub fn sector_averages_query(&self) -> Query<Vec<SectorAverage>> {
    let inner = self.inner.clone();
    self.query(&ApiQueryKey::SectorAverages, move || inner.sector_averages())
  }

  pub fn high_controversy_query(&self, min_score: f64) -> Query<Vec<ControversyCompany>> {
    let inner = self.inner.clone();
    self.query(&ApiQueryKey::HighControversy { min_score }, move || {
      inner.high_controversy(min_score)
    })
  }

  pub fn company_query(&self, symbol: &str) -> Query<CompanyDetail> {
    let inner = self.inner.clone();
    let symbol = symbol.to_string();
    let query_key = ApiQueryKey::CompanyDetail {
      symbol: symbol.clone(),
    };
    self.query(&query_key, move || inner.company(&symbol))
  }

  pub fn search_query(&self, query: &str, sector: Option<&str>, limit: u32) -> Query<Vec<Company>> {
    let inner = self.inner.clone();
    let query = query.to_string();
    let sector = sector.map(String::from);
    let query_key = ApiQueryKey::CompanySearch {
      query: query.clone(),
      sector: sector.clone(),
      limit,
    };
    self.query(&query_key, move || {
      inner.search_companies(&query, sector.as_deref(), limit)
    })
  }

  pub fn model_info_query(&self) -> Query<ModelInfo> {
    let inner = self.inner.clone();
    self.query(&ApiQueryKey::ModelInfo, move || inner.model_info())
  }

  fn query<T, F, Fut>(&self, key: &ApiQueryKey, fetcher: F) -> Query<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    Query::new(self.cache.clone(), key, self.options, fetcher)
  }

  // ==========================================================================
  // Invalidation and teardown
  // ==========================================================================

  pub fn invalidate(&self, key: &ApiQueryKey) -> bool {
    self.cache.invalidate(key)
  }

  /// Invalidate every cached entry of one resource family, e.g. all searches.
  pub fn invalidate_family(&self, family: &str) -> usize {
    self
      .cache
      .invalidate_prefix(&ApiQueryKey::family_prefix(family))
  }

  /// Cancel every request in flight, e.g. when the consuming view goes away.
  pub fn cancel_all(&self) -> usize {
    self.inner.cancel_all()
  }

  /// Cancel everything and drop all cached data.
  pub fn reset(&self) {
    self.inner.manager().reset();
    self.cache.reset();
  }
}
