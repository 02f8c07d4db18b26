//! Record store adapter.
//!
//! Wraps the hosted PostgREST-style record store behind a small surface:
//! server-side counts, single-page fetches, full-table fetches (paged
//! internally until a short page signals end of data), and a closed filter
//! vocabulary that renders to query parameters.

use crate::errors::AppError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub const CLIENTS_TABLE: &str = "clients_pravi";
pub const QUOTES_TABLE: &str = "cotizaciones";
pub const CHAT_TABLE: &str = "n8n_chat_pravi";
pub const CHAT_ACTIVATION_TABLE: &str = "chat_activation_pravi";

/// Filter predicates the store evaluates server-side.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreFilter {
    /// Exact equality on a column.
    Eq(String, String),
    /// Case-insensitive substring match.
    ILike(String, String),
    Gte(String, String),
    Lte(String, String),
    Gt(String, String),
    Lt(String, String),
    /// Case-insensitive substring match across several columns (logical OR).
    OrILike { columns: Vec<String>, needle: String },
}

impl StoreFilter {
    /// Renders the predicate as a PostgREST query parameter pair.
    pub fn as_pair(&self) -> (String, String) {
        match self {
            StoreFilter::Eq(col, v) => (col.clone(), format!("eq.{}", v)),
            StoreFilter::ILike(col, v) => (col.clone(), format!("ilike.*{}*", v)),
            StoreFilter::Gte(col, v) => (col.clone(), format!("gte.{}", v)),
            StoreFilter::Lte(col, v) => (col.clone(), format!("lte.{}", v)),
            StoreFilter::Gt(col, v) => (col.clone(), format!("gt.{}", v)),
            StoreFilter::Lt(col, v) => (col.clone(), format!("lt.{}", v)),
            StoreFilter::OrILike { columns, needle } => {
                // Commas and parens would break the or() grammar.
                let needle = needle.replace([',', '(', ')'], " ");
                let needle = needle.trim();
                let disjuncts = columns
                    .iter()
                    .map(|c| format!("{}.ilike.*{}*", c, needle))
                    .collect::<Vec<_>>()
                    .join(",");
                ("or".to_string(), format!("({})", disjuncts))
            }
        }
    }
}

/// Decodes store rows one by one; rows that fail to decode are dropped with a
/// logged warning and never abort the batch.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Dropping store row that failed to decode: {}", e);
                None
            }
        })
        .collect()
}

/// Client for the hosted record store.
#[derive(Clone)]
pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl StoreClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::StoreError(format!("Failed to create store client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn table_url(
        &self,
        table: &str,
        select: &str,
        filters: &[StoreFilter],
    ) -> Result<Url, AppError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, table))
            .map_err(|e| AppError::StoreError(format!("Invalid store URL: {}", e)))?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("select", select);
            for filter in filters {
                let (k, v) = filter.as_pair();
                qp.append_pair(&k, &v);
            }
        }
        Ok(url)
    }

    fn authed_get(&self, url: Url) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    /// Server-side exact count of rows matching `filters`.
    pub async fn count(&self, table: &str, filters: &[StoreFilter]) -> Result<usize, AppError> {
        let mut url = self.table_url(table, "id", filters)?;
        url.query_pairs_mut().append_pair("limit", "1");

        let response = self
            .authed_get(url)
            .header("Prefer", "count=exact")
            .send()
            .await
            .map_err(|e| AppError::StoreError(format!("Store count request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::StoreError(format!(
                "Store count returned {}: {}",
                status, error_text
            )));
        }

        // Total arrives in Content-Range as "0-0/57" (or "*/57" when empty).
        let total = response
            .headers()
            .get("content-range")
            .and_then(|h| h.to_str().ok())
            .and_then(|range| range.rsplit('/').next())
            .and_then(|total| total.parse::<usize>().ok())
            .unwrap_or(0);

        Ok(total)
    }

    /// Fetches a single page of rows, raw.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_page_raw(
        &self,
        table: &str,
        select: &str,
        filters: &[StoreFilter],
        order_by: &str,
        desc: bool,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, AppError> {
        let mut url = self.table_url(table, select, filters)?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair(
                "order",
                &format!("{}.{}", order_by, if desc { "desc" } else { "asc" }),
            );
            qp.append_pair("offset", &offset.to_string());
            qp.append_pair("limit", &limit.to_string());
        }

        let response = self
            .authed_get(url)
            .send()
            .await
            .map_err(|e| AppError::StoreError(format!("Store request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::StoreError(format!(
                "Store returned {}: {}",
                status, error_text
            )));
        }

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| AppError::StoreError(format!("Failed to parse store response: {}", e)))?;

        Ok(rows)
    }

    /// Fetches a single page of rows, decoded leniently.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_page<T: DeserializeOwned>(
        &self,
        table: &str,
        select: &str,
        filters: &[StoreFilter],
        order_by: &str,
        desc: bool,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<T>, AppError> {
        let rows = self
            .fetch_page_raw(table, select, filters, order_by, desc, offset, limit)
            .await?;
        Ok(decode_rows(rows))
    }

    /// Fetches the entire matching collection, paging internally until a
    /// short page is returned.
    pub async fn fetch_all_raw(
        &self,
        table: &str,
        select: &str,
        filters: &[StoreFilter],
        order_by: &str,
        desc: bool,
        page_size: usize,
    ) -> Result<Vec<Value>, AppError> {
        let mut all_rows = Vec::new();
        let mut page = 0usize;
        loop {
            let chunk = self
                .fetch_page_raw(
                    table,
                    select,
                    filters,
                    order_by,
                    desc,
                    page * page_size,
                    page_size,
                )
                .await?;
            let short = chunk.len() < page_size;
            all_rows.extend(chunk);
            if short {
                break;
            }
            page += 1;
        }
        tracing::debug!("Fetched {} rows from {}", all_rows.len(), table);
        Ok(all_rows)
    }

    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        table: &str,
        select: &str,
        filters: &[StoreFilter],
        order_by: &str,
        desc: bool,
        page_size: usize,
    ) -> Result<Vec<T>, AppError> {
        let rows = self
            .fetch_all_raw(table, select, filters, order_by, desc, page_size)
            .await?;
        Ok(decode_rows(rows))
    }

    /// Inserts one record, returning the stored representation.
    pub async fn insert(&self, table: &str, body: &Value) -> Result<Vec<Value>, AppError> {
        let url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, table))
            .map_err(|e| AppError::StoreError(format!("Invalid store URL: {}", e)))?;

        let response = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::StoreError(format!("Store insert failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::StoreError(format!(
                "Store insert returned {}: {}",
                status, error_text
            )));
        }

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| AppError::StoreError(format!("Failed to parse insert response: {}", e)))?;

        Ok(rows)
    }

    /// Upserts one record keyed by `on_conflict`.
    pub async fn upsert(
        &self,
        table: &str,
        on_conflict: &str,
        body: &Value,
    ) -> Result<Vec<Value>, AppError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, table))
            .map_err(|e| AppError::StoreError(format!("Invalid store URL: {}", e)))?;
        url.query_pairs_mut().append_pair("on_conflict", on_conflict);

        let response = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::StoreError(format!("Store upsert failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::StoreError(format!(
                "Store upsert returned {}: {}",
                status, error_text
            )));
        }

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| AppError::StoreError(format!("Failed to parse upsert response: {}", e)))?;

        Ok(rows)
    }
}
