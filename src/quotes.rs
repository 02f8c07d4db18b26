//! Quotation metrics engine.
//!
//! Narrower sibling pipeline over the cotizaciones table: full paged fetch,
//! type normalization, summary figures, a local-calendar monthly series,
//! top-N groupings and a percentile-clipped histogram. Quotations have few
//! derived fields, so there is no enrichment stage here.

use crate::aggregates::{mean, median_sorted};
use crate::errors::AppError;
use crate::models::{
    lenient_f64, HistogramBin, HistogramResponse, LabeledAgg, QuotationRow, QuoteListResponse,
    QuoteSummary, SeriesPoint,
};
use crate::store::{StoreClient, StoreFilter, QUOTES_TABLE};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

const QUOTE_CHUNK: usize = 1000;

const METRIC_COLUMNS: &str = "id,fecha_hora,created_at,precio_final,area_m2,estilo,distrito";

const LIST_COLUMNS: &str = "id,created_at,fecha_hora,nombre,telefono,correo,proyecto,estilo,\
espacios,area_m2,habitaciones,tiempo,distrito,diseno,mobiliario,acabados,precio_final";

/// Columns covered by the free-text search.
const SEARCH_COLUMNS: [&str; 6] = [
    "nombre",
    "telefono",
    "correo",
    "proyecto",
    "estilo",
    "distrito",
];

/// Sort keys the listing accepts; anything else falls back to fecha_hora.
const SORTABLE_COLUMNS: [&str; 11] = [
    "fecha_hora",
    "nombre",
    "telefono",
    "correo",
    "proyecto",
    "estilo",
    "area_m2",
    "habitaciones",
    "distrito",
    "precio_final",
    "diseno",
];

/// Placeholder label for a null grouping key.
const NULL_LABEL: &str = "—";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Estilo,
    Distrito,
}

impl GroupKey {
    fn value(&self, row: &QuotationRow) -> Option<String> {
        match self {
            GroupKey::Estilo => row.estilo.clone(),
            GroupKey::Distrito => row.distrito.clone(),
        }
    }
}

#[derive(Deserialize)]
struct PrecioRow {
    #[serde(default, deserialize_with = "lenient_f64")]
    precio_final: Option<f64>,
}

#[derive(Deserialize)]
struct AreaRow {
    #[serde(default, deserialize_with = "lenient_f64")]
    area_m2: Option<f64>,
}

/// (year, month) pairs for the last `months_back` local months, ascending.
/// Month arithmetic wraps year boundaries via euclidean division.
pub fn months_back_labels(now_local: NaiveDate, months_back: usize) -> Vec<(i32, u32)> {
    let anchor = now_local.year() * 12 + now_local.month0() as i32;
    (0..months_back as i32)
        .rev()
        .map(|i| {
            let idx = anchor - i;
            (idx.div_euclid(12), (idx.rem_euclid(12) + 1) as u32)
        })
        .collect()
}

/// UTC bounds [start, end) of a local calendar month in the given offset.
pub fn month_utc_bounds(
    year: i32,
    month: u32,
    tz_offset_hours: i32,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let offset = FixedOffset::east_opt(tz_offset_hours * 3600)
        .ok_or_else(|| AppError::InternalError("Invalid timezone offset".to_string()))?;
    let month_start = |y: i32, m: u32| -> Result<NaiveDateTime, AppError> {
        NaiveDate::from_ymd_opt(y, m, 1)
            .map(|d| d.and_time(NaiveTime::MIN))
            .ok_or_else(|| AppError::BadRequest(format!("Invalid month {}-{}", y, m)))
    };
    let start_local = month_start(year, month)?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let end_local = month_start(next_year, next_month)?;

    let to_utc = |naive: NaiveDateTime| -> Result<DateTime<Utc>, AppError> {
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| AppError::InternalError("Ambiguous local time".to_string()))
    };
    Ok((to_utc(start_local)?, to_utc(end_local)?))
}

/// Global quotation figures: count, price sum (nulls as 0), mean ticket and
/// mean area over non-null areas.
pub fn quote_summary(rows: &[QuotationRow]) -> QuoteSummary {
    if rows.is_empty() {
        return QuoteSummary::default();
    }
    let n = rows.len();
    let suma: f64 = rows.iter().filter_map(|r| r.precio_final).sum();
    let areas: Vec<f64> = rows.iter().filter_map(|r| r.area_m2).collect();
    QuoteSummary {
        total_cotizaciones: n,
        suma_precio: suma,
        ticket_promedio: suma / n as f64,
        m2_promedio: mean(&areas),
    }
}

/// Groups rows by `key`, aggregates count/sum/mean, sorts by sum descending
/// and truncates to `limit`. A null grouping key maps to a placeholder.
pub fn top_groups(rows: &[QuotationRow], key: GroupKey, limit: usize) -> Vec<LabeledAgg> {
    use std::collections::BTreeMap;

    let mut groups: BTreeMap<String, (usize, f64, Vec<f64>)> = BTreeMap::new();
    for row in rows {
        let label = key
            .value(row)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| NULL_LABEL.to_string());
        let entry = groups.entry(label).or_insert((0, 0.0, Vec::new()));
        entry.0 += 1;
        if let Some(precio) = row.precio_final {
            entry.1 += precio;
            entry.2.push(precio);
        }
    }

    let mut result: Vec<LabeledAgg> = groups
        .into_iter()
        .map(|(label, (total, suma, precios))| LabeledAgg {
            label,
            total,
            suma_precio: suma,
            promedio: mean(&precios),
        })
        .collect();
    result.sort_by(|a, b| b.suma_precio.total_cmp(&a.suma_precio));
    result.truncate(limit);
    result
}

/// Linear-interpolated percentile of a sorted sample, p in [0, 100].
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let weight = rank - lo as f64;
    sorted[lo] * (1.0 - weight) + sorted[hi] * weight
}

/// Builds a fixed-width histogram over positive values. With `clip` and at
/// least 20 samples, values outside [p1, p99] are dropped first (falling
/// back to the unclipped set if the clip empties it). Buckets are
/// (left, right] and counted with one binary-search cursor reused across
/// buckets, so binning stays linear in the bucket count.
pub fn build_histogram(mut values: Vec<f64>, bin_width: f64, clip: bool) -> HistogramResponse {
    if values.is_empty() || bin_width <= 0.0 {
        return HistogramResponse::default();
    }
    values.sort_by(f64::total_cmp);

    let (set, clipped) = if clip && values.len() >= 20 {
        let p1 = percentile(&values, 1.0);
        let p99 = percentile(&values, 99.0);
        let retained: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| (p1..=p99).contains(v))
            .collect();
        if retained.is_empty() {
            (values, false)
        } else {
            (retained, true)
        }
    } else {
        (values, false)
    };

    let min = set[0];
    let max = set[set.len() - 1];
    let mut lo = (min / bin_width).floor() * bin_width;
    if min <= lo {
        // Buckets are left-exclusive; a minimum on the boundary needs the
        // bucket below.
        lo -= bin_width;
    }
    let mut hi = (max / bin_width).ceil() * bin_width;
    if hi <= lo {
        hi = lo + bin_width;
    }
    let bin_count = ((hi - lo) / bin_width).round() as usize;

    let mut bins = Vec::with_capacity(bin_count);
    let mut cursor = set.partition_point(|v| *v <= lo);
    for i in 0..bin_count {
        let from = lo + bin_width * i as f64;
        let to = lo + bin_width * (i + 1) as f64;
        let next = cursor + set[cursor..].partition_point(|v| *v <= to);
        bins.push(HistogramBin {
            from,
            to,
            count: next - cursor,
        });
        cursor = next;
    }

    HistogramResponse {
        total_samples: set.len(),
        clipped,
        bin_width,
        mean: mean(&set),
        median: median_sorted(&set),
        bins,
    }
}

/// Store-backed quotation operations.
pub struct QuoteService {
    store: StoreClient,
    tz_offset_hours: i32,
}

impl QuoteService {
    pub fn new(store: StoreClient, tz_offset_hours: i32) -> Self {
        Self {
            store,
            tz_offset_hours,
        }
    }

    /// Paginated listing with free-text search across six columns and a
    /// sort-key allowlist (unknown keys fall back to fecha_hora).
    pub async fn list(
        &self,
        page: usize,
        size: usize,
        q: Option<&str>,
        sort_key: &str,
        sort_dir: &str,
    ) -> Result<QuoteListResponse, AppError> {
        let sort_key = if SORTABLE_COLUMNS.contains(&sort_key) {
            sort_key
        } else {
            "fecha_hora"
        };
        let desc = sort_dir != "asc";

        let mut filters = Vec::new();
        if let Some(q) = q.map(str::trim).filter(|s| !s.is_empty()) {
            filters.push(StoreFilter::OrILike {
                columns: SEARCH_COLUMNS.iter().map(|c| c.to_string()).collect(),
                needle: q.to_string(),
            });
        }

        let total = self.store.count(QUOTES_TABLE, &filters).await?;
        let data = self
            .store
            .fetch_page_raw(
                QUOTES_TABLE,
                LIST_COLUMNS,
                &filters,
                sort_key,
                desc,
                (page - 1) * size,
                size,
            )
            .await?;

        Ok(QuoteListResponse {
            total,
            page,
            page_size: size,
            data,
        })
    }

    /// Most recent five quotations in a thin projection, for connectivity
    /// checks from the frontend.
    pub async fn last_five(&self) -> Result<Vec<Value>, AppError> {
        self.store
            .fetch_page_raw(
                QUOTES_TABLE,
                "created_at,fecha_hora,nombre,telefono",
                &[],
                "fecha_hora",
                true,
                0,
                5,
            )
            .await
    }

    /// Downloads every quotation row in metric projection, paged.
    pub async fn fetch_all_rows(&self) -> Result<Vec<QuotationRow>, AppError> {
        self.store
            .fetch_all(QUOTES_TABLE, METRIC_COLUMNS, &[], "id", false, QUOTE_CHUNK)
            .await
    }

    pub async fn summary(&self) -> Result<QuoteSummary, AppError> {
        let rows = self.fetch_all_rows().await?;
        Ok(quote_summary(&rows))
    }

    /// Count and price sum of one local calendar month, queried as a UTC
    /// range against the store.
    pub async fn month_bucket(&self, year: i32, month: u32) -> Result<SeriesPoint, AppError> {
        let (start, end) = month_utc_bounds(year, month, self.tz_offset_hours)?;
        let filters = vec![
            StoreFilter::Gte("fecha_hora".into(), start.to_rfc3339()),
            StoreFilter::Lt("fecha_hora".into(), end.to_rfc3339()),
        ];

        let total = self.store.count(QUOTES_TABLE, &filters).await?;
        let rows: Vec<PrecioRow> = self
            .store
            .fetch_all(QUOTES_TABLE, "precio_final", &filters, "id", false, QUOTE_CHUNK)
            .await?;
        let suma: f64 = rows.iter().filter_map(|r| r.precio_final).sum();

        Ok(SeriesPoint {
            x: format!("{}-{:02}", year, month),
            total,
            suma_precio: suma,
        })
    }

    /// Series of the last `months_back` local months, ascending by label.
    pub async fn monthly_series(
        &self,
        months_back: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>, AppError> {
        let offset = FixedOffset::east_opt(self.tz_offset_hours * 3600)
            .ok_or_else(|| AppError::InternalError("Invalid timezone offset".to_string()))?;
        let now_local = now.with_timezone(&offset).date_naive();

        let mut series = Vec::with_capacity(months_back);
        for (year, month) in months_back_labels(now_local, months_back) {
            series.push(self.month_bucket(year, month).await?);
        }
        Ok(series)
    }

    pub async fn top_by(&self, key: GroupKey, limit: usize) -> Result<Vec<LabeledAgg>, AppError> {
        let rows = self.fetch_all_rows().await?;
        Ok(top_groups(&rows, key, limit))
    }

    /// Histogram over positive areas. `limit` bounds the sample size to keep
    /// the paged load cheap.
    pub async fn histogram(
        &self,
        bin_width: f64,
        clip: bool,
        limit: usize,
    ) -> Result<HistogramResponse, AppError> {
        let filters = vec![StoreFilter::Gt("area_m2".into(), "0".into())];
        let mut values = Vec::new();
        let mut page = 0usize;
        loop {
            let chunk: Vec<AreaRow> = self
                .store
                .fetch_page(
                    QUOTES_TABLE,
                    "area_m2",
                    &filters,
                    "id",
                    false,
                    page * QUOTE_CHUNK,
                    QUOTE_CHUNK,
                )
                .await?;
            let short = chunk.len() < QUOTE_CHUNK;
            values.extend(chunk.iter().filter_map(|r| r.area_m2).filter(|v| *v > 0.0));
            if short || values.len() >= limit {
                break;
            }
            page += 1;
        }
        values.truncate(limit);

        Ok(build_histogram(values, bin_width, clip))
    }
}
