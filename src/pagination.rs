//! Pagination reconciler.
//!
//! Some listing filters are store-native (phone/name/category/style/budget/
//! date range) and push down to the record store; others only exist after
//! derivation (month/year/client-type/follow-up/qualification). One
//! reconciler produces the same envelope either way:
//!
//! - fast path (no derived filter): one store page + the store's count;
//! - full-scan path: fetch everything, enrich, filter, slice locally;
//!   `total` reflects the post-filter count, not the store count.
//!
//! Errors never propagate past this layer; they degrade to a zero-valued
//! envelope with an error marker.

use crate::aggregates::client_counts;
use crate::enrichment::enrich_all;
use crate::errors::AppError;
use crate::filters::DerivedFilters;
use crate::models::{ClientStats, EnrichedClient, PageEnvelope, RawClient};
use crate::store::{StoreClient, StoreFilter, CLIENTS_TABLE};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Page size used when scanning the whole collection.
const FULL_SCAN_PAGE: usize = 1000;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 200;

/// Query parameters of the paginated client listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientListParams {
    pub page: Option<usize>,
    pub size: Option<usize>,
    // Store-native filters
    pub telefono: Option<String>,
    pub nombre: Option<String>,
    pub estilo: Option<String>,
    pub presupuesto: Option<String>,
    pub categoria: Option<String>,
    pub fecha_desde: Option<String>,
    pub fecha_hasta: Option<String>,
    // Derived-only filters
    pub mes: Option<String>,
    #[serde(rename = "año", alias = "anio")]
    pub anio: Option<String>,
    pub tipo_cliente: Option<String>,
    pub seguimiento: Option<String>,
    pub calificacion: Option<String>,
    pub calificacion_nivel: Option<String>,
}

impl ClientListParams {
    /// Filters the store can evaluate server-side.
    pub fn native_filters(&self) -> Vec<StoreFilter> {
        fn text(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }
        let mut filters = Vec::new();
        if let Some(v) = text(&self.telefono) {
            filters.push(StoreFilter::ILike("telefono".into(), v.into()));
        }
        if let Some(v) = text(&self.nombre) {
            filters.push(StoreFilter::ILike("nombre".into(), v.into()));
        }
        if let Some(v) = text(&self.categoria) {
            filters.push(StoreFilter::Eq("categoria".into(), v.into()));
        }
        if let Some(v) = text(&self.estilo) {
            filters.push(StoreFilter::Eq("estilo".into(), v.into()));
        }
        if let Some(v) = text(&self.presupuesto) {
            filters.push(StoreFilter::Eq("presupuesto".into(), v.into()));
        }
        if let Some(v) = text(&self.fecha_desde) {
            filters.push(StoreFilter::Gte("primera_interaccion".into(), v.into()));
        }
        if let Some(v) = text(&self.fecha_hasta) {
            filters.push(StoreFilter::Lte("primera_interaccion".into(), v.into()));
        }
        filters
    }

    /// Filters only computable after enrichment.
    pub fn derived_filters(&self) -> DerivedFilters {
        DerivedFilters {
            mes: self.mes.clone(),
            anio: self.anio.clone(),
            tipo_cliente: self.tipo_cliente.clone(),
            seguimiento: self.seguimiento.clone(),
            calificacion: self.calificacion.clone(),
            calificacion_nivel: self.calificacion_nivel.clone(),
        }
    }
}

fn total_pages(total: usize, size: usize) -> usize {
    (total + size - 1) / size
}

fn envelope(total: usize, window: Vec<EnrichedClient>, page: usize, size: usize) -> PageEnvelope {
    PageEnvelope {
        total,
        page,
        size,
        total_pages: total_pages(total, size),
        current_page_count: window.len(),
        client_stats: client_counts(&window),
        data: window,
        error: None,
    }
}

fn zero_envelope(page: usize, size: usize) -> PageEnvelope {
    PageEnvelope {
        total: 0,
        data: Vec::new(),
        page,
        size,
        total_pages: 0,
        current_page_count: 0,
        client_stats: ClientStats::default(),
        error: Some("Error al obtener datos".to_string()),
    }
}

async fn list_clients_inner(
    store: &StoreClient,
    params: &ClientListParams,
    page: usize,
    size: usize,
    now: DateTime<Utc>,
) -> Result<PageEnvelope, AppError> {
    let native = params.native_filters();
    let derived = params.derived_filters();
    let now = now.naive_utc();

    if derived.is_empty() {
        // Fast path: paginate in the store, enrich just this page.
        let total = store.count(CLIENTS_TABLE, &native).await?;
        let raw: Vec<RawClient> = store
            .fetch_page(
                CLIENTS_TABLE,
                "*",
                &native,
                "ultima_interaccion",
                true,
                (page - 1) * size,
                size,
            )
            .await?;
        let rows = derived.apply(&enrich_all(raw, now));
        tracing::debug!("Client listing fast path: {} of {} rows", rows.len(), total);
        return Ok(envelope(total, rows, page, size));
    }

    // Full-scan path: a derived filter is active, so the store count cannot
    // be trusted. Fetch everything, filter after enrichment, slice locally.
    let raw: Vec<RawClient> = store
        .fetch_all(
            CLIENTS_TABLE,
            "*",
            &native,
            "ultima_interaccion",
            true,
            FULL_SCAN_PAGE,
        )
        .await?;
    let filtered = derived.apply(&enrich_all(raw, now));
    let total = filtered.len();
    let start = ((page - 1) * size).min(total);
    let end = (start + size).min(total);
    let window = filtered[start..end].to_vec();
    tracing::debug!(
        "Client listing full-scan path: {} filtered rows, window {}..{}",
        total,
        start,
        end
    );
    Ok(envelope(total, window, page, size))
}

/// Produces one paginated client listing. Infallible by contract: any store
/// or derivation failure degrades to the zero envelope.
pub async fn list_clients(
    store: &StoreClient,
    params: &ClientListParams,
    now: DateTime<Utc>,
) -> PageEnvelope {
    let page = params.page.unwrap_or(1).max(1);
    let size = params.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    match list_clients_inner(store, params, page, size, now).await {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!("Client listing failed, returning zero envelope: {}", e);
            zero_envelope(page, size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pages_rounds_up() {
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(30, 20), 2);
        assert_eq!(total_pages(40, 20), 2);
        assert_eq!(total_pages(41, 20), 3);
    }

    #[test]
    fn test_native_and_derived_split() {
        let params = ClientListParams {
            telefono: Some("999".into()),
            fecha_desde: Some("2024-01-01".into()),
            mes: Some("Enero".into()),
            ..Default::default()
        };
        let native = params.native_filters();
        assert_eq!(native.len(), 2);
        assert!(native.contains(&StoreFilter::ILike("telefono".into(), "999".into())));
        assert!(!params.derived_filters().is_empty());

        let no_derived = ClientListParams {
            nombre: Some("ana".into()),
            mes: Some("Todos".into()),
            ..Default::default()
        };
        assert!(no_derived.derived_filters().is_empty());
    }

    #[test]
    fn test_native_filters_trim_and_skip_blank() {
        let params = ClientListParams {
            telefono: Some("  999  ".into()),
            nombre: Some("   ".into()),
            estilo: Some(String::new()),
            ..Default::default()
        };
        let native = params.native_filters();
        assert_eq!(
            native,
            vec![StoreFilter::ILike("telefono".into(), "999".into())]
        );
    }
}
