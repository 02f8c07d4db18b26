use crate::aggregates;
use crate::chat::ChatService;
use crate::config::Config;
use crate::enrichment::enrich_all;
use crate::errors::AppError;
use crate::filters::DerivedFilters;
use crate::models::*;
use crate::pagination::{list_clients, ClientListParams};
use crate::quotes::{GroupKey, QuoteService};
use crate::store::{StoreClient, CLIENTS_TABLE};
use crate::whatsapp::WhatsAppClient;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Record-store adapter.
    pub store: StoreClient,
    /// Application configuration.
    pub config: Config,
    /// WhatsApp relay client, absent when the relay is not configured.
    pub whatsapp: Option<WhatsAppClient>,
}

impl AppState {
    fn quotes(&self) -> QuoteService {
        QuoteService::new(self.store.clone(), self.config.tz_offset_hours)
    }

    fn chat(&self) -> ChatService {
        ChatService::new(self.store.clone(), self.whatsapp.clone())
    }
}

/// Dashboard aggregations run over the most recent slice of the table rather
/// than a full scan.
const DASHBOARD_SAMPLE: usize = 1000;

async fn dashboard_rows(state: &AppState) -> Result<Vec<EnrichedClient>, AppError> {
    let raw: Vec<RawClient> = state
        .store
        .fetch_page(
            CLIENTS_TABLE,
            "*",
            &[],
            "ultima_interaccion",
            true,
            0,
            DASHBOARD_SAMPLE,
        )
        .await?;
    Ok(enrich_all(raw, Utc::now().naive_utc()))
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "visor-api",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

// Client listing

/// GET /table-data/clients
///
/// Paginated, filterable client listing. Never fails: store errors degrade to
/// an empty envelope carrying an error marker.
pub async fn table_data_clients(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClientListParams>,
) -> Json<PageEnvelope> {
    tracing::info!("GET /table-data/clients - params: {:?}", params);
    Json(list_clients(&state.store, &params, Utc::now()).await)
}

/// GET /clients/
pub async fn clients_index(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClientListParams>,
) -> Json<PageEnvelope> {
    Json(list_clients(&state.store, &params, Utc::now()).await)
}

/// GET /clients/count
pub async fn clients_count(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let count = state.store.count(CLIENTS_TABLE, &[]).await?;
    Ok(Json(json!({ "total": count })))
}

/// Rows sampled for the table-data preview endpoints.
const PREVIEW_SAMPLE: usize = 50;
const PREVIEW_ROWS: usize = 5;

async fn preview_rows(state: &AppState) -> Result<Vec<Value>, AppError> {
    state
        .store
        .fetch_page_raw(
            CLIENTS_TABLE,
            "*",
            &[],
            "ultima_interaccion",
            true,
            0,
            PREVIEW_SAMPLE,
        )
        .await
}

/// GET /table-data/metrics
///
/// Quick sanity view: the size of the most recent page plus its first rows.
pub async fn table_data_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let rows = preview_rows(&state).await?;
    let preview: Vec<&Value> = rows.iter().take(PREVIEW_ROWS).collect();
    Ok(Json(json!({ "total": rows.len(), "preview": preview })))
}

/// GET /table-data/charts
///
/// Style counts over the most recent page, for the table view's chart strip.
pub async fn table_data_charts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let rows = preview_rows(&state).await?;
    let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for row in &rows {
        let estilo = row
            .get("estilo")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("Desconocido");
        *counts.entry(estilo.to_string()).or_default() += 1;
    }
    Ok(Json(json!({ "estilo": counts })))
}

// Dashboard

/// GET /dashboard/metrics
pub async fn dashboard_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SummaryMetrics>, AppError> {
    let rows = dashboard_rows(&state).await?;
    Ok(Json(aggregates::metrics_summary(&rows)))
}

/// GET /dashboard/distribution
///
/// Bundle of the dashboard's standing distributions. `por_origen` asks for a
/// column the table does not carry and is therefore always empty.
pub async fn dashboard_distribution(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let rows = dashboard_rows(&state).await?;
    let tz = state.config.tz_offset_hours;
    Ok(Json(json!({
        "por_origen": aggregates::value_distribution(&rows, "origen"),
        "por_mes": aggregates::value_distribution(&rows, "mes"),
        "calificacion": aggregates::value_distribution(&rows, "calificacion"),
        "hora_contacto": aggregates::contact_hour_distribution(&rows, tz),
        "categoria_vs_estilo": aggregates::cross_distribution(&rows, "categoria", "estilo"),
    })))
}

/// POST /dashboard/filtered
///
/// Re-runs the summary over the dashboard slice narrowed by derived filters.
pub async fn dashboard_filtered(
    State(state): State<Arc<AppState>>,
    Json(filters): Json<DerivedFilters>,
) -> Result<Json<Value>, AppError> {
    let rows = filters.apply(&dashboard_rows(&state).await?);
    Ok(Json(json!({
        "total": rows.len(),
        "metrics": aggregates::metrics_summary(&rows),
        "data": rows,
    })))
}

/// GET /dashboard/followup
pub async fn dashboard_followup(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FollowupSummary>, AppError> {
    let rows = dashboard_rows(&state).await?;
    Ok(Json(aggregates::followup_success(&rows)))
}

/// GET /dashboard/appointment-hours
pub async fn dashboard_appointment_hours(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HourCount>>, AppError> {
    let rows = dashboard_rows(&state).await?;
    Ok(Json(aggregates::appointment_hours_distribution(
        &rows,
        state.config.tz_offset_hours,
    )))
}

/// GET /dashboard/project-duration
pub async fn dashboard_project_duration(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DurationBucket>>, AppError> {
    let rows = dashboard_rows(&state).await?;
    Ok(Json(aggregates::project_duration_distribution(&rows)))
}

#[derive(Debug, Deserialize)]
pub struct CrossRequest {
    pub col1: String,
    pub col2: String,
}

/// POST /dashboard/cross
///
/// Cross-tabulation of two caller-chosen columns; unknown columns yield an
/// empty table rather than an error.
pub async fn dashboard_cross(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CrossRequest>,
) -> Result<Json<Value>, AppError> {
    let rows = dashboard_rows(&state).await?;
    let table = aggregates::cross_distribution(&rows, &req.col1, &req.col2);
    Ok(Json(json!({
        "col1": req.col1,
        "col2": req.col2,
        "table": table,
    })))
}

/// GET /dashboard/new-this-month
pub async fn dashboard_new_this_month(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let rows = dashboard_rows(&state).await?;
    let count =
        aggregates::new_clients_this_month(&rows, state.config.tz_offset_hours, Utc::now());
    Ok(Json(json!({ "nuevos_este_mes": count })))
}

/// GET /dashboard/response-times
pub async fn dashboard_response_times(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResponseTimes>, AppError> {
    let rows = dashboard_rows(&state).await?;
    Ok(Json(aggregates::response_time_stats(&rows)))
}

/// GET /dashboard/qualification-distribution
pub async fn dashboard_qualification_distribution(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let rows = dashboard_rows(&state).await?;
    Ok(Json(aggregates::clients_by_qualification(&rows)))
}

// Quotations

#[derive(Debug, Deserialize)]
pub struct QuoteListQuery {
    pub page: Option<usize>,
    pub size: Option<usize>,
    pub q: Option<String>,
    pub sort_key: Option<String>,
    pub sort_dir: Option<String>,
}

/// GET /cotizaciones/
pub async fn quotes_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuoteListQuery>,
) -> Result<Json<QuoteListResponse>, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let size = query.size.unwrap_or(20).clamp(1, 200);
    let listing = state
        .quotes()
        .list(
            page,
            size,
            query.q.as_deref(),
            query.sort_key.as_deref().unwrap_or("fecha_hora"),
            query.sort_dir.as_deref().unwrap_or("desc"),
        )
        .await?;
    Ok(Json(listing))
}

/// GET /cotizaciones/test/last5
///
/// Raw passthrough of the five most recent quotations, used by the frontend
/// as a connectivity check.
pub async fn quotes_last_five(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Value>>, AppError> {
    Ok(Json(state.quotes().last_five().await?))
}

/// GET /cotizaciones/metrics/summary
pub async fn quotes_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QuoteSummary>, AppError> {
    Ok(Json(state.quotes().summary().await?))
}

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    pub months_back: Option<usize>,
}

/// GET /cotizaciones/metrics/series/monthly
pub async fn quotes_monthly_series(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<Vec<SeriesPoint>>, AppError> {
    let months_back = query.months_back.unwrap_or(12).clamp(1, 60);
    let series = state
        .quotes()
        .monthly_series(months_back, Utc::now())
        .await?;
    Ok(Json(series))
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub limit: Option<usize>,
}

/// GET /cotizaciones/metrics/top/estilo
pub async fn quotes_top_estilo(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopQuery>,
) -> Result<Json<Vec<LabeledAgg>>, AppError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    Ok(Json(state.quotes().top_by(GroupKey::Estilo, limit).await?))
}

/// GET /cotizaciones/metrics/top/distrito
pub async fn quotes_top_distrito(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopQuery>,
) -> Result<Json<Vec<LabeledAgg>>, AppError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    Ok(Json(state.quotes().top_by(GroupKey::Distrito, limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct HistogramQuery {
    pub bin: Option<f64>,
    pub clip: Option<bool>,
    pub limit: Option<usize>,
}

/// GET /cotizaciones/metrics/histogram
pub async fn quotes_histogram(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistogramQuery>,
) -> Result<Json<HistogramResponse>, AppError> {
    let bin = query.bin.unwrap_or(10.0);
    if !(bin > 0.0) {
        return Err(AppError::BadRequest("bin must be positive".to_string()));
    }
    let clip = query.clip.unwrap_or(true);
    let limit = query.limit.unwrap_or(2000).clamp(1, 10_000);
    Ok(Json(state.quotes().histogram(bin, clip, limit).await?))
}

// Chat relay

/// GET /chat/conversation
pub async fn chat_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Value>>, AppError> {
    Ok(Json(state.chat().active_conversations().await?))
}

/// GET /chat/messages/:session_id
pub async fn chat_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<Value>>, AppError> {
    Ok(Json(state.chat().session_messages(&session_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdatesQuery {
    pub since: Option<String>,
}

/// GET /chat/updates?since=<rfc3339>
pub async fn chat_updates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UpdatesQuery>,
) -> Result<Json<Vec<Value>>, AppError> {
    Ok(Json(state.chat().messages_since(query.since.as_deref()).await?))
}

/// GET /chat/bot-status/:session_id
pub async fn chat_bot_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    let is_active = state.chat().bot_status(&session_id).await;
    Json(json!({ "session_id": session_id, "is_active": is_active }))
}

/// POST /chat/bot-status
pub async fn chat_set_bot_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BotActivationRequest>,
) -> Result<Json<Value>, AppError> {
    let row = state
        .chat()
        .set_bot_status(&req.session_id, req.is_active)
        .await?;
    Ok(Json(json!({ "status": "updated", "data": row })))
}

/// POST /chat/send-advisor-message
pub async fn chat_send_advisor_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdvisorMessageRequest>,
) -> Result<Json<Value>, AppError> {
    tracing::info!(session_id = %req.session_id, "POST /chat/send-advisor-message");
    let result = state
        .chat()
        .send_advisor_message(&req.session_id, &req.message)
        .await?;
    Ok(Json(result))
}

/// POST /chat/send-media (multipart: session_id, media_type, file)
pub async fn chat_send_media(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut session_id = None;
    let mut media_type = None;
    let mut file_name = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart payload: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "session_id" => {
                session_id = Some(field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Invalid session_id field: {}", e))
                })?);
            }
            "media_type" => {
                media_type = Some(field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Invalid media_type field: {}", e))
                })?);
            }
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                if media_type.is_none() {
                    media_type = field.content_type().map(|s| s.to_string());
                }
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("Invalid file field: {}", e)))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let session_id =
        session_id.ok_or_else(|| AppError::BadRequest("Missing session_id".to_string()))?;
    let media_type =
        media_type.ok_or_else(|| AppError::BadRequest("Missing media_type".to_string()))?;
    let bytes = bytes.ok_or_else(|| AppError::BadRequest("Missing file".to_string()))?;
    let file_name = file_name.unwrap_or_else(|| "archivo".to_string());

    tracing::info!(session_id = %session_id, media_type = %media_type, size = bytes.len(),
        "POST /chat/send-media");
    let result = state
        .chat()
        .send_media(&session_id, &file_name, &media_type, bytes)
        .await?;
    Ok(Json(result))
}
