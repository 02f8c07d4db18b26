use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Accepts a number, a numeric string, or null; anything else becomes None.
/// The store stores several numeric columns as free text.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }))
}

/// Accepts a bool, a number, or a string. Null, empty strings and the usual
/// negative spellings are false; any other non-empty value is true.
pub fn lenient_truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => {
            let t = s.trim().to_lowercase();
            !(t.is_empty() || t == "false" || t == "no" || t == "0")
        }
        _ => false,
    })
}

/// Accepts a UTC-aware timestamp string (RFC 3339) or a naive one assumed
/// UTC; null or unparseable becomes None.
pub fn lenient_utc<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(parse_utc_timestamp))
}

pub fn parse_utc_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    crate::enrichment::parse_store_timestamp(s).map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// One client record as received from the store. Timestamp columns arrive as
/// free-form strings and are normalized by the derivation engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawClient {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub primera_interaccion: Option<String>,
    #[serde(default)]
    pub ultima_interaccion: Option<String>,
    #[serde(default)]
    pub telefono: Option<String>,
    #[serde(default)]
    pub nombre: Option<String>,
    #[serde(default)]
    pub categoria: Option<String>,
    #[serde(default)]
    pub estilo: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub presupuesto: Option<f64>,
    #[serde(default)]
    pub toma_decision: Option<String>,
    #[serde(default)]
    pub tiempo: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub tiempo_meses: Option<f64>,
    #[serde(default, deserialize_with = "lenient_truthy")]
    pub planos: bool,
    #[serde(default)]
    pub cita: Option<String>,
    #[serde(default)]
    pub calificacion: Option<String>,
    #[serde(default)]
    pub resumen: Option<String>,
    #[serde(default)]
    pub correo: Option<String>,
    /// Raw follow-up code ("SI"/"NO"); absent is treated as "NO".
    #[serde(default)]
    pub seguimiento: Option<String>,
    #[serde(default)]
    pub ultimo_seguimiento: Option<String>,
    #[serde(default)]
    pub tipo_cliente: Option<String>,
}

/// A client record after derivation. Qualification tier and follow-up status
/// are always recomputed; they are never trusted from storage.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedClient {
    pub id: Option<Value>,
    pub primera_interaccion: Option<NaiveDateTime>,
    pub ultima_interaccion: Option<NaiveDateTime>,
    pub telefono: Option<String>,
    pub nombre: Option<String>,
    pub categoria: Option<String>,
    pub estilo: Option<String>,
    pub presupuesto: Option<f64>,
    pub toma_decision: Option<String>,
    pub tiempo: Option<String>,
    pub tiempo_meses: Option<f64>,
    pub planos: bool,
    pub cita: Option<NaiveDateTime>,
    pub resumen: Option<String>,
    pub correo: Option<String>,
    pub ultimo_seguimiento: Option<NaiveDateTime>,
    pub tipo_cliente: Option<String>,
    // Derived calendar fields (source timezone)
    pub hora_contacto: Option<u32>,
    pub mes_num: Option<u32>,
    pub mes: String,
    #[serde(rename = "año")]
    pub anio: Option<i32>,
    pub tiene_cita: bool,
    pub hora_cita: Option<u32>,
    // Derived classification fields
    pub es_no_cliente: bool,
    /// Raw follow-up code, kept for the follow-up success metric.
    pub seguimiento_codigo: String,
    /// Derived follow-up state: "No Cliente" | "Agendado" | "Seguimiento".
    pub seguimiento: String,
    /// Recomputed qualification tier, "0: Sin avance" .. "5: Cliente Calificado".
    pub calificacion: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub total: usize,
    pub con_cita: usize,
    pub sin_cita: usize,
}

/// Fixed envelope for paginated client listings; identical on both
/// pagination paths.
#[derive(Debug, Serialize)]
pub struct PageEnvelope {
    pub total: usize,
    pub data: Vec<EnrichedClient>,
    pub page: usize,
    pub size: usize,
    pub total_pages: usize,
    pub current_page_count: usize,
    pub client_stats: ClientStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummaryMetrics {
    pub total_clientes: usize,
    pub con_cita: usize,
    pub sin_cita: usize,
    pub con_estilo: usize,
    pub calificados: usize,
    pub seguimiento: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FollowupSummary {
    pub followup_success: usize,
    pub no_followup: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct HourCount {
    pub hour: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct DurationBucket {
    pub meses: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResponseTimes {
    pub promedio_dias: f64,
    pub mediana_dias: f64,
}

/// Quotation projection used by the metrics pipeline. Numeric columns are
/// coerced leniently; invalid values become null and are excluded from
/// sums/means/percentiles.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotationRow {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_utc")]
    pub fecha_hora: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_utc")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub precio_final: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub area_m2: Option<f64>,
    #[serde(default)]
    pub estilo: Option<String>,
    #[serde(default)]
    pub distrito: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuoteSummary {
    pub total_cotizaciones: usize,
    pub suma_precio: f64,
    pub ticket_promedio: f64,
    pub m2_promedio: f64,
}

/// One point of the month-bucketed series; `x` is a "YYYY-MM" label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub x: String,
    pub total: usize,
    pub suma_precio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledAgg {
    pub label: String,
    pub total: usize,
    pub suma_precio: f64,
    pub promedio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBin {
    pub from: f64,
    pub to: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistogramResponse {
    pub total_samples: usize,
    pub clipped: bool,
    pub bin_width: f64,
    pub mean: f64,
    pub median: f64,
    pub bins: Vec<HistogramBin>,
}

#[derive(Debug, Serialize)]
pub struct QuoteListResponse {
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub data: Vec<Value>,
}

// Chat relay payloads

#[derive(Debug, Deserialize)]
pub struct BotActivationRequest {
    pub session_id: String,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct AdvisorMessageRequest {
    pub session_id: String,
    pub message: String,
}
