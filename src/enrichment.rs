//! Derivation engine.
//!
//! Pure transformation from raw client records to enriched records: date
//! normalization, derived calendar fields, non-client detection, follow-up
//! state and the qualification tier. `now` is injected per batch so a batch
//! is internally consistent and tests can pin time; nothing here reads the
//! wall clock.

use crate::models::{EnrichedClient, RawClient};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

pub const SPANISH_MONTHS: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

/// A record whose category/style/summary text mentions any of these is not a
/// real prospect.
const NON_CLIENT_KEYWORDS: [&str; 3] = ["proveedor", "consulta de trabajo", "mensaje raro"];

/// Follow-ups older than this no longer count as active.
const FOLLOWUP_WINDOW_DAYS: i64 = 30;

/// Normalizes a stored timestamp to a timezone-naive value. Offset-aware
/// inputs are converted to UTC before the offset is dropped. Empty or
/// unparseable strings become None, never a default epoch.
pub fn parse_store_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_time(NaiveTime::MIN));
    }
    None
}

/// Spanish month name for a 1-12 month number, "Desconocido" otherwise.
pub fn month_name(mes_num: Option<u32>) -> String {
    match mes_num {
        Some(n) if (1..=12).contains(&n) => SPANISH_MONTHS[(n - 1) as usize].to_string(),
        _ => "Desconocido".to_string(),
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

/// Non-client detection over the lowercase concatenation of category, style
/// and summary.
pub fn is_non_client(raw: &RawClient) -> bool {
    let mut combined = String::new();
    for field in [&raw.categoria, &raw.estilo, &raw.resumen] {
        if let Some(text) = field {
            combined.push_str(&text.to_lowercase());
        }
    }
    NON_CLIENT_KEYWORDS.iter().any(|k| combined.contains(k))
}

/// Follow-up state machine. Rules are evaluated top-down:
/// non-client -> "No Cliente"; tipo_cliente "Con Cita" -> "Agendado";
/// code "SI" with a follow-up inside the 30-day window -> "Seguimiento";
/// anything else -> "No Cliente".
pub fn follow_up_status(
    es_no_cliente: bool,
    tipo_cliente: Option<&str>,
    codigo: &str,
    ultimo_seguimiento: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> &'static str {
    if es_no_cliente {
        return "No Cliente";
    }
    if tipo_cliente == Some("Con Cita") {
        return "Agendado";
    }
    if codigo.trim() == "SI" {
        if let Some(last) = ultimo_seguimiento {
            if now.signed_duration_since(last) <= Duration::days(FOLLOWUP_WINDOW_DAYS) {
                return "Seguimiento";
            }
        }
    }
    "No Cliente"
}

/// Six-level qualification tier; first matching rule wins, evaluated
/// top-down. Always recomputed from the current field values.
pub fn qualification_tier(raw: &RawClient, cita: Option<NaiveDateTime>) -> &'static str {
    if cita.is_some() {
        return "5: Cliente Calificado";
    }
    if raw.planos {
        return "4: Cliente Pre-Calificado";
    }
    if has_text(&raw.tiempo) {
        return "3: Cliente Potencial";
    }
    if has_text(&raw.estilo)
        || raw.presupuesto.is_some()
        || has_text(&raw.toma_decision)
        || has_text(&raw.categoria)
    {
        return "2: Cliente Interesado";
    }
    if has_text(&raw.categoria) {
        return "1: Cliente Frío";
    }
    "0: Sin avance"
}

/// Enriches one raw record. Pure function of the raw fields plus `now`.
pub fn enrich(raw: RawClient, now: NaiveDateTime) -> EnrichedClient {
    let primera = raw.primera_interaccion.as_deref().and_then(parse_store_timestamp);
    let ultima = raw.ultima_interaccion.as_deref().and_then(parse_store_timestamp);
    let cita = raw.cita.as_deref().and_then(parse_store_timestamp);
    let ultimo_seguimiento = raw
        .ultimo_seguimiento
        .as_deref()
        .and_then(parse_store_timestamp);

    let hora_contacto = primera.map(|dt| dt.time().hour());
    let mes_num = primera.map(|dt| dt.date().month());
    let anio = primera.map(|dt| dt.date().year());

    let es_no_cliente = is_non_client(&raw);
    let codigo = raw.seguimiento.clone().unwrap_or_else(|| "NO".to_string());
    let estado = follow_up_status(
        es_no_cliente,
        raw.tipo_cliente.as_deref(),
        &codigo,
        ultimo_seguimiento,
        now,
    );
    let calificacion = qualification_tier(&raw, cita);

    EnrichedClient {
        id: raw.id,
        primera_interaccion: primera,
        ultima_interaccion: ultima,
        telefono: raw.telefono,
        nombre: raw.nombre,
        categoria: raw.categoria,
        estilo: raw.estilo,
        presupuesto: raw.presupuesto,
        toma_decision: raw.toma_decision,
        tiempo: raw.tiempo,
        tiempo_meses: raw.tiempo_meses,
        planos: raw.planos,
        cita,
        resumen: raw.resumen,
        correo: raw.correo,
        ultimo_seguimiento,
        tipo_cliente: raw.tipo_cliente,
        hora_contacto,
        mes: month_name(mes_num),
        mes_num,
        anio,
        tiene_cita: cita.is_some(),
        hora_cita: cita.map(|dt| dt.time().hour()),
        es_no_cliente,
        seguimiento_codigo: codigo,
        seguimiento: estado.to_string(),
        calificacion: calificacion.to_string(),
    }
}

/// Enriches a batch, preserving input order. `now` is evaluated once by the
/// caller for the whole batch.
pub fn enrich_all(records: Vec<RawClient>, now: NaiveDateTime) -> Vec<EnrichedClient> {
    records.into_iter().map(|raw| enrich(raw, now)).collect()
}
