//! Aggregation engine.
//!
//! Pure functions over enriched client collections: counts, distributions,
//! cross-tabulations and numeric summaries. Grouping is explicit
//! mapping-based reduction; the volumes involved (thousands of rows) need
//! correctness, not a columnar engine. Empty input always yields the
//! documented empty/zero shape.

use crate::models::{
    ClientStats, DurationBucket, EnrichedClient, FollowupSummary, HourCount, ResponseTimes,
    SummaryMetrics,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Columns the distribution/crosstab operations understand. An unknown
/// column yields an empty mapping, mirroring the store's sparse schema.
const KNOWN_COLUMNS: [&str; 13] = [
    "categoria",
    "estilo",
    "nombre",
    "telefono",
    "correo",
    "tiempo",
    "toma_decision",
    "tipo_cliente",
    "mes",
    "año",
    "anio",
    "calificacion",
    "seguimiento",
];

fn is_known_column(column: &str) -> bool {
    KNOWN_COLUMNS.contains(&column)
}

/// Value of a known column for one row; None when the row has no value.
fn column_value(row: &EnrichedClient, column: &str) -> Option<String> {
    match column {
        "categoria" => row.categoria.clone(),
        "estilo" => row.estilo.clone(),
        "nombre" => row.nombre.clone(),
        "telefono" => row.telefono.clone(),
        "correo" => row.correo.clone(),
        "tiempo" => row.tiempo.clone(),
        "toma_decision" => row.toma_decision.clone(),
        "tipo_cliente" => row.tipo_cliente.clone(),
        "mes" => Some(row.mes.clone()),
        "año" | "anio" => row.anio.map(|y| y.to_string()),
        "calificacion" => Some(row.calificacion.clone()),
        "seguimiento" => Some(row.seguimiento.clone()),
        _ => None,
    }
}

pub fn client_counts(rows: &[EnrichedClient]) -> ClientStats {
    let con_cita = rows.iter().filter(|r| r.tiene_cita).count();
    ClientStats {
        total: rows.len(),
        con_cita,
        sin_cita: rows.len() - con_cita,
    }
}

pub fn metrics_summary(rows: &[EnrichedClient]) -> SummaryMetrics {
    let counts = client_counts(rows);
    SummaryMetrics {
        total_clientes: counts.total,
        con_cita: counts.con_cita,
        sin_cita: counts.sin_cita,
        con_estilo: rows
            .iter()
            .filter(|r| r.estilo.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false))
            .count(),
        calificados: rows
            .iter()
            .filter(|r| !r.calificacion.starts_with("0:"))
            .count(),
        seguimiento: rows.iter().filter(|r| r.seguimiento == "Seguimiento").count(),
    }
}

/// Value-count distribution over a single column. Missing or unknown column
/// yields an empty mapping; null values are not counted.
pub fn value_distribution(rows: &[EnrichedClient], column: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    if !is_known_column(column) {
        return counts;
    }
    for row in rows {
        if let Some(value) = column_value(row, column) {
            *counts.entry(value).or_insert(0) += 1;
        }
    }
    counts
}

/// Cross-tabulation of two columns; missing either column yields an empty
/// mapping.
pub fn cross_distribution(
    rows: &[EnrichedClient],
    col1: &str,
    col2: &str,
) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut table: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    if !is_known_column(col1) || !is_known_column(col2) {
        return table;
    }
    for row in rows {
        let (Some(a), Some(b)) = (column_value(row, col1), column_value(row, col2)) else {
            continue;
        };
        *table.entry(a).or_default().entry(b).or_insert(0) += 1;
    }
    table
}

/// Source-to-local hour shift; always in [0, 23].
pub fn shift_hour(hour: u32, tz_offset_hours: i32) -> u32 {
    (hour as i32 + tz_offset_hours).rem_euclid(24) as u32
}

/// Contact-hour distribution in local time, sorted by hour ascending.
pub fn contact_hour_distribution(
    rows: &[EnrichedClient],
    tz_offset_hours: i32,
) -> BTreeMap<u32, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        if let Some(h) = row.hora_contacto {
            *counts.entry(shift_hour(h, tz_offset_hours)).or_insert(0) += 1;
        }
    }
    counts
}

/// Appointment-hour distribution in local time, restricted to rows with an
/// appointment. The output always contains all 24 hour buckets, sorted.
pub fn appointment_hours_distribution(
    rows: &[EnrichedClient],
    tz_offset_hours: i32,
) -> Vec<HourCount> {
    let mut counts = [0usize; 24];
    for row in rows.iter().filter(|r| r.tiene_cita) {
        if let Some(h) = row.hora_cita {
            counts[shift_hour(h, tz_offset_hours) as usize] += 1;
        }
    }
    (0..24)
        .map(|hour| HourCount {
            hour,
            count: counts[hour as usize],
        })
        .collect()
}

fn opt_text(value: &Option<String>) -> Value {
    value.as_deref().map(Value::from).unwrap_or(Value::Null)
}

/// Groups records by qualification tier with a null-safe member projection.
pub fn clients_by_qualification(rows: &[EnrichedClient]) -> Value {
    let mut groups: BTreeMap<String, Vec<&EnrichedClient>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.calificacion.clone()).or_default().push(row);
    }

    let mut by_tier = serde_json::Map::new();
    for (tier, members) in &groups {
        let clientes: Vec<Value> = members
            .iter()
            .map(|c| {
                json!({
                    "nombre": opt_text(&c.nombre),
                    "categoria": opt_text(&c.categoria),
                    "estilo": opt_text(&c.estilo),
                    "presupuesto": c.presupuesto,
                    "toma_decision": opt_text(&c.toma_decision),
                    "tiempo": opt_text(&c.tiempo),
                    "tiempo_meses": c.tiempo_meses,
                })
            })
            .collect();
        by_tier.insert(
            tier.clone(),
            json!({ "count": members.len(), "clientes": clientes }),
        );
    }

    json!({
        "total_clients": rows.len(),
        "clients_by_qualification": by_tier,
    })
}

/// Among rows with an appointment, counts follow-up code "SI"
/// (case-insensitive) vs not.
pub fn followup_success(rows: &[EnrichedClient]) -> FollowupSummary {
    let mut summary = FollowupSummary::default();
    for row in rows.iter().filter(|r| r.cita.is_some()) {
        if row.seguimiento_codigo.trim().eq_ignore_ascii_case("SI") {
            summary.followup_success += 1;
        } else {
            summary.no_followup += 1;
        }
    }
    summary
}

/// Counts clients whose first contact, shifted to local time, falls in the
/// current local month/year.
pub fn new_clients_this_month(
    rows: &[EnrichedClient],
    tz_offset_hours: i32,
    now: DateTime<Utc>,
) -> usize {
    let shift = Duration::hours(tz_offset_hours as i64);
    let local_now = now.naive_utc() + shift;
    rows.iter()
        .filter_map(|r| r.primera_interaccion)
        .map(|p| p + shift)
        .filter(|p| p.month() == local_now.month() && p.year() == local_now.year())
        .count()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of an already sorted slice.
pub fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Mean and median of (last contact - first contact) in days, over rows
/// where both timestamps are present.
pub fn response_time_stats(rows: &[EnrichedClient]) -> ResponseTimes {
    let mut days: Vec<f64> = rows
        .iter()
        .filter_map(|r| match (r.primera_interaccion, r.ultima_interaccion) {
            (Some(first), Some(last)) => {
                Some(last.signed_duration_since(first).num_seconds() as f64 / 86_400.0)
            }
            _ => None,
        })
        .collect();
    if days.is_empty() {
        return ResponseTimes::default();
    }
    days.sort_by(f64::total_cmp);
    ResponseTimes {
        promedio_dias: round2(mean(&days)),
        mediana_dias: round2(median_sorted(&days)),
    }
}

/// Project-duration distribution over tiempo_meses, ascending by duration.
pub fn project_duration_distribution(rows: &[EnrichedClient]) -> Vec<DurationBucket> {
    let mut counts: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for row in rows {
        if let Some(meses) = row.tiempo_meses {
            // Key on tenths of a month so .5 durations stay distinct.
            let key = (meses * 10.0).round() as i64;
            let entry = counts.entry(key).or_insert((meses, 0));
            entry.1 += 1;
        }
    }
    counts
        .into_values()
        .map(|(meses, count)| DurationBucket { meses, count })
        .collect()
}
