//! Filter engine for fields that only exist after derivation.
//!
//! A closed set of optional filters with documented no-op semantics: unset or
//! "Todos" values do nothing, an empty filter set is the identity, and
//! relative record order is always preserved.

use crate::enrichment::SPANISH_MONTHS;
use crate::models::EnrichedClient;
use serde::Deserialize;

/// Canonical Spanish month name to its 1-12 number.
pub fn month_number(name: &str) -> Option<u32> {
    SPANISH_MONTHS
        .iter()
        .position(|m| *m == name)
        .map(|i| (i + 1) as u32)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DerivedFilters {
    /// Canonical Spanish month name, a raw month number, or "Todos".
    pub mes: Option<String>,
    /// Year as digits; non-numeric values are ignored, not errors.
    #[serde(rename = "año", alias = "anio")]
    pub anio: Option<String>,
    /// "Con cita" | "Sin cita" | "Todos".
    pub tipo_cliente: Option<String>,
    /// Derived follow-up state.
    pub seguimiento: Option<String>,
    /// Full qualification tier label.
    pub calificacion: Option<String>,
    /// Qualification tier number, 0-5.
    pub calificacion_nivel: Option<String>,
}

fn is_set(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some(v) if !v.trim().is_empty() && v != "Todos")
}

impl DerivedFilters {
    /// True when no derived filter is active; this is the capability test
    /// that selects the fast pagination path.
    pub fn is_empty(&self) -> bool {
        !is_set(&self.mes)
            && !is_set(&self.anio)
            && !is_set(&self.tipo_cliente)
            && !is_set(&self.seguimiento)
            && !is_set(&self.calificacion)
            && !is_set(&self.calificacion_nivel)
    }

    fn matches(&self, row: &EnrichedClient) -> bool {
        if let Some(mes) = self.mes.as_deref().filter(|_| is_set(&self.mes)) {
            let ok = if let Some(n) = month_number(mes) {
                row.mes_num == Some(n)
            } else if let Ok(n) = mes.parse::<u32>() {
                row.mes_num == Some(n)
            } else {
                row.mes == mes
            };
            if !ok {
                return false;
            }
        }

        if let Some(anio) = self.anio.as_deref().filter(|_| is_set(&self.anio)) {
            // Non-numeric year values are a no-op.
            if let Ok(year) = anio.parse::<i32>() {
                if row.anio != Some(year) {
                    return false;
                }
            }
        }

        if let Some(tipo) = self.tipo_cliente.as_deref().filter(|_| is_set(&self.tipo_cliente)) {
            match tipo {
                "Con cita" => {
                    if !row.tiene_cita {
                        return false;
                    }
                }
                "Sin cita" => {
                    if row.tiene_cita {
                        return false;
                    }
                }
                _ => {}
            }
        }

        if let Some(estado) = self.seguimiento.as_deref().filter(|_| is_set(&self.seguimiento)) {
            if row.seguimiento != estado {
                return false;
            }
        }

        if let Some(label) = self.calificacion.as_deref().filter(|_| is_set(&self.calificacion)) {
            if row.calificacion != label {
                return false;
            }
        }

        if let Some(nivel) = self
            .calificacion_nivel
            .as_deref()
            .filter(|_| is_set(&self.calificacion_nivel))
        {
            // Tier labels are "N: ..."; a non-numeric level is a no-op.
            if nivel.trim().parse::<u8>().is_ok()
                && !row.calificacion.starts_with(&format!("{}:", nivel.trim()))
            {
                return false;
            }
        }

        true
    }

    /// Applies the filter set, preserving relative order. The empty set is
    /// the identity.
    pub fn apply(&self, rows: &[EnrichedClient]) -> Vec<EnrichedClient> {
        if self.is_empty() {
            return rows.to_vec();
        }
        rows.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::enrich;
    use crate::models::RawClient;
    use chrono::NaiveDate;

    fn client(primera: &str, cita: Option<&str>) -> EnrichedClient {
        let raw = RawClient {
            primera_interaccion: Some(primera.to_string()),
            cita: cita.map(|s| s.to_string()),
            ..Default::default()
        };
        let now = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        enrich(raw, now)
    }

    #[test]
    fn test_month_number() {
        assert_eq!(month_number("Enero"), Some(1));
        assert_eq!(month_number("Diciembre"), Some(12));
        assert_eq!(month_number("enero"), None);
    }

    #[test]
    fn test_month_accepts_name_and_number() {
        let rows = vec![
            client("2024-03-10 10:00:00", None),
            client("2024-04-10 10:00:00", None),
        ];
        let by_name = DerivedFilters {
            mes: Some("Marzo".to_string()),
            ..Default::default()
        };
        assert_eq!(by_name.apply(&rows).len(), 1);
        let by_number = DerivedFilters {
            mes: Some("3".to_string()),
            ..Default::default()
        };
        assert_eq!(by_number.apply(&rows).len(), 1);
    }

    #[test]
    fn test_todos_and_blank_are_no_ops() {
        let filters = DerivedFilters {
            mes: Some("Todos".to_string()),
            anio: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(filters.is_empty());
        let rows = vec![client("2024-03-10 10:00:00", None)];
        assert_eq!(filters.apply(&rows).len(), 1);
    }

    #[test]
    fn test_non_numeric_year_is_ignored() {
        let filters = DerivedFilters {
            anio: Some("dos mil".to_string()),
            ..Default::default()
        };
        let rows = vec![client("2024-03-10 10:00:00", None)];
        assert_eq!(filters.apply(&rows).len(), 1);
    }

    #[test]
    fn test_appointment_filter() {
        let rows = vec![
            client("2024-03-10 10:00:00", Some("2024-03-20 09:00:00")),
            client("2024-03-11 10:00:00", None),
        ];
        let con = DerivedFilters {
            tipo_cliente: Some("Con cita".to_string()),
            ..Default::default()
        };
        let sin = DerivedFilters {
            tipo_cliente: Some("Sin cita".to_string()),
            ..Default::default()
        };
        assert_eq!(con.apply(&rows).len(), 1);
        assert!(con.apply(&rows)[0].tiene_cita);
        assert_eq!(sin.apply(&rows).len(), 1);
    }

    #[test]
    fn test_tier_level_prefix_match() {
        let rows = vec![
            client("2024-03-10 10:00:00", Some("2024-03-20 09:00:00")), // tier 5
            client("2024-03-11 10:00:00", None),                        // tier 0
        ];
        let filters = DerivedFilters {
            calificacion_nivel: Some("5".to_string()),
            ..Default::default()
        };
        let matched = filters.apply(&rows);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].calificacion, "5: Cliente Calificado");
    }
}
