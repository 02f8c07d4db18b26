/// Unit tests for the derivation engine: timestamp normalization, calendar
/// fields, non-client detection, follow-up state and qualification tiers.
use chrono::{NaiveDate, NaiveDateTime};
use visor_api::enrichment::{
    enrich, enrich_all, follow_up_status, month_name, parse_store_timestamp, qualification_tier,
};
use visor_api::models::RawClient;

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

#[cfg(test)]
mod timestamp_tests {
    use super::*;

    #[test]
    fn test_accepted_formats() {
        let expected = at(2024, 3, 15, 14, 30);
        assert_eq!(
            parse_store_timestamp("2024-03-15 14:30:00"),
            Some(expected)
        );
        assert_eq!(
            parse_store_timestamp("2024-03-15T14:30:00"),
            Some(expected)
        );
        assert_eq!(
            parse_store_timestamp("2024-03-15T14:30:00.123456"),
            Some(at(2024, 3, 15, 14, 30) + chrono::Duration::microseconds(123456))
        );
    }

    #[test]
    fn test_offset_aware_converted_to_utc() {
        // 09:30 at -05:00 is 14:30 UTC
        assert_eq!(
            parse_store_timestamp("2024-03-15T09:30:00-05:00"),
            Some(at(2024, 3, 15, 14, 30))
        );
    }

    #[test]
    fn test_bare_date_gets_midnight() {
        assert_eq!(
            parse_store_timestamp("2024-03-15"),
            Some(at(2024, 3, 15, 0, 0))
        );
    }

    #[test]
    fn test_garbage_and_empty_become_none() {
        assert_eq!(parse_store_timestamp(""), None);
        assert_eq!(parse_store_timestamp("   "), None);
        assert_eq!(parse_store_timestamp("not a date"), None);
        assert_eq!(parse_store_timestamp("15/03/2024"), None);
    }
}

#[cfg(test)]
mod calendar_tests {
    use super::*;

    #[test]
    fn test_month_names() {
        assert_eq!(month_name(Some(1)), "Enero");
        assert_eq!(month_name(Some(12)), "Diciembre");
        assert_eq!(month_name(Some(0)), "Desconocido");
        assert_eq!(month_name(Some(13)), "Desconocido");
        assert_eq!(month_name(None), "Desconocido");
    }

    #[test]
    fn test_calendar_fields_from_first_interaction() {
        let raw = RawClient {
            primera_interaccion: Some("2024-03-15 14:30:00".to_string()),
            ..Default::default()
        };
        let enriched = enrich(raw, at(2024, 3, 20, 0, 0));
        assert_eq!(enriched.hora_contacto, Some(14));
        assert_eq!(enriched.mes_num, Some(3));
        assert_eq!(enriched.mes, "Marzo");
        assert_eq!(enriched.anio, Some(2024));
    }

    #[test]
    fn test_missing_first_interaction_leaves_calendar_empty() {
        let enriched = enrich(RawClient::default(), at(2024, 3, 20, 0, 0));
        assert_eq!(enriched.hora_contacto, None);
        assert_eq!(enriched.mes_num, None);
        assert_eq!(enriched.mes, "Desconocido");
        assert_eq!(enriched.anio, None);
    }

    #[test]
    fn test_tiene_cita_iff_cita_parses() {
        let with_cita = RawClient {
            cita: Some("2024-04-01 10:00:00".to_string()),
            ..Default::default()
        };
        let enriched = enrich(with_cita, at(2024, 3, 20, 0, 0));
        assert!(enriched.tiene_cita);
        assert_eq!(enriched.hora_cita, Some(10));

        let bad_cita = RawClient {
            cita: Some("mañana".to_string()),
            ..Default::default()
        };
        let enriched = enrich(bad_cita, at(2024, 3, 20, 0, 0));
        assert!(!enriched.tiene_cita);
        assert_eq!(enriched.hora_cita, None);
    }
}

#[cfg(test)]
mod qualification_tests {
    use super::*;

    #[test]
    fn test_appointment_beats_everything() {
        let raw = RawClient {
            planos: true,
            tiempo: Some("3 meses".to_string()),
            estilo: Some("Moderno".to_string()),
            ..Default::default()
        };
        let cita = Some(at(2024, 4, 1, 10, 0));
        assert_eq!(qualification_tier(&raw, cita), "5: Cliente Calificado");
        // Same record without the appointment drops to tier 4
        assert_eq!(qualification_tier(&raw, None), "4: Cliente Pre-Calificado");
    }

    #[test]
    fn test_tier_ladder() {
        let tiempo = RawClient {
            tiempo: Some("6 meses".to_string()),
            ..Default::default()
        };
        assert_eq!(qualification_tier(&tiempo, None), "3: Cliente Potencial");

        let interesado = RawClient {
            presupuesto: Some(50_000.0),
            ..Default::default()
        };
        assert_eq!(qualification_tier(&interesado, None), "2: Cliente Interesado");

        assert_eq!(
            qualification_tier(&RawClient::default(), None),
            "0: Sin avance"
        );
    }

    #[test]
    fn test_blank_text_does_not_qualify() {
        let raw = RawClient {
            tiempo: Some("   ".to_string()),
            estilo: Some("".to_string()),
            ..Default::default()
        };
        assert_eq!(qualification_tier(&raw, None), "0: Sin avance");
    }

    #[test]
    fn test_stored_tier_is_ignored() {
        let raw = RawClient {
            calificacion: Some("5: Cliente Calificado".to_string()),
            ..Default::default()
        };
        let enriched = enrich(raw, at(2024, 3, 20, 0, 0));
        assert_eq!(enriched.calificacion, "0: Sin avance");
    }
}

#[cfg(test)]
mod followup_tests {
    use super::*;

    #[test]
    fn test_non_client_keywords() {
        for text in ["Proveedor de muebles", "CONSULTA DE TRABAJO", "mensaje raro"] {
            let raw = RawClient {
                resumen: Some(text.to_string()),
                ..Default::default()
            };
            let enriched = enrich(raw, at(2024, 3, 20, 0, 0));
            assert!(enriched.es_no_cliente, "{} should mark a non-client", text);
            assert_eq!(enriched.seguimiento, "No Cliente");
        }

        let normal = RawClient {
            resumen: Some("Busca remodelar su cocina".to_string()),
            ..Default::default()
        };
        assert!(!enrich(normal, at(2024, 3, 20, 0, 0)).es_no_cliente);
    }

    #[test]
    fn test_con_cita_type_wins_over_followup_code() {
        let now = at(2024, 3, 20, 0, 0);
        let status = follow_up_status(
            false,
            Some("Con Cita"),
            "SI",
            Some(at(2024, 3, 19, 0, 0)),
            now,
        );
        assert_eq!(status, "Agendado");
    }

    #[test]
    fn test_thirty_day_window_boundary() {
        let now = at(2024, 3, 31, 12, 0);
        // Exactly 30 days ago still counts
        let inside = follow_up_status(false, None, "SI", Some(at(2024, 3, 1, 12, 0)), now);
        assert_eq!(inside, "Seguimiento");
        // One minute past the window does not
        let outside = follow_up_status(false, None, "SI", Some(at(2024, 3, 1, 11, 59)), now);
        assert_eq!(outside, "No Cliente");
    }

    #[test]
    fn test_code_si_without_date_is_not_followup() {
        let now = at(2024, 3, 20, 0, 0);
        assert_eq!(follow_up_status(false, None, "SI", None, now), "No Cliente");
        assert_eq!(follow_up_status(false, None, "NO", None, now), "No Cliente");
    }

    #[test]
    fn test_missing_code_defaults_to_no() {
        let raw = RawClient {
            seguimiento: None,
            ultimo_seguimiento: Some("2024-03-19 00:00:00".to_string()),
            ..Default::default()
        };
        let enriched = enrich(raw, at(2024, 3, 20, 0, 0));
        assert_eq!(enriched.seguimiento_codigo, "NO");
        assert_eq!(enriched.seguimiento, "No Cliente");
    }
}

#[test]
fn test_batch_preserves_order_and_is_deterministic() {
    let now = at(2024, 3, 20, 0, 0);
    let batch: Vec<RawClient> = (0..5)
        .map(|i| RawClient {
            nombre: Some(format!("cliente-{}", i)),
            ..Default::default()
        })
        .collect();

    let first = enrich_all(batch.clone(), now);
    let second = enrich_all(batch, now);
    for (i, (a, b)) in first.iter().zip(&second).enumerate() {
        assert_eq!(a.nombre.as_deref(), Some(format!("cliente-{}", i).as_str()));
        assert_eq!(a.calificacion, b.calificacion);
        assert_eq!(a.seguimiento, b.seguimiento);
    }
}
