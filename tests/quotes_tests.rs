/// Unit tests for the quotation metrics engine's pure core, plus one mocked
/// listing round against the store.
use chrono::NaiveDate;
use serde_json::json;
use visor_api::models::QuotationRow;
use visor_api::quotes::{
    build_histogram, month_utc_bounds, months_back_labels, percentile, quote_summary, top_groups,
    GroupKey, QuoteService,
};
use visor_api::store::StoreClient;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn row(precio: Option<f64>, area: Option<f64>, estilo: Option<&str>) -> QuotationRow {
    QuotationRow {
        precio_final: precio,
        area_m2: area,
        estilo: estilo.map(|s| s.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod calendar_tests {
    use super::*;

    #[test]
    fn test_months_back_crosses_year_boundary() {
        let anchor = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(
            months_back_labels(anchor, 3),
            vec![(2024, 1), (2024, 2), (2024, 3)]
        );
        assert_eq!(
            months_back_labels(anchor, 5),
            vec![(2023, 11), (2023, 12), (2024, 1), (2024, 2), (2024, 3)]
        );
    }

    #[test]
    fn test_month_bounds_shift_to_utc() {
        // Local March at -05:00 starts at 05:00 UTC on March 1
        let (start, end) = month_utc_bounds(2024, 3, -5).unwrap();
        assert_eq!(start.to_rfc3339(), "2024-03-01T05:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-04-01T05:00:00+00:00");
    }

    #[test]
    fn test_december_wraps_into_next_year() {
        let (start, end) = month_utc_bounds(2023, 12, 0).unwrap();
        assert_eq!(start.to_rfc3339(), "2023-12-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_invalid_month_is_rejected() {
        assert!(month_utc_bounds(2024, 13, -5).is_err());
    }
}

#[cfg(test)]
mod summary_tests {
    use super::*;

    #[test]
    fn test_summary_treats_null_price_as_zero() {
        let rows = vec![
            row(Some(1000.0), Some(80.0), None),
            row(None, Some(120.0), None),
            row(Some(3000.0), None, None),
        ];
        let summary = quote_summary(&rows);
        assert_eq!(summary.total_cotizaciones, 3);
        assert_eq!(summary.suma_precio, 4000.0);
        // Ticket averages over all rows, nulls included as zero
        assert!((summary.ticket_promedio - 4000.0 / 3.0).abs() < 1e-9);
        // Area averages only over non-null areas
        assert_eq!(summary.m2_promedio, 100.0);
    }

    #[test]
    fn test_empty_summary_is_zeroed() {
        let summary = quote_summary(&[]);
        assert_eq!(summary.total_cotizaciones, 0);
        assert_eq!(summary.suma_precio, 0.0);
        assert_eq!(summary.ticket_promedio, 0.0);
    }
}

#[cfg(test)]
mod grouping_tests {
    use super::*;

    #[test]
    fn test_top_groups_sorted_by_sum_and_truncated() {
        let rows = vec![
            row(Some(100.0), None, Some("Moderno")),
            row(Some(200.0), None, Some("Moderno")),
            row(Some(1000.0), None, Some("Clásico")),
            row(Some(50.0), None, Some("Rústico")),
        ];
        let top = top_groups(&rows, GroupKey::Estilo, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].label, "Clásico");
        assert_eq!(top[0].suma_precio, 1000.0);
        assert_eq!(top[1].label, "Moderno");
        assert_eq!(top[1].total, 2);
        assert_eq!(top[1].promedio, 150.0);
    }

    #[test]
    fn test_null_key_gets_placeholder_label() {
        let rows = vec![row(Some(100.0), None, None), row(None, None, Some("  "))];
        let top = top_groups(&rows, GroupKey::Estilo, 10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].label, "—");
        assert_eq!(top[0].total, 2);
        // Null price contributes to count but not to the mean
        assert_eq!(top[0].promedio, 100.0);
    }
}

#[cfg(test)]
mod histogram_tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates_linearly() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 100.0), 100.0);
        assert!((percentile(&sorted, 50.0) - 50.5).abs() < 1e-9);
        assert!((percentile(&sorted, 1.0) - 1.99).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_sample_fills_even_buckets() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        let hist = build_histogram(values, 10.0, false);
        assert_eq!(hist.total_samples, 100);
        assert!(!hist.clipped);
        assert_eq!(hist.bins.len(), 10);
        for bin in &hist.bins {
            assert_eq!(bin.count, 10);
        }
        assert!((hist.mean - 50.5).abs() < 1e-9);
        assert!((hist.median - 50.5).abs() < 1e-9);
        // Bucket membership is (left, right]
        assert_eq!(hist.bins[0].from, 0.0);
        assert_eq!(hist.bins[0].to, 10.0);
    }

    #[test]
    fn test_clipping_drops_tails_with_enough_samples() {
        let mut values: Vec<f64> = (1..=100).map(f64::from).collect();
        values.push(1_000_000.0);
        let hist = build_histogram(values, 10.0, true);
        assert!(hist.clipped);
        // The outlier falls above p99 and is gone
        assert!(hist.total_samples < 101);
        assert!(hist.bins.last().unwrap().to < 1_000_000.0);
    }

    #[test]
    fn test_small_samples_are_never_clipped() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let hist = build_histogram(values, 5.0, true);
        assert!(!hist.clipped);
        assert_eq!(hist.total_samples, 10);
    }

    #[test]
    fn test_empty_and_bad_bin_yield_empty_response() {
        assert_eq!(build_histogram(Vec::new(), 10.0, false).total_samples, 0);
        assert!(build_histogram(vec![1.0, 2.0], 0.0, false).bins.is_empty());
    }
}

#[tokio::test]
async fn test_listing_search_renders_or_filter() {
    let mock_server = MockServer::start().await;

    // Count request with the OR search in place
    Mock::given(method("GET"))
        .and(path("/rest/v1/cotizaciones"))
        .and(query_param("limit", "1"))
        .and(query_param(
            "or",
            "(nombre.ilike.*ana*,telefono.ilike.*ana*,correo.ilike.*ana*,\
proyecto.ilike.*ana*,estilo.ilike.*ana*,distrito.ilike.*ana*)",
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Range", "0-0/2")
                .set_body_json(json!([{ "id": 1 }])),
        )
        .mount(&mock_server)
        .await;

    // Page fetch with an unknown sort key falling back to fecha_hora
    Mock::given(method("GET"))
        .and(path("/rest/v1/cotizaciones"))
        .and(query_param("limit", "20"))
        .and(query_param("order", "fecha_hora.desc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "id": 1, "nombre": "Ana" }, { "id": 2 }])),
        )
        .mount(&mock_server)
        .await;

    let store = StoreClient::new(mock_server.uri(), "test_key".to_string()).unwrap();
    let listing = QuoteService::new(store, -5)
        .list(1, 20, Some("ana"), "drop table", "desc")
        .await
        .unwrap();

    assert_eq!(listing.total, 2);
    assert_eq!(listing.page, 1);
    assert_eq!(listing.data.len(), 2);
}

#[tokio::test]
async fn test_last_five_fetches_thin_recent_projection() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/cotizaciones"))
        .and(query_param(
            "select",
            "created_at,fecha_hora,nombre,telefono",
        ))
        .and(query_param("order", "fecha_hora.desc"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "created_at": "2024-03-02T10:00:00", "fecha_hora": "2024-03-02T12:00:00",
              "nombre": "Ana", "telefono": "999" },
            { "created_at": "2024-03-01T09:00:00", "fecha_hora": "2024-03-01T11:00:00",
              "nombre": "Luis", "telefono": "888" }
        ])))
        .mount(&mock_server)
        .await;

    let store = StoreClient::new(mock_server.uri(), "test_key".to_string()).unwrap();
    let rows = QuoteService::new(store, -5).last_five().await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["nombre"], "Ana");
    assert_eq!(rows[1]["telefono"], "888");
}
