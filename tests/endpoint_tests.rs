/// Handler-level tests for the small JSON endpoints, against a mocked store.
use axum::extract::State;
use serde_json::json;
use std::sync::Arc;
use visor_api::config::Config;
use visor_api::handlers::{self, AppState};
use visor_api::store::StoreClient;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn state_for(server: &MockServer) -> Arc<AppState> {
    let store = StoreClient::new(server.uri(), "test_key".to_string()).unwrap();
    Arc::new(AppState {
        store,
        config: Config {
            store_url: server.uri(),
            store_key: "test_key".to_string(),
            port: 0,
            whatsapp_api_url: None,
            whatsapp_token: None,
            tz_offset_hours: -5,
            poll_interval_secs: None,
        },
        whatsapp: None,
    })
}

#[tokio::test]
async fn test_clients_count_uses_total_key() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/clients_pravi"))
        .and(query_param("limit", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Range", "0-0/42")
                .set_body_json(json!([{ "id": 1 }])),
        )
        .mount(&mock_server)
        .await;

    let axum::Json(body) = handlers::clients_count(State(state_for(&mock_server)))
        .await
        .unwrap();

    assert_eq!(body, json!({ "total": 42 }));
}

#[tokio::test]
async fn test_table_data_metrics_previews_first_rows() {
    let mock_server = MockServer::start().await;

    let rows: Vec<_> = (1..=8).map(|i| json!({ "id": i })).collect();
    Mock::given(method("GET"))
        .and(path("/rest/v1/clients_pravi"))
        .and(query_param("limit", "50"))
        .and(query_param("order", "ultima_interaccion.desc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&rows))
        .mount(&mock_server)
        .await;

    let axum::Json(body) = handlers::table_data_metrics(State(state_for(&mock_server)))
        .await
        .unwrap();

    assert_eq!(body["total"], 8);
    let preview = body["preview"].as_array().unwrap();
    assert_eq!(preview.len(), 5);
    assert_eq!(preview[0]["id"], 1);
    assert_eq!(preview[4]["id"], 5);
}

#[tokio::test]
async fn test_table_data_charts_counts_styles_with_fallback() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/clients_pravi"))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "estilo": "Moderno" },
            { "id": 2, "estilo": "Moderno" },
            { "id": 3, "estilo": "Clásico" },
            { "id": 4, "estilo": null },
            { "id": 5 }
        ])))
        .mount(&mock_server)
        .await;

    let axum::Json(body) = handlers::table_data_charts(State(state_for(&mock_server)))
        .await
        .unwrap();

    assert_eq!(
        body["estilo"],
        json!({ "Moderno": 2, "Clásico": 1, "Desconocido": 2 })
    );
}
