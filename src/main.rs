use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use visor_api::config::Config;
use visor_api::handlers::{self, AppState};
use visor_api::polling;
use visor_api::store::StoreClient;
use visor_api::whatsapp::WhatsAppClient;

/// Body cap for the media relay; the WhatsApp document limit plus headroom.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the record store adapter and the
/// optional WhatsApp relay, then serves the Axum router.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "visor_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    let store = StoreClient::new(config.store_url.clone(), config.store_key.clone())?;
    tracing::info!("Record store adapter initialized: {}", config.store_url);

    // The relay is optional; chat send endpoints refuse when it is absent.
    let whatsapp = match (&config.whatsapp_api_url, &config.whatsapp_token) {
        (Some(url), Some(token)) => match WhatsAppClient::new(url.clone(), token.clone()) {
            Ok(client) => {
                tracing::info!("WhatsApp relay initialized: {}", url);
                Some(client)
            }
            Err(e) => {
                tracing::error!("Failed to initialize WhatsApp relay: {}", e);
                None
            }
        },
        _ => {
            tracing::info!("WhatsApp relay not configured");
            None
        }
    };

    if let Some(interval) = config.poll_interval_secs {
        polling::spawn(store.clone(), interval);
    }

    let app_state = Arc::new(AppState {
        store,
        config: config.clone(),
        whatsapp,
    });

    // Rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    let protected_routes = Router::new()
        // Client listings
        .route("/table-data/clients", get(handlers::table_data_clients))
        .route("/table-data/metrics", get(handlers::table_data_metrics))
        .route("/table-data/charts", get(handlers::table_data_charts))
        .route("/clients/", get(handlers::clients_index))
        .route("/clients/count", get(handlers::clients_count))
        // Dashboard
        .route("/dashboard/metrics", get(handlers::dashboard_metrics))
        .route(
            "/dashboard/distribution",
            get(handlers::dashboard_distribution),
        )
        .route("/dashboard/filtered", post(handlers::dashboard_filtered))
        .route("/dashboard/followup", get(handlers::dashboard_followup))
        .route(
            "/dashboard/appointment-hours",
            get(handlers::dashboard_appointment_hours),
        )
        .route(
            "/dashboard/project-duration",
            get(handlers::dashboard_project_duration),
        )
        .route("/dashboard/cross", post(handlers::dashboard_cross))
        .route(
            "/dashboard/new-this-month",
            get(handlers::dashboard_new_this_month),
        )
        .route(
            "/dashboard/response-times",
            get(handlers::dashboard_response_times),
        )
        .route(
            "/dashboard/qualification-distribution",
            get(handlers::dashboard_qualification_distribution),
        )
        // Quotations
        .route("/cotizaciones/", get(handlers::quotes_list))
        .route("/cotizaciones/test/last5", get(handlers::quotes_last_five))
        .route(
            "/cotizaciones/metrics/summary",
            get(handlers::quotes_summary),
        )
        .route(
            "/cotizaciones/metrics/series/monthly",
            get(handlers::quotes_monthly_series),
        )
        .route(
            "/cotizaciones/metrics/top/estilo",
            get(handlers::quotes_top_estilo),
        )
        .route(
            "/cotizaciones/metrics/top/distrito",
            get(handlers::quotes_top_distrito),
        )
        .route(
            "/cotizaciones/metrics/histogram",
            get(handlers::quotes_histogram),
        )
        // Chat relay
        .route("/chat/conversation", get(handlers::chat_conversations))
        .route("/chat/messages/:session_id", get(handlers::chat_messages))
        .route("/chat/updates", get(handlers::chat_updates))
        .route(
            "/chat/bot-status/:session_id",
            get(handlers::chat_bot_status),
        )
        .route("/chat/bot-status", post(handlers::chat_set_bot_status))
        .route(
            "/chat/send-advisor-message",
            post(handlers::chat_send_advisor_message),
        )
        .route("/chat/send-media", post(handlers::chat_send_media))
        .layer(
            ServiceBuilder::new()
                // Request size limit covering the media relay payloads
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
