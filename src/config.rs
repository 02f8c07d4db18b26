use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the hosted record store (PostgREST style API).
    pub store_url: String,
    /// API key for the record store (sent as apikey + bearer token).
    pub store_key: String,
    pub port: u16,
    /// WhatsApp Business API base URL; chat relay refuses sends when unset.
    pub whatsapp_api_url: Option<String>,
    pub whatsapp_token: Option<String>,
    /// Local-time shift in whole hours applied to stored UTC timestamps
    /// (default -5, Lima; the region has no DST).
    pub tz_offset_hours: i32,
    /// Background poll interval; polling is disabled when unset.
    pub poll_interval_secs: Option<u64>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            store_url: std::env::var("STORE_URL")
                .or_else(|_| std::env::var("SUPABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("STORE_URL or SUPABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("STORE_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("STORE_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })?,
            store_key: std::env::var("STORE_KEY")
                .or_else(|_| std::env::var("SUPABASE_KEY"))
                .map_err(|_| {
                    anyhow::anyhow!("STORE_KEY or SUPABASE_KEY environment variable required")
                })
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("STORE_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            whatsapp_api_url: std::env::var("WHATSAPP_API_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| url.trim_end_matches('/').to_string()),
            whatsapp_token: std::env::var("WHATSAPP_ACCESS_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            tz_offset_hours: std::env::var("TZ_OFFSET_HOURS")
                .unwrap_or_else(|_| "-5".to_string())
                .parse::<i32>()
                .map_err(|_| anyhow::anyhow!("TZ_OFFSET_HOURS must be an integer"))
                .and_then(|h| {
                    if !(-23..=23).contains(&h) {
                        anyhow::bail!("TZ_OFFSET_HOURS must be between -23 and 23");
                    }
                    Ok(h)
                })?,
            poll_interval_secs: match std::env::var("POLL_INTERVAL_SECS") {
                Ok(v) if !v.trim().is_empty() => Some(
                    v.parse::<u64>()
                        .map_err(|_| anyhow::anyhow!("POLL_INTERVAL_SECS must be an integer"))?,
                ),
                _ => None,
            },
        };

        if config.whatsapp_api_url.is_some() != config.whatsapp_token.is_some() {
            anyhow::bail!(
                "WHATSAPP_API_URL and WHATSAPP_ACCESS_TOKEN must be set together or not at all"
            );
        }

        // Log configuration details (without sensitive values)
        tracing::debug!(
            "Store URL: {}...",
            &config.store_url[..24.min(config.store_url.len())]
        );
        if let Some(ref wa) = config.whatsapp_api_url {
            tracing::info!("WhatsApp relay configured: {}", wa);
        } else {
            tracing::info!("WhatsApp relay not configured; chat sends disabled");
        }
        tracing::debug!("Local offset: {}h", config.tz_offset_hours);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
