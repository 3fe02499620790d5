use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use push_dispatch::backlog::{Backlog, MemoryTokenRegistry};
use push_dispatch::config::Settings;
use push_dispatch::connection_manager::{ConnectionManager, HttpTransport};
use push_dispatch::gateway::GcmProvider;
use push_dispatch::metrics::encode_metrics;
use push_dispatch::notification::{Notification, NotificationDispatcher, NotificationInput};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    let path = std::env::args()
        .nth(1)
        .context("usage: push-dispatch <notifications.json | ->")?;

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!(endpoint = %settings.gateway.endpoint_url(), "Configuration loaded");

    let notifications = read_notifications(&path).await?;
    tracing::info!(count = notifications.len(), "Notifications loaded");

    let registry = Arc::new(
        notifications
            .iter()
            .flat_map(|n| n.devices().iter().cloned())
            .collect::<MemoryTokenRegistry>(),
    );

    let transport = Arc::new(HttpTransport::new(&settings.gateway)?);
    let connection_manager = Arc::new(ConnectionManager::new(transport));
    let provider = Arc::new(GcmProvider::new(&settings.gateway));
    let dispatcher = Arc::new(NotificationDispatcher::new(provider, connection_manager));

    let mut backlog = Backlog::new(dispatcher.clone(), registry.clone(), &settings.backlog);
    for notification in notifications {
        backlog.enqueue(notification);
    }

    let summary = backlog.run_until_idle().await;
    tracing::info!(
        completed = summary.completed,
        settled = summary.settled,
        exhausted = summary.exhausted,
        integration_failures = summary.integration_failures,
        devices_delivered = summary.devices_delivered,
        tokens_remaining = registry.len(),
        "Backlog drained"
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "summary": summary,
            "dispatcher": dispatcher.stats(),
            "metrics": encode_metrics()?,
        }))?
    );

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f == "json")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Read a JSON array of notifications from a file, or stdin for `-`
async fn read_notifications(path: &str) -> Result<Vec<Notification>> {
    let raw = if path == "-" {
        use tokio::io::AsyncReadExt;
        let mut buffer = String::new();
        tokio::io::stdin().read_to_string(&mut buffer).await?;
        buffer
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path))?
    };

    let inputs: Vec<NotificationInput> = serde_json::from_str(&raw)?;
    inputs
        .into_iter()
        .map(|input| Notification::try_from(input).map_err(Into::into))
        .collect()
}
