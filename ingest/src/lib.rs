pub mod alerts;
pub mod classify;
pub mod config;
pub mod errors;
pub mod extract;
pub mod forward;
pub mod lid;
pub mod metrics_defs;
pub mod pipeline;
pub mod rate_limit;
pub mod service;

use crate::errors::IngestError;
use crate::pipeline::WebhookPipeline;
use crate::service::IngestService;
use shared::admin_service::AdminService;
use shared::http::{run_http_service, serve};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tenants::Resolver;
use tokio::net::TcpListener;

/// Serves webhook traffic on the main listener and probes on the admin
/// listener until either fails.
pub async fn run(config: config::Config, resolver: Resolver) -> Result<(), IngestError> {
    config
        .validate()
        .map_err(|err| IngestError::InvalidConfig(err.to_string()))?;

    let pipeline = WebhookPipeline::from_config(&config, resolver)?;
    let service = IngestService::new(pipeline, config.admin_token().map(str::to_string));

    let ready = Arc::new(AtomicBool::new(false));
    let ready_probe = ready.clone();
    let admin_service =
        AdminService::<_, IngestError>::new(move || ready_probe.load(Ordering::Relaxed));
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    let webhook_task = serve_webhooks(&config.listener, service, ready);

    tokio::try_join!(webhook_task, admin_task)?;
    Ok(())
}

async fn serve_webhooks(
    listener: &config::Listener,
    service: IngestService,
    ready: Arc<AtomicBool>,
) -> Result<(), IngestError> {
    let tcp_listener = TcpListener::bind(format!("{}:{}", listener.host, listener.port)).await?;
    tracing::info!(host = %listener.host, port = listener.port, "webhook listener ready");
    ready.store(true, Ordering::Relaxed);
    serve(tcp_listener, service).await
}
