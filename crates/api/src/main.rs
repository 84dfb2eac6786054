use anyhow::Context;

use fundguard_infra::config::{AppConfig, LogFormat};
use fundguard_observability::LogSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env().context("failed to load configuration")?;

    fundguard_observability::init(&LogSettings {
        json: cfg.log.format == LogFormat::Json,
        default_filter: cfg.log.filter.clone(),
    });

    let services = fundguard_api::app::services::build_services(&cfg).await?;
    let balance_service = fundguard_api::grpc::balance_server(services.clone());
    let app = fundguard_api::app::build_app(services);

    let addr = cfg.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let grpc_addr = cfg.grpc_socket_addr()?;

    tracing::info!(
        addr = %listener.local_addr()?,
        grpc_addr = %grpc_addr,
        persistent = cfg.database.use_persistent_stores,
        "listening"
    );

    let http = async { axum::serve(listener, app).await.context("http server failed") };
    let grpc = async {
        tonic::transport::Server::builder()
            .add_service(balance_service)
            .serve(grpc_addr)
            .await
            .context("grpc server failed")
    };
    tokio::try_join!(http, grpc)?;
    Ok(())
}
