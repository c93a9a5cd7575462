use anyhow::Context;

use imagegen_infra::GenerationConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    imagegen_observability::init();

    let config = GenerationConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr.clone();

    let services = imagegen_api::app::build_services(config).await?;
    let app = imagegen_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
