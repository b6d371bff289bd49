use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use k1s0_logging_server::adapter::handler::{self, AppState};
use k1s0_logging_server::domain::repository::LogEntryRepository;
use k1s0_logging_server::infrastructure::config::Config;
use k1s0_logging_server::infrastructure::database::{self, StoreKind};
use k1s0_logging_server::infrastructure::metrics::Metrics;
use k1s0_logging_server::infrastructure::persistence::{
    InMemoryLogEntryRepository, LogEntryPostgresRepository,
};
use k1s0_logging_server::infrastructure::rabbitmq::{
    DeliveryProcessor, RabbitMqLogConsumer, RabbitMqLogProducer, RetryPolicy,
};
use k1s0_logging_server::infrastructure::telemetry::init_telemetry;
use k1s0_logging_server::usecase;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let mut cfg = Config::load(&config_path)?;
    cfg.apply_env_overrides()?;
    cfg.validate()?;

    // Telemetry
    init_telemetry(&cfg.telemetry).context("failed to init telemetry")?;

    info!(
        app_name = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        "starting logging server"
    );

    let metrics = Arc::new(Metrics::new(&cfg.app.name).context("failed to register metrics")?);

    // Log entry store
    let repo: Arc<dyn LogEntryRepository> = match (cfg.store_kind(), cfg.database.as_ref()) {
        (StoreKind::Postgres, Some(db_config)) => {
            info!(host = ?db_config.host, name = ?db_config.name, "connecting to database");
            let pool = database::connect(db_config).await?;
            info!("database connection pool established");
            Arc::new(LogEntryPostgresRepository::new(pool))
        }
        (StoreKind::Mongodb, _) => {
            anyhow::bail!("database type mongodb is not supported by this server");
        }
        _ => {
            info!("no database configured, using in-memory repository");
            Arc::new(InMemoryLogEntryRepository::new())
        }
    };

    // RabbitMQ producer
    let producer = Arc::new(
        RabbitMqLogProducer::connect(&cfg.rabbitmq)
            .await
            .context("failed to connect log producer")?
            .with_metrics(metrics.clone()),
    );

    // RabbitMQ consumer (background task)
    let ingest_uc = Arc::new(usecase::IngestLogUseCase::new(repo.clone()));
    let processor = Arc::new(DeliveryProcessor::new(
        ingest_uc,
        RetryPolicy::from_max_retries(cfg.rabbitmq.max_retries),
    ));
    let consumer = Arc::new(
        RabbitMqLogConsumer::connect(&cfg.rabbitmq, processor)
            .await
            .context("failed to connect log consumer")?
            .with_metrics(metrics.clone()),
    );
    let consumer_task = {
        let consumer = consumer.clone();
        tokio::spawn(async move {
            if let Err(e) = consumer.run().await {
                tracing::error!(error = %e, "log consumer stopped with error");
            }
        })
    };

    // Use cases
    let state = AppState {
        emit_log_uc: Arc::new(usecase::EmitLogUseCase::new(producer.clone())),
        list_log_entries_uc: Arc::new(usecase::ListLogEntriesUseCase::new(repo.clone())),
        get_by_request_id_uc: Arc::new(usecase::GetLogEntriesByRequestIdUseCase::new(
            repo.clone(),
        )),
        get_by_user_id_uc: Arc::new(usecase::GetLogEntriesByUserIdUseCase::new(repo.clone())),
        get_by_date_range_uc: Arc::new(usecase::GetLogEntriesByDateRangeUseCase::new(
            repo.clone(),
        )),
        get_log_entry_uc: Arc::new(usecase::GetLogEntryUseCase::new(repo.clone())),
        delete_log_entry_uc: Arc::new(usecase::DeleteLogEntryUseCase::new(repo)),
        metrics,
        consumer_health: consumer.clone(),
        max_page_size: cfg.server.max_page_size,
    };

    let app = handler::router(state);

    // REST server
    let rest_addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    info!("REST server starting on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(rest_addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow::anyhow!("REST server error: {}", e))?;

    info!("REST server stopped, closing broker connections");
    consumer.shutdown().await;
    producer.shutdown().await;
    if let Err(e) = consumer_task.await {
        tracing::warn!(error = %e, "log consumer task did not finish cleanly");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // シグナルを受けられない場合は停止させずに動かし続ける
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
