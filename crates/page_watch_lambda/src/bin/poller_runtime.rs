//! Runs the whole pipeline in one process: a local scheduler drives the
//! orchestrator, which calls the monitor and dispatcher in process against
//! the real content API, integration endpoint and DynamoDB tables.

use std::sync::Arc;

use lambda_runtime::Error;
use page_watch_lambda::adapters::content_api::NotionContentApi;
use page_watch_lambda::adapters::dynamodb::DynamoDbStateStore;
use page_watch_lambda::adapters::in_process::{InProcessDispatchInvoker, InProcessMonitorInvoker};
use page_watch_lambda::adapters::integration::HttpIntegrationEndpoint;
use page_watch_lambda::adapters::state_store::StateStore;
use page_watch_lambda::config::Config;
use page_watch_lambda::logging;
use page_watch_lambda::scheduler::SchedulerWorker;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::from_env()?;
    logging::init(&config.log_level);
    let settings = config.settings;

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store: Arc<dyn StateStore> = Arc::new(DynamoDbStateStore::new(
        aws_sdk_dynamodb::Client::new(&aws_config),
        &config.registrations_table,
        &config.seen_items_table,
    ));
    let endpoint = Arc::new(HttpIntegrationEndpoint::new(
        config.integration_url()?,
        settings.call_timeout,
    )?);
    let content_api = Arc::new(NotionContentApi::new(
        &config.notion.api_base,
        &config.notion.version,
        config.secret_key()?,
        settings.call_timeout,
    )?);

    let dispatcher = Arc::new(InProcessDispatchInvoker::new(store.clone(), endpoint, settings));
    let monitor = Arc::new(InProcessMonitorInvoker::new(
        content_api,
        store.clone(),
        dispatcher,
        settings,
    ));
    let worker = SchedulerWorker::new(config.account_id()?, store, monitor, settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(component = "poller_runtime", event = "shutdown_requested", "ctrl-c received");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}
