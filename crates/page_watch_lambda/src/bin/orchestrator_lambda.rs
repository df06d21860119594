use lambda_runtime::{service_fn, Error, LambdaEvent};
use page_watch_lambda::adapters::dynamodb::DynamoDbStateStore;
use page_watch_lambda::adapters::invoke::LambdaFunctionInvoker;
use page_watch_lambda::config::Config;
use page_watch_lambda::handlers::{handle_tick, tick_from_event};
use page_watch_lambda::logging;
use page_watch_lambda::runtime::contract::TickReport;
use serde_json::Value;

struct RuntimeDependencies {
    config: Config,
    store: DynamoDbStateStore,
    monitor: LambdaFunctionInvoker,
}

async fn handle_request(
    event: LambdaEvent<Value>,
    deps: &RuntimeDependencies,
) -> Result<TickReport, Error> {
    let tick = tick_from_event(event.payload, deps.config.account_id().ok())?;
    let report = handle_tick(tick, &deps.store, &deps.monitor, &deps.config.settings).await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::from_env()?;
    logging::init(&config.log_level);

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let deps = RuntimeDependencies {
        store: DynamoDbStateStore::new(
            aws_sdk_dynamodb::Client::new(&aws_config),
            &config.registrations_table,
            &config.seen_items_table,
        ),
        monitor: LambdaFunctionInvoker::new(
            aws_sdk_lambda::Client::new(&aws_config),
            config.monitor_function()?,
        ),
        config,
    };

    let deps = &deps;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle_request(event, deps).await
    }))
    .await
}
