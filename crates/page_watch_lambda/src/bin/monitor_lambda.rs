use lambda_runtime::{service_fn, Error, LambdaEvent};
use page_watch_lambda::adapters::content_api::NotionContentApi;
use page_watch_lambda::adapters::dynamodb::DynamoDbStateStore;
use page_watch_lambda::adapters::invoke::LambdaFunctionInvoker;
use page_watch_lambda::config::Config;
use page_watch_lambda::handlers::handle_monitor_request;
use page_watch_lambda::logging;
use page_watch_lambda::runtime::contract::{MonitorReport, MonitorRequest};

struct RuntimeDependencies {
    config: Config,
    content_api: NotionContentApi,
    store: DynamoDbStateStore,
    dispatcher: LambdaFunctionInvoker,
}

async fn handle_request(
    event: LambdaEvent<MonitorRequest>,
    deps: &RuntimeDependencies,
) -> Result<MonitorReport, Error> {
    let report = handle_monitor_request(
        event.payload,
        &deps.content_api,
        &deps.store,
        &deps.dispatcher,
        &deps.config.settings,
    )
    .await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::from_env()?;
    logging::init(&config.log_level);

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let deps = RuntimeDependencies {
        content_api: NotionContentApi::new(
            &config.notion.api_base,
            &config.notion.version,
            config.secret_key()?,
            config.settings.call_timeout,
        )?,
        store: DynamoDbStateStore::new(
            aws_sdk_dynamodb::Client::new(&aws_config),
            &config.registrations_table,
            &config.seen_items_table,
        ),
        dispatcher: LambdaFunctionInvoker::new(
            aws_sdk_lambda::Client::new(&aws_config),
            config.dispatch_function()?,
        ),
        config,
    };

    let deps = &deps;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<MonitorRequest>| async move {
        handle_request(event, deps).await
    }))
    .await
}
