use lambda_runtime::{service_fn, Error, LambdaEvent};
use page_watch_lambda::adapters::dynamodb::DynamoDbStateStore;
use page_watch_lambda::adapters::integration::HttpIntegrationEndpoint;
use page_watch_lambda::config::Config;
use page_watch_lambda::handlers::handle_dispatch_request;
use page_watch_lambda::logging;
use page_watch_lambda::runtime::contract::{DispatchOutcome, DispatchRequest};

struct RuntimeDependencies {
    config: Config,
    store: DynamoDbStateStore,
    endpoint: HttpIntegrationEndpoint,
}

async fn handle_request(
    event: LambdaEvent<DispatchRequest>,
    deps: &RuntimeDependencies,
) -> Result<DispatchOutcome, Error> {
    let outcome = handle_dispatch_request(
        event.payload,
        &deps.store,
        &deps.endpoint,
        &deps.config.settings,
    )
    .await?;
    Ok(outcome)
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
        endpoint: HttpIntegrationEndpoint::new(
            config.integration_url()?,
            config.settings.call_timeout,
        )?,
        config,
    };

    let deps = &deps;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<DispatchRequest>| async move {
        handle_request(event, deps).await
    }))
    .await
}
