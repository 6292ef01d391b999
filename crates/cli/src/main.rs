use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use cafeflow_infra::config::FulfillmentConfig;
use cafeflow_infra::fulfillment::{DeletePolicy, OrderService};
use cafeflow_infra::store::PostgresFulfillmentStore;
use cafeflow_orders::{CreateOrderRequest, UpdateOrderRequest};

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("cafeflow error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cafeflow_observability::init();

    let config = FulfillmentConfig::from_env().context("invalid configuration")?;
    let store = Arc::new(
        PostgresFulfillmentStore::connect(&config)
            .await
            .context("failed to connect to Postgres")?,
    );
    let service = OrderService::with_config(Arc::clone(&store), config);

    let output = match cli.command {
        Commands::Schema => {
            store.ensure_schema().await.context("failed to create schema")?;
            tracing::info!("schema ready");
            json!({ "schema": "ready" })
        }
        Commands::Order { file } => {
            let request: CreateOrderRequest = read_json(&file)?;
            serde_json::to_value(service.create_order(request).await?)?
        }
        Commands::Batch { file, deadline_ms } => {
            let requests: Vec<CreateOrderRequest> = read_json(&file)?;
            let report = match deadline_ms {
                Some(ms) => {
                    service
                        .batch_create_orders_within(requests, Duration::from_millis(ms))
                        .await?
                }
                None => service.batch_create_orders(requests).await?,
            };
            serde_json::to_value(report)?
        }
        Commands::Show { order_id } => {
            let details = service.get_order(order_id).await?;
            let history = service.status_history(order_id).await?;
            json!({ "order": details.order, "items": details.items, "history": history })
        }
        Commands::Update { order_id, file } => {
            let request: UpdateOrderRequest = read_json(&file)?;
            serde_json::to_value(service.update_order(order_id, request).await?)?
        }
        Commands::History => serde_json::to_value(service.all_status_history().await?)?,
        Commands::Status {
            order_id,
            status,
            reason,
        } => serde_json::to_value(service.update_order_status(order_id, &status, reason).await?)?,
        Commands::Close { order_id, reason } => {
            serde_json::to_value(service.close_order(order_id, reason).await?)?
        }
        Commands::Delete { order_id, restock } => {
            let policy = if restock {
                DeletePolicy::Restock
            } else {
                DeletePolicy::RetainConsumption
            };
            let restocked = service.delete_order(order_id, policy).await?;
            json!({ "deleted": order_id, "policy": policy, "restocked": restocked })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
