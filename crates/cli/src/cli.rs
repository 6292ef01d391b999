use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cafeflow_core::OrderId;

/// Order fulfillment against the Postgres store named by `DATABASE_URL`.
#[derive(Debug, Parser)]
#[command(name = "cafeflow", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the fulfillment tables if missing.
    Schema,

    /// Submit one order read from a JSON file.
    Order { file: PathBuf },

    /// Submit a JSON array of orders as one batch.
    Batch {
        file: PathBuf,
        /// Give up waiting after this many milliseconds.
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Show an order with its lines and status history.
    Show { order_id: OrderId },

    /// Edit an order's customer name, annotations or status from a JSON file.
    Update { order_id: OrderId, file: PathBuf },

    /// List status changes across all orders.
    History,

    /// Move an order to another status.
    Status {
        order_id: OrderId,
        status: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Mark an order delivered.
    Close {
        order_id: OrderId,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Delete an order.
    Delete {
        order_id: OrderId,
        /// Credit the order's consumed stock back to inventory.
        #[arg(long)]
        restock: bool,
    },
}
