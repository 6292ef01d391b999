//! Infrastructure layer: record stores, fulfillment services, config.

pub mod config;
pub mod fulfillment;
pub mod store;

#[cfg(test)]
mod integration_tests;
