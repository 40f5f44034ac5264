pub mod aggregator;
pub mod config;
pub mod envelope;
pub mod featureservice;
pub mod health;
pub mod http;
pub mod models;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod sweep;
pub mod token;
