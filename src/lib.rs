pub mod adapters;
pub mod admin;
pub mod api;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod model;
pub mod observability;
pub mod retry;
pub mod shutdown;
pub mod staging;
pub mod status;
pub mod worker;
