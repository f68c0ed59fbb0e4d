pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod metrics;
pub mod migration;
pub mod utils;
