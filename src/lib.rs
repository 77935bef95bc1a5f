pub mod config;
pub mod direct;
pub mod error;
pub mod limits;
pub mod loader;
pub mod manager;
pub mod model;
pub mod observability;
pub mod present;
pub mod registry;
pub mod router;
pub mod sim;
pub mod stock;
pub mod sweeper;
