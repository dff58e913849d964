pub mod assignment;
pub mod availability;
pub mod collection;
pub mod config;
pub mod database;
pub mod dispatcher;
pub mod executor;
pub mod models;
pub mod node_client;
pub mod routes;
pub mod status;
pub mod store;
pub mod uptime;
