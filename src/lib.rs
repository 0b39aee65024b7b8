pub mod auth;
pub mod config;
pub mod db;
pub mod handlers;
pub mod http;
pub mod model;
pub mod outbox;
pub mod poll;
pub mod steam;
pub mod store;
pub mod sync;
pub mod watchdog;
