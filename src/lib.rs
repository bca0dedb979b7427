pub mod api;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod identity;
pub mod models;
pub mod observability;
pub mod realtime;
pub mod state;
