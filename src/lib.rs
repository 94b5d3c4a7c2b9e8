pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod extract;
pub mod feed;
pub mod ledger;
pub mod models;
pub mod pipeline;
