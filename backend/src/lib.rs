//! Crowdsourcing backend: task distribution, answer collection and export.

pub mod api;
pub mod config;
pub mod error;
pub mod exporter;
pub mod models;
pub mod services;
pub mod storage;
pub mod store;
