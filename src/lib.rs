//! DX cluster spot ingestion and enrichment

pub mod config;
pub mod models;
pub mod services;
