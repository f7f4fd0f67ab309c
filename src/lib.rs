//! Restaurant Feedback API Library
//!
//! Collects ratings, text and voice feedback from anonymous respondents who
//! scan a table QR code, enriches voice notes in the background
//! (transcription plus sentiment and keyword analysis), and serves filtered
//! lists, CSV exports and analytics to restaurant operators.
//!
//! # Modules
//!
//! - `api`: HTTP routes, handlers and the OpenAPI document.
//! - `core`: Ingestion, enrichment, filtering and aggregation.
//! - `integrations`: OpenAI-compatible provider and audio object store.
//! - `store`: Persistence Gateway trait, with `db_storage` (Postgres) and
//!   `memory_store` (in-process) implementations.
//! - `worker`: Supervised enrichment runner.

pub mod api;
pub mod core;
pub mod integrations;

pub mod analytics;
pub mod app;
pub mod audio_handler;
pub mod business_handler;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod enrichment;
pub mod errors;
pub mod export;
pub mod extract;
pub mod filters;
pub mod handlers;
pub mod ingestion;
pub mod memory_store;
pub mod models;
pub mod object_store;
pub mod openapi;
pub mod services;
pub mod store;
pub mod survey_handler;
pub mod worker;
