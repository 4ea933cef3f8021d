//! NFP Monitor Library
//!
//! Core of a dashboard backend for accounting-firm staff: it manages
//! client records and digital certificates, runs sequential NFP
//! ("Nota Fiscal Paulistana") document queries against a remote
//! backend, keeps a bounded history of runs with period-over-period
//! comparison, and executes user-scheduled single-client queries with
//! at-most-once delivery.
//!
//! # Modules
//!
//! - `auth`: Credential check and session tokens.
//! - `backend`: Remote query collaborator (synthetic and HTTP).
//! - `config`: Process configuration from the environment.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and shared state.
//! - `history`: Bounded run history and comparison.
//! - `models`: Core data models.
//! - `pipeline`: Sequential multi-client processing.
//! - `registry`: Client and certificate registry.
//! - `report`: CSV export and alert reports.
//! - `scheduler`: Scheduled jobs and the poll loop.
//! - `store`: Durable key-indexed JSON state store.
//! - `summarizer`: AI risk-summary collaborator.

pub mod auth;
pub mod backend;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod history;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod summarizer;
