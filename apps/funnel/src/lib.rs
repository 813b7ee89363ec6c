//! # funnel
//!
//! The application layer around `funnel-core`: the CRM deal fetcher, the
//! refresh cache with its periodic timer, CSV persistence, the HTTP API and
//! the CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    apps/funnel (THE BINARY)                  │
//! │                                                              │
//! │  ┌──────────┐   ┌──────────────┐   ┌─────────────────────┐   │
//! │  │   CLI    │   │   HTTP API   │   │   Refresh Timer     │   │
//! │  │  (clap)  │   │   (axum)     │   │  (tokio interval)   │   │
//! │  └────┬─────┘   └──────┬───────┘   └──────────┬──────────┘   │
//! │       │                └──────────┬───────────┘              │
//! │       │                           ▼                          │
//! │       │                  ┌─────────────────┐                 │
//! │       │                  │  RefreshCache   │──► CSV file     │
//! │       │                  └────────┬────────┘                 │
//! │       │                           ▼                          │
//! │       │                  ┌─────────────────┐                 │
//! │       └─────────────────►│   DealSource    │──► CRM (HTTP)   │
//! │                          └────────┬────────┘                 │
//! │                                   ▼                          │
//! │                          ┌─────────────────┐                 │
//! │                          │   funnel-core   │                 │
//! │                          │ (THE TRANSFORM) │                 │
//! │                          └─────────────────┘                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod crm;
pub mod error;
pub mod persistence;
pub mod scheduler;

pub use cache::{
    CacheSnapshot, RefreshCache, RefreshFailure, RefreshMode, RefreshOutcome, RefreshReport,
};
pub use config::Config;
pub use crm::{CrmClient, DealSource, FetchFuture, JsonFileSource};
pub use error::{AppError, FetchError, RefreshError};
