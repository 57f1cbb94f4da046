//! qcflow-core library.
//!
//! Disposition tracking for detected rolls and bundles: the status state
//! machine, the request and review approval workflows, and the append-only
//! audit log, all stored in one SQLite database.
//!
//! # Conventions
//!
//! - **Errors**: Core operations return [`error::Result`] (a [`QcError`]
//!   carrying an [`ErrorCode`]). Setup and plumbing use `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
//! - **Time**: Every timestamp is microseconds since the Unix epoch, read
//!   once per operation from a [`clock::Clock`].

pub mod audit;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod ingest;
pub mod model;
pub mod policy;
pub mod service;
pub mod transition;
pub mod workflow;

pub use error::{ErrorClass, ErrorCode, QcError};
pub use service::Engine;
