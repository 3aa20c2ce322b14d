//! A small blocking Rust client for a geospatial data-processing gateway.
//!
//! Most gateway operations are asynchronous: a request is accepted with a job
//! id, and the outcome is read by polling `/job/{id}` until the job settles.
//! This crate wraps that flow:
//! submit a request, wait for the job, then use the result (a data id, a
//! deployment, a downloaded file).
//!
//! ## Quick start
//! - Configure the gateway via environment variables (`PZSVC_URL`, `PZSVC_AUTH`) or a
//!   `.pzsvcrc` file (supported in the current directory and in your home directory).
//! - Call [`Client::ingest_file`] and [`Client::deploy_to_geoserver`].
//!
//! ```no_run
//! use anyhow::Result;
//! use pzsvc::{Client, IngestKind, IngestRequestOptions};
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?;
//!     let opts = IngestRequestOptions::new("scene.tif", IngestKind::Raster)
//!         .with_source("landsat", "1.0")
//!         .with_property("cloudCover", "12");
//!     let data_id = client.ingest_file(std::path::Path::new("scene.tif"), &opts)?;
//!     let layer = client.deploy_to_geoserver(&data_id)?;
//!     println!("{data_id} deployed as {layer}");
//!     Ok(())
//! }
//! ```
//!
//! Polling is tuned through [`PollConfig`]; [`JobPoller`] can be used directly
//! with any [`transport::Transport`].

#![forbid(unsafe_code)]

mod client;
mod config;
mod decode;
mod error;
mod ingest;
mod job;
pub mod model;
mod multipart;
mod poll;
mod service;
pub mod transport;
mod util;
mod workflow;

pub use client::{Client, ClientConfig};
pub use decode::{Decoded, read_body_json};
pub use error::{Error, MultipartPhase, Result};
pub use ingest::{IngestKind, IngestRequestOptions};
pub use job::{JobHandle, JobProgress, JobState, JobStatus, get_job_id, has_payload};
pub use multipart::{FilePart, MultipartForm};
pub use poll::{
    CancelToken, DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL, JOB_NOT_FOUND, JobPoller, PendingRule,
    PollConfig,
};
pub use service::{ExecRequest, Registration, ServiceRegistration};
pub use workflow::{EventTypeCache, versioned_name};
