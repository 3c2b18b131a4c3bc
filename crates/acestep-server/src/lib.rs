//! ACE-Step serving glue.
//!
//! An HTTP front end that turns loosely-typed JSON requests into fully
//! specified generation calls against an ACE-Step inference worker, and
//! records LoRA training runs on the shared adapter volume.

pub mod api;
pub mod inference;
pub mod scratch;
pub mod telemetry;
pub mod training;
pub mod web;

pub use web::{router, AppState};

/// Run filesystem and volume work on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    use anyhow::Context;

    tokio::task::spawn_blocking(f)
        .await
        .context("blocking task panicked")?
}
