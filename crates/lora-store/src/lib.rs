//! LoRA adapter storage for the ACE-Step server.
//!
//! Adapters are directories under a shared root. Each holds one weights file
//! (`*.safetensors` or `*.bin`), a `meta.json` describing the run that
//! produced it, and a `training_data/` backup of the source audio. The root
//! may be a network volume written by other processes, so reads go through a
//! [`Volume`] refresh and writes finish with a commit.
//!
//! # Example
//!
//! ```no_run
//! use lora_store::{AdapterRegistry, LoraStore};
//!
//! let store = LoraStore::at_path("/loras")?;
//! for adapter in store.list()? {
//!     println!("{} (weights: {})", adapter.name, adapter.has_weights);
//! }
//! if let Some(weights) = store.resolve("jazz-piano")? {
//!     println!("load {}", weights.display());
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod metadata;
pub mod store;
pub mod volume;

pub use config::LoraStoreConfig;
pub use metadata::{LoraMeta, MetaFields, TrainingMethod, META_FILE};
pub use store::{
    find_weights, validate_name, AdapterRegistry, AdapterSummary, LoraStore, NameError,
    TRAINING_DATA_DIR, WEIGHT_EXTENSIONS,
};
pub use volume::{CommandVolume, LocalVolume, Volume};
