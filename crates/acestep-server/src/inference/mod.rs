//! Model access: the facade over DiT + LM and the worker client behind it.

pub mod facade;
pub mod params;
pub mod worker;

pub use facade::{DitHandler, DitSettings, InferenceFacade, LmHandler, LmSettings};
pub use params::{AudioFormat, GenerationConfig, GenerationParams, GenerationResult};
pub use worker::{WorkerCapabilities, WorkerClient};
