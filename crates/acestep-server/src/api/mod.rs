//! Wire types and request translation for the HTTP surface.

pub mod responses;
pub mod schema;
pub mod translate;

pub use responses::{
    Failure, FailureBody, GenerateResponse, HealthResponse, LorasResponse, Status, TrainResponse,
};
pub use schema::{AudioUpload, GenerateRequest, TrainRequest};
pub use translate::{translate, TranslateError, Translation};
