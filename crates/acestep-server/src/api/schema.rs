//! Request bodies accepted by the HTTP surface.
//!
//! Every generate option is optional. Defaults are applied once, in
//! [`crate::api::translate`], so these structs stay a faithful picture of
//! what the caller actually sent.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Body of `POST /generate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GenerateRequest {
    #[schemars(description = "text2music (default), cover, repaint, lego, extract, complete, vocal2bgm")]
    pub task_type: Option<String>,

    #[schemars(description = "Style/caption prompt")]
    pub prompt: Option<String>,

    #[schemars(description = "Lyrics; empty, [inst] or [instrumental] means instrumental")]
    pub lyrics: Option<String>,

    #[schemars(description = "Target length in seconds; omitted or 0 lets the model decide")]
    pub audio_duration: Option<f64>,

    #[schemars(description = "Diffusion steps (default 8)")]
    pub inference_steps: Option<u32>,

    #[schemars(description = "Classifier-free guidance scale (default 7.0)")]
    pub guidance_scale: Option<f64>,

    #[schemars(description = "Timestep shift (default 3.0)")]
    pub shift: Option<f64>,

    #[schemars(description = "Seed; -1 (default) with use_random_seed picks a fresh one")]
    pub seed: Option<i64>,

    pub use_random_seed: Option<bool>,

    #[schemars(description = "Number of clips to generate (default 1)")]
    pub batch_size: Option<u32>,

    #[schemars(description = "mp3 (default), wav or flac")]
    pub audio_format: Option<String>,

    pub bpm: Option<u32>,

    #[schemars(description = "Key and scale, e.g. 'C major'")]
    pub key_scale: Option<String>,

    #[schemars(description = "Time signature, e.g. '4/4'")]
    pub time_signature: Option<String>,

    #[schemars(description = "Vocal language code (default en)")]
    pub vocal_language: Option<String>,

    pub audio_cover_strength: Option<f64>,

    #[schemars(description = "Sampler: ode (default) or sde")]
    pub infer_method: Option<String>,

    pub repainting_start: Option<f64>,

    #[schemars(description = "End of the repaint window in seconds; omitted or 0 means end of clip")]
    pub repainting_end: Option<f64>,

    #[schemars(description = "Name of a trained LoRA adapter to apply")]
    pub lora_name: Option<String>,

    #[schemars(description = "Override the task instruction")]
    pub instruction: Option<String>,

    #[schemars(description = "Track name for extract/lego/complete instructions, e.g. 'vocals'")]
    pub track_name: Option<String>,

    #[schemars(description = "Base64 source audio for cover/repaint/lego/extract/complete")]
    pub src_audio_base64: Option<String>,

    #[schemars(description = "Base64 reference audio for style conditioning")]
    pub reference_audio_base64: Option<String>,

    #[schemars(description = "Pre-computed semantic audio codes")]
    pub audio_codes: Option<String>,

    pub use_adg: Option<bool>,
    pub cfg_interval_start: Option<f64>,
    pub cfg_interval_end: Option<f64>,

    // 5Hz LM options
    pub thinking: Option<bool>,
    pub lm_temperature: Option<f64>,
    pub lm_cfg_scale: Option<f64>,
    pub lm_top_k: Option<u32>,
    pub lm_top_p: Option<f64>,
    pub lm_negative_prompt: Option<String>,
    pub use_cot_metas: Option<bool>,
    pub use_cot_caption: Option<bool>,
    pub use_cot_language: Option<bool>,
    pub use_constrained_decoding: Option<bool>,
}

/// One uploaded training clip.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AudioUpload {
    #[schemars(description = "Original filename; only the final path component is kept")]
    #[serde(default)]
    pub name: Option<String>,

    #[schemars(description = "Base64 audio bytes")]
    pub data: String,
}

/// Body of `POST /train`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrainRequest {
    #[schemars(description = "Accepted for client compatibility; always lora_training")]
    #[serde(default)]
    pub task_type: Option<String>,

    #[schemars(description = "Adapter name (required, single path component)")]
    #[serde(default)]
    pub lora_name: String,

    #[schemars(description = "Training clips (at least one)")]
    #[serde(default)]
    pub audio_files: Vec<AudioUpload>,

    #[serde(default = "TrainRequest::default_epochs")]
    pub epochs: u32,

    #[serde(default = "TrainRequest::default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "TrainRequest::default_lora_rank")]
    pub lora_rank: u32,

    #[serde(default = "TrainRequest::default_batch_size")]
    pub batch_size: u32,

    #[schemars(description = "Checkpoint every N epochs")]
    #[serde(default = "TrainRequest::default_save_every")]
    pub save_every: u32,
}

impl TrainRequest {
    fn default_epochs() -> u32 {
        100
    }

    fn default_learning_rate() -> f64 {
        1e-4
    }

    fn default_lora_rank() -> u32 {
        16
    }

    fn default_batch_size() -> u32 {
        1
    }

    fn default_save_every() -> u32 {
        50
    }
}

impl Default for TrainRequest {
    fn default() -> Self {
        Self {
            task_type: None,
            lora_name: String::new(),
            audio_files: Vec::new(),
            epochs: Self::default_epochs(),
            learning_rate: Self::default_learning_rate(),
            lora_rank: Self::default_lora_rank(),
            batch_size: Self::default_batch_size(),
            save_every: Self::default_save_every(),
        }
    }
}
