//! Fully populated generation inputs and the result shape coming back.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Output container for generated audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
    Flac,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            "flac" => Ok(AudioFormat::Flac),
            other => Err(other.to_string()),
        }
    }
}

/// Everything the diffusion model (and the LM, when present) needs for one run.
///
/// Field names follow the worker's wire contract. `bpm`, `src_audio` and
/// `reference_audio` are the only optional inputs: `None` means "let the
/// model decide" or "no conditioning audio".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub task_type: String,
    pub instruction: String,
    pub reference_audio: Option<PathBuf>,
    pub src_audio: Option<PathBuf>,
    pub audio_codes: String,
    pub caption: String,
    pub lyrics: String,
    pub instrumental: bool,
    pub vocal_language: String,
    pub bpm: Option<u32>,
    pub keyscale: String,
    pub timesignature: String,
    /// Seconds; -1.0 when unspecified.
    pub duration: f64,
    pub inference_steps: u32,
    /// -1 together with `use_random_seed` asks the model for a fresh seed.
    pub seed: i64,
    pub guidance_scale: f64,
    pub use_adg: bool,
    pub cfg_interval_start: f64,
    pub cfg_interval_end: f64,
    pub shift: f64,
    pub infer_method: String,
    pub repainting_start: f64,
    /// Seconds; -1.0 when unspecified.
    pub repainting_end: f64,
    pub audio_cover_strength: f64,
    pub thinking: bool,
    pub lm_temperature: f64,
    pub lm_cfg_scale: f64,
    pub lm_top_k: u32,
    pub lm_top_p: f64,
    pub lm_negative_prompt: String,
    pub use_cot_metas: bool,
    pub use_cot_caption: bool,
    pub use_cot_language: bool,
    pub use_constrained_decoding: bool,
}

/// Batch and output options, independent of what is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub batch_size: u32,
    pub allow_lm_batch: bool,
    pub use_random_seed: bool,
    pub seeds: Option<Vec<i64>>,
    pub audio_format: AudioFormat,
    pub constrained_decoding_debug: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            allow_lm_batch: false,
            use_random_seed: true,
            seeds: None,
            audio_format: AudioFormat::default(),
            constrained_decoding_debug: false,
        }
    }
}

/// Outcome of one generation call.
///
/// The files in `audios` are ephemeral; whoever receives the result is
/// responsible for deleting them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResult {
    pub success: bool,
    pub audios: Vec<PathBuf>,
    pub error: Option<String>,
    pub status_message: Option<String>,
}

impl GenerationResult {
    /// Human-readable reason for an unsuccessful result.
    pub fn failure_message(&self) -> String {
        fn non_empty(m: &Option<String>) -> Option<&str> {
            m.as_deref().filter(|m| !m.is_empty())
        }

        non_empty(&self.error)
            .or_else(|| non_empty(&self.status_message))
            .unwrap_or("generation failed")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_parse() {
        assert_eq!("MP3".parse::<AudioFormat>(), Ok(AudioFormat::Mp3));
        assert_eq!(" flac".parse::<AudioFormat>(), Ok(AudioFormat::Flac));
        assert_eq!("ogg".parse::<AudioFormat>(), Err("ogg".to_string()));
        assert_eq!(serde_json::to_value(AudioFormat::Wav).unwrap(), "wav");
    }

    #[test]
    fn test_failure_message_fallbacks() {
        let result = GenerationResult {
            error: Some("CUDA out of memory".into()),
            status_message: Some("ignored".into()),
            ..Default::default()
        };
        assert_eq!(result.failure_message(), "CUDA out of memory");

        let result = GenerationResult {
            status_message: Some("no audio produced".into()),
            ..Default::default()
        };
        assert_eq!(result.failure_message(), "no audio produced");

        assert_eq!(GenerationResult::default().failure_message(), "generation failed");
    }
}
