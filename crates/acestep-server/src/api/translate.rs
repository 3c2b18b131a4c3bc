//! Turns a [`GenerateRequest`] into fully populated generation inputs.
//!
//! All defaulting happens here. Base64 audio is decoded and validated before
//! anything is written, so a bad second input never leaves the first one on
//! disk.

use std::path::PathBuf;

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

use super::schema::GenerateRequest;
use crate::inference::{AudioFormat, GenerationConfig, GenerationParams};
use crate::scratch::ScratchDir;

/// Instruction used when the task type has no entry of its own.
pub const DEFAULT_INSTRUCTION: &str = "Fill the audio semantic mask based on the given conditions:";

/// Lyrics that mean "no vocals", compared trimmed and lowercased.
pub const INSTRUMENTAL_MARKERS: &[&str] = &["", "[inst]", "[instrumental]"];

/// Problems with what the caller sent.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("invalid base64 in {field}: {source}")]
    InvalidBase64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("unsupported audio_format '{0}' (expected mp3, wav or flac)")]
    UnknownAudioFormat(String),
}

/// Output of [`translate`].
#[derive(Debug, Clone)]
pub struct Translation {
    pub params: GenerationParams,
    pub config: GenerationConfig,
    /// Adapter to apply, if one was named.
    pub lora_name: Option<String>,
    /// Decoded input audio written to the scratch dir.
    pub temp_files: Vec<PathBuf>,
}

/// True when `lyrics` is absent or one of [`INSTRUMENTAL_MARKERS`].
pub fn is_instrumental(lyrics: Option<&str>) -> bool {
    match lyrics {
        None => true,
        Some(text) => {
            let normalized = text.trim().to_lowercase();
            INSTRUMENTAL_MARKERS.contains(&normalized.as_str())
        }
    }
}

/// Default instruction for a task type.
///
/// `track_name` fills the `{TRACK_NAME}`/`{TRACK_CLASSES}` slot for the
/// track-oriented tasks; without it their generic wording is used.
pub fn task_instruction(task_type: &str, track_name: Option<&str>) -> String {
    let track = track_name.map(str::trim).filter(|t| !t.is_empty());

    match (task_type, track) {
        ("text2music", _) => DEFAULT_INSTRUCTION.to_string(),
        ("repaint", _) => "Repaint the mask area based on the given conditions:".to_string(),
        ("cover", _) => "Generate audio semantic tokens based on the given conditions:".to_string(),
        ("extract", Some(track)) => format!("Extract the {} track from the audio:", track),
        ("extract", None) => "Extract the track from the audio:".to_string(),
        ("lego", Some(track)) => format!("Generate the {} track based on the audio context:", track),
        ("lego", None) => "Generate the track based on the audio context:".to_string(),
        ("complete", Some(track)) => format!("Complete the input track with {}:", track),
        ("complete", None) => "Complete the input track:".to_string(),
        _ => DEFAULT_INSTRUCTION.to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Zero and absent both mean "unspecified" for durations.
fn or_unspecified(value: Option<f64>) -> f64 {
    value.filter(|v| *v != 0.0).unwrap_or(-1.0)
}

fn decode_audio(field: &'static str, data: Option<&str>) -> Result<Option<Vec<u8>>, TranslateError> {
    let Some(data) = data.filter(|d| !d.trim().is_empty()) else {
        return Ok(None);
    };

    let compact: String = data.split_whitespace().collect();
    BASE64
        .decode(compact.as_bytes())
        .map(Some)
        .map_err(|source| TranslateError::InvalidBase64 { field, source })
}

/// Build generation inputs from a request, staging any input audio in `scratch`.
pub fn translate(request: GenerateRequest, scratch: &mut ScratchDir) -> Result<Translation> {
    let src_bytes = decode_audio("src_audio_base64", request.src_audio_base64.as_deref())?;
    let ref_bytes = decode_audio(
        "reference_audio_base64",
        request.reference_audio_base64.as_deref(),
    )?;

    let audio_format = match non_empty(request.audio_format) {
        Some(raw) => raw
            .parse::<AudioFormat>()
            .map_err(TranslateError::UnknownAudioFormat)?,
        None => AudioFormat::default(),
    };

    let mut temp_files = Vec::new();
    let src_audio = match src_bytes {
        Some(bytes) => {
            let path = scratch.write(&bytes, "src", "wav")?;
            temp_files.push(path.clone());
            Some(path)
        }
        None => None,
    };
    let reference_audio = match ref_bytes {
        Some(bytes) => {
            let path = scratch.write(&bytes, "ref", "wav")?;
            temp_files.push(path.clone());
            Some(path)
        }
        None => None,
    };

    let task_type = non_empty(request.task_type).unwrap_or_else(|| "text2music".to_string());
    let instruction = non_empty(request.instruction)
        .unwrap_or_else(|| task_instruction(&task_type, request.track_name.as_deref()));
    let instrumental = is_instrumental(request.lyrics.as_deref());

    let params = GenerationParams {
        instruction,
        reference_audio,
        src_audio,
        audio_codes: request.audio_codes.unwrap_or_default(),
        caption: request.prompt.unwrap_or_default(),
        lyrics: request.lyrics.unwrap_or_default(),
        instrumental,
        vocal_language: request.vocal_language.unwrap_or_else(|| "en".to_string()),
        bpm: request.bpm,
        keyscale: request.key_scale.unwrap_or_default(),
        timesignature: request.time_signature.unwrap_or_default(),
        duration: or_unspecified(request.audio_duration),
        inference_steps: request.inference_steps.unwrap_or(8),
        seed: request.seed.unwrap_or(-1),
        guidance_scale: request.guidance_scale.unwrap_or(7.0),
        use_adg: request.use_adg.unwrap_or(false),
        cfg_interval_start: request.cfg_interval_start.unwrap_or(0.0),
        cfg_interval_end: request.cfg_interval_end.unwrap_or(1.0),
        shift: request.shift.unwrap_or(3.0),
        infer_method: request.infer_method.unwrap_or_else(|| "ode".to_string()),
        repainting_start: request.repainting_start.unwrap_or(0.0),
        repainting_end: or_unspecified(request.repainting_end),
        audio_cover_strength: request.audio_cover_strength.unwrap_or(1.0),
        thinking: request.thinking.unwrap_or(false),
        lm_temperature: request.lm_temperature.unwrap_or(0.85),
        lm_cfg_scale: request.lm_cfg_scale.unwrap_or(2.5),
        lm_top_k: request.lm_top_k.unwrap_or(0),
        lm_top_p: request.lm_top_p.unwrap_or(0.9),
        lm_negative_prompt: request
            .lm_negative_prompt
            .unwrap_or_else(|| "NO USER INPUT".to_string()),
        use_cot_metas: request.use_cot_metas.unwrap_or(true),
        use_cot_caption: request.use_cot_caption.unwrap_or(true),
        use_cot_language: request.use_cot_language.unwrap_or(true),
        use_constrained_decoding: request.use_constrained_decoding.unwrap_or(true),
        task_type,
    };

    let config = GenerationConfig {
        batch_size: request.batch_size.unwrap_or(1),
        use_random_seed: request.use_random_seed.unwrap_or(true),
        audio_format,
        ..GenerationConfig::default()
    };

    Ok(Translation {
        params,
        config,
        lora_name: non_empty(request.lora_name).map(|n| n.trim().to_string()),
        temp_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, ScratchDir) {
        let root = TempDir::new().unwrap();
        let scratch = ScratchDir::new_in(root.path()).unwrap();
        (root, scratch)
    }

    #[test]
    fn test_instrumental_detection() {
        assert!(is_instrumental(None));
        assert!(is_instrumental(Some("")));
        assert!(is_instrumental(Some("   ")));
        assert!(is_instrumental(Some("[inst]")));
        assert!(is_instrumental(Some(" [Instrumental] ")));
        assert!(is_instrumental(Some("[INST]")));
        assert!(!is_instrumental(Some("la la la")));
        assert!(!is_instrumental(Some("[verse]\nhello")));
    }

    #[test]
    fn test_instruction_table() {
        assert_eq!(task_instruction("text2music", None), DEFAULT_INSTRUCTION);
        assert_eq!(task_instruction("vocal2bgm", None), DEFAULT_INSTRUCTION);
        assert_eq!(task_instruction("nonsense", Some("drums")), DEFAULT_INSTRUCTION);
        assert_eq!(
            task_instruction("repaint", None),
            "Repaint the mask area based on the given conditions:"
        );
        assert_eq!(
            task_instruction("extract", Some("vocals")),
            "Extract the vocals track from the audio:"
        );
        assert_eq!(task_instruction("lego", Some("  ")), "Generate the track based on the audio context:");
        assert_eq!(task_instruction("complete", Some("drums")), "Complete the input track with drums:");
    }

    #[test]
    fn test_empty_request_gets_defaults() {
        let (_root, mut scratch) = scratch();
        let t = translate(GenerateRequest::default(), &mut scratch).unwrap();

        assert_eq!(t.params.task_type, "text2music");
        assert_eq!(t.params.instruction, DEFAULT_INSTRUCTION);
        assert!(t.params.instrumental);
        assert_eq!(t.params.duration, -1.0);
        assert_eq!(t.params.repainting_end, -1.0);
        assert_eq!(t.params.inference_steps, 8);
        assert_eq!(t.params.guidance_scale, 7.0);
        assert_eq!(t.params.shift, 3.0);
        assert_eq!(t.params.seed, -1);
        assert_eq!(t.params.vocal_language, "en");
        assert_eq!(t.params.infer_method, "ode");
        assert_eq!(t.params.lm_temperature, 0.85);
        assert_eq!(t.params.lm_cfg_scale, 2.5);
        assert_eq!(t.params.lm_top_p, 0.9);
        assert_eq!(t.params.lm_negative_prompt, "NO USER INPUT");
        assert!(t.params.use_constrained_decoding);
        assert!(t.params.src_audio.is_none());
        assert!(t.params.bpm.is_none());

        assert_eq!(t.config.batch_size, 1);
        assert!(t.config.use_random_seed);
        assert!(!t.config.allow_lm_batch);
        assert_eq!(t.config.audio_format, AudioFormat::Mp3);
        assert!(t.lora_name.is_none());
        assert!(t.temp_files.is_empty());
    }

    #[test]
    fn test_explicit_values_pass_through() {
        let (_root, mut scratch) = scratch();
        let request = GenerateRequest {
            task_type: Some("extract".into()),
            track_name: Some("vocals".into()),
            prompt: Some("jazz trio".into()),
            lyrics: Some("[verse] hello".into()),
            audio_duration: Some(30.0),
            repainting_end: Some(12.5),
            seed: Some(42),
            use_random_seed: Some(false),
            audio_format: Some("FLAC".into()),
            bpm: Some(120),
            lora_name: Some(" jazz ".into()),
            ..Default::default()
        };
        let t = translate(request, &mut scratch).unwrap();

        assert_eq!(t.params.instruction, "Extract the vocals track from the audio:");
        assert_eq!(t.params.caption, "jazz trio");
        assert!(!t.params.instrumental);
        assert_eq!(t.params.duration, 30.0);
        assert_eq!(t.params.repainting_end, 12.5);
        assert_eq!(t.params.seed, 42);
        assert_eq!(t.params.bpm, Some(120));
        assert!(!t.config.use_random_seed);
        assert_eq!(t.config.audio_format, AudioFormat::Flac);
        assert_eq!(t.lora_name.as_deref(), Some("jazz"));
    }

    #[test]
    fn test_zero_duration_is_unspecified() {
        let (_root, mut scratch) = scratch();
        let request = GenerateRequest {
            audio_duration: Some(0.0),
            repainting_end: Some(0.0),
            ..Default::default()
        };
        let t = translate(request, &mut scratch).unwrap();
        assert_eq!(t.params.duration, -1.0);
        assert_eq!(t.params.repainting_end, -1.0);
    }

    #[test]
    fn test_explicit_instruction_wins() {
        let (_root, mut scratch) = scratch();
        let request = GenerateRequest {
            task_type: Some("cover".into()),
            instruction: Some("Do something custom:".into()),
            ..Default::default()
        };
        let t = translate(request, &mut scratch).unwrap();
        assert_eq!(t.params.instruction, "Do something custom:");

        let request = GenerateRequest {
            task_type: Some("cover".into()),
            instruction: Some(String::new()),
            ..Default::default()
        };
        let t = translate(request, &mut scratch).unwrap();
        assert_eq!(
            t.params.instruction,
            "Generate audio semantic tokens based on the given conditions:"
        );
    }

    #[test]
    fn test_audio_inputs_are_staged() {
        let (_root, mut scratch) = scratch();
        let request = GenerateRequest {
            src_audio_base64: Some(BASE64.encode(b"source")),
            reference_audio_base64: Some(BASE64.encode(b"reference")),
            ..Default::default()
        };
        let t = translate(request, &mut scratch).unwrap();

        let src = t.params.src_audio.clone().unwrap();
        let reference = t.params.reference_audio.clone().unwrap();
        assert_eq!(std::fs::read(&src).unwrap(), b"source");
        assert_eq!(std::fs::read(&reference).unwrap(), b"reference");
        assert_eq!(t.temp_files, vec![src, reference]);
    }

    #[test]
    fn test_bad_reference_writes_nothing() {
        let (_root, mut scratch) = scratch();
        let request = GenerateRequest {
            src_audio_base64: Some(BASE64.encode(b"source")),
            reference_audio_base64: Some("not base64!!".into()),
            ..Default::default()
        };
        let err = translate(request, &mut scratch).unwrap_err();

        let translate_err = err.downcast_ref::<TranslateError>().unwrap();
        assert!(matches!(
            translate_err,
            TranslateError::InvalidBase64 { field: "reference_audio_base64", .. }
        ));
        assert!(scratch.issued().is_empty());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unknown_format_is_input_error() {
        let (_root, mut scratch) = scratch();
        let request = GenerateRequest {
            audio_format: Some("ogg".into()),
            ..Default::default()
        };
        let err = translate(request, &mut scratch).unwrap_err();
        assert!(err.downcast_ref::<TranslateError>().is_some());
        assert!(err.to_string().contains("ogg"));
    }
}
