use std::path::{Path, PathBuf};

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::error::{Error, Result};
use crate::{DecodeOptions, ModelLoader, ModelSegment, Task};

/// whisper.cpp-backed model. One context per loaded checkpoint; a fresh
/// decode state is created per inference call.
pub struct WhisperModel {
    ctx: WhisperContext,
}

impl ModelLoader for WhisperModel {
    fn load(model_id: &str) -> Result<Self> {
        let path = resolve_model_path(model_id)
            .ok_or_else(|| Error::ModelFileNotFound(model_id.to_string()))?;

        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu(true);

        let path_str = path
            .to_str()
            .ok_or_else(|| Error::ModelFileNotFound(path.display().to_string()))?;
        let ctx = WhisperContext::new_with_params(path_str, ctx_params)
            .map_err(|e| Error::LoadFailed(e.to_string()))?;

        Ok(Self { ctx })
    }

    fn transcribe(&self, audio_path: &Path, options: &DecodeOptions) -> Result<Vec<ModelSegment>> {
        let samples = read_canonical_wav(audio_path)?;

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| Error::Inference(e.to_string()))?;

        let language = options.language.clone();
        let initial_prompt = options.initial_prompt.clone();

        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: 5,
            patience: 1.0,
        });
        params.set_language(language.as_deref().or(Some("auto")));
        params.set_translate(options.task == Task::Translate);
        params.set_temperature(options.temperature.unwrap_or(0.0));
        if let Some(prompt) = initial_prompt.as_deref() {
            params.set_initial_prompt(prompt);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &samples)
            .map_err(|e| Error::Inference(e.to_string()))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| Error::Inference(e.to_string()))?;

        let mut segments = Vec::with_capacity(num_segments as usize);
        for i in 0..num_segments {
            let text = state
                .full_get_segment_text(i)
                .map_err(|e| Error::Inference(e.to_string()))?;
            let t0 = state
                .full_get_segment_t0(i)
                .map_err(|e| Error::Inference(e.to_string()))?;
            let t1 = state
                .full_get_segment_t1(i)
                .map_err(|e| Error::Inference(e.to_string()))?;

            let text = text.trim().to_string();
            if text.is_empty() {
                continue;
            }
            // whisper timestamps are centiseconds
            segments.push(ModelSegment {
                start: t0 as f64 / 100.0,
                end: t1 as f64 / 100.0,
                text,
            });
        }

        Ok(segments)
    }
}

/// Accepts either a checkpoint path or a bare model name resolved against
/// the conventional `models/ggml-{name}.bin` location.
fn resolve_model_path(model_id: &str) -> Option<PathBuf> {
    let direct = PathBuf::from(model_id);
    if direct.is_file() {
        return Some(direct);
    }
    let conventional = PathBuf::from("models").join(format!("ggml-{model_id}.bin"));
    conventional.is_file().then_some(conventional)
}

/// Reads the extractor's canonical WAV (mono, 16 kHz, s16le) into the f32
/// samples whisper.cpp expects.
fn read_canonical_wav(path: &Path) -> Result<Vec<f32>> {
    let reader = hound::WavReader::open(path).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    if spec.channels != 1 || spec.sample_rate != 16_000 || spec.bits_per_sample != 16 {
        return Err(Error::Audio(format!(
            "expected mono 16kHz s16 wav, got {}ch {}Hz {}bit",
            spec.channels, spec.sample_rate, spec.bits_per_sample
        )));
    }

    let samples: std::result::Result<Vec<i16>, _> = reader.into_samples::<i16>().collect();
    let samples = samples.map_err(|e| Error::Audio(e.to_string()))?;
    Ok(samples.iter().map(|&s| s as f32 / 32768.0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(sample_rate / 10) {
            writer.write_sample((i % 100) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn canonical_wav_is_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audio.wav");
        write_wav(&path, 16_000, 1);

        let samples = read_canonical_wav(&path).unwrap();
        assert_eq!(samples.len(), 1600);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn non_canonical_wav_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audio.wav");
        write_wav(&path, 44_100, 2);

        assert!(matches!(read_canonical_wav(&path), Err(Error::Audio(_))));
    }

    #[test]
    fn unknown_model_id_does_not_resolve() {
        assert!(resolve_model_path("definitely-not-a-model-here").is_none());
    }
}
