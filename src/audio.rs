//! Conversion of captured audio into the canonical scoring format.
//!
//! Every recording is reduced to 16 kHz mono 16-bit signed PCM in a standard
//! WAV container before any scoring happens. The conversion is a pure
//! transform over the provided bytes; no devices or global state involved.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Sample rate all scoring runs at.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Size of the RIFF header the canonical container carries.
const WAV_HEADER_LEN: usize = 44;

/// A completed capture buffer handed over by the recording front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub data: Vec<u8>,
    /// Declared media type, e.g. `audio/wav` or `audio/l16;rate=44100`.
    pub media_type: String,
}

impl Recording {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
        }
    }
}

/// 16 kHz mono 16-bit PCM with a RIFF header. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalAudio {
    wav: Vec<u8>,
}

impl CanonicalAudio {
    pub fn as_wav_bytes(&self) -> &[u8] {
        &self.wav
    }

    pub fn into_wav_bytes(self) -> Vec<u8> {
        self.wav
    }

    pub fn sample_count(&self) -> usize {
        (self.wav.len() - WAV_HEADER_LEN) / 2
    }

    pub fn duration_secs(&self) -> f32 {
        self.sample_count() as f32 / TARGET_SAMPLE_RATE as f32
    }
}

/// Decode, downmix, resample and quantize a capture into canonical PCM.
///
/// Multichannel input keeps channel 0 only; the pipeline never averages
/// channels because captures are mono microphone takes.
pub fn normalize(recording: &Recording) -> Result<CanonicalAudio, AudioError> {
    let (samples, sample_rate) = decode(recording)?;
    if samples.is_empty() {
        return Err(AudioError::EmptyAudio);
    }

    let samples = if sample_rate == TARGET_SAMPLE_RATE {
        samples
    } else {
        debug!(
            "resampling {} samples from {} Hz to {} Hz",
            samples.len(),
            sample_rate,
            TARGET_SAMPLE_RATE
        );
        resample(&samples, sample_rate, TARGET_SAMPLE_RATE)
    };

    let wav = write_wav(&samples).map_err(|e| AudioError::Decode {
        media_type: recording.media_type.clone(),
        reason: format!("failed to encode canonical container: {e}"),
    })?;

    Ok(CanonicalAudio { wav })
}

/// Decode the declared container into channel-0 float samples.
fn decode(recording: &Recording) -> Result<(Vec<f32>, u32), AudioError> {
    let (essence, params) = parse_media_type(&recording.media_type);

    match essence.as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" => decode_wav(recording),
        "audio/l16" => {
            let rate = param_u32(&params, "rate").unwrap_or(TARGET_SAMPLE_RATE);
            let channels = param_u32(&params, "channels").unwrap_or(1).max(1) as usize;
            let samples = recording
                .data
                .chunks_exact(2)
                .step_by(channels)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
                .collect();
            Ok((samples, rate))
        }
        "audio/pcm" => {
            let rate = param_u32(&params, "rate").unwrap_or(TARGET_SAMPLE_RATE);
            let channels = param_u32(&params, "channels").unwrap_or(1).max(1) as usize;
            let samples = recording
                .data
                .chunks_exact(4)
                .step_by(channels)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            Ok((samples, rate))
        }
        other => Err(AudioError::Decode {
            media_type: recording.media_type.clone(),
            reason: format!("unsupported media type: {other}"),
        }),
    }
}

fn decode_wav(recording: &Recording) -> Result<(Vec<f32>, u32), AudioError> {
    let reader = WavReader::new(Cursor::new(&recording.data)).map_err(|e| AudioError::Decode {
        media_type: recording.media_type.clone(),
        reason: e.to_string(),
    })?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    // Channel 0 of the interleaved stream; remaining channels are dropped.
    let samples: Result<Vec<f32>, hound::Error> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().step_by(channels).collect(),
        SampleFormat::Int => {
            let scale = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| v as f32 / scale))
                .collect()
        }
    };

    let samples = samples.map_err(|e| AudioError::Decode {
        media_type: recording.media_type.clone(),
        reason: e.to_string(),
    })?;

    Ok((samples, spec.sample_rate))
}

/// Linear-interpolation resampler. Fractional source positions blend the two
/// neighboring samples; the upper index clamps to the last sample.
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let out_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let source_index = i as f64 / ratio;
        let index0 = source_index.floor() as usize;
        let index1 = (index0 + 1).min(samples.len() - 1);
        let fraction = (source_index - index0 as f64) as f32;
        out.push(samples[index0] * (1.0 - fraction) + samples[index1] * fraction);
    }

    out
}

/// Clamp to [-1, 1] and scale into i16 range. Negative samples scale by
/// 0x8000 and positive by 0x7FFF so both rails are reachable.
fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 0x8000 as f32) as i16
    } else {
        (s * 0x7FFF as f32) as i16
    }
}

fn write_wav(samples: &[f32]) -> Result<Vec<u8>, hound::Error> {
    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + samples.len() * 2));
    let spec = WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample(quantize(sample))?;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}

fn parse_media_type(media_type: &str) -> (String, Vec<(String, String)>) {
    let mut parts = media_type.split(';');
    let essence = parts.next().unwrap_or_default().trim().to_lowercase();
    let params = parts
        .filter_map(|p| {
            let (key, value) = p.split_once('=')?;
            Some((key.trim().to_lowercase(), value.trim().to_string()))
        })
        .collect();
    (essence, params)
}

fn param_u32(params: &[(String, String)], key: &str) -> Option<u32> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
}
