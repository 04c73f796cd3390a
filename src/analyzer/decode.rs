use crate::models::AudioSamples;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unrecognised audio format: {0}")]
    Probe(String),
    #[error("No audio track found")]
    NoTrack,
    #[error("Unsupported codec: {0}")]
    Codec(String),
    #[error("Decode error: {0}")]
    Packet(String),
    #[error("Audio stream contained no samples")]
    Empty,
}

/// Turns a compressed byte buffer into mono PCM.
///
/// `hint` is a file extension (without the dot) when one is known.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], hint: Option<&str>) -> Result<AudioSamples, DecodeError>;
}

/// Default decoder backed by symphonia. Multi-channel audio is averaged
/// down to mono.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8], hint: Option<&str>) -> Result<AudioSamples, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

        let mut probe_hint = Hint::new();
        if let Some(ext) = hint {
            probe_hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&probe_hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::Probe(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTrack)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
        let mut mono: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Packet(e.to_string())),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::trace!("Skipping corrupt packet: {e}");
                    continue;
                }
                Err(e) => return Err(DecodeError::Packet(e.to_string())),
            };

            let spec = *decoded.spec();
            if sample_rate == 0 {
                sample_rate = spec.rate;
            }
            let channels = spec.channels.count().max(1);

            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);

            mono.extend(
                buf.samples()
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }

        if mono.is_empty() || sample_rate == 0 {
            return Err(DecodeError::Empty);
        }

        log::debug!(
            "Decoded {} samples @ {} Hz ({:.2}s)",
            mono.len(),
            sample_rate,
            mono.len() as f64 / sample_rate as f64
        );
        Ok(AudioSamples::new(mono, sample_rate))
    }
}

/// Encode interleaved samples as a 16-bit PCM WAV file in memory.
#[cfg(test)]
pub(crate) fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in samples {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
