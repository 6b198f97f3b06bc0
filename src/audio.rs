//! Audio-level analysis (C1) and WAV framing helpers.

/// Root-mean-square energy of a 16-bit signed PCM frame: `sqrt(Σ sample² / N)`.
///
/// Pure function, used only by the barge-in controller (C8); STT receives
/// the unmodified frame.
pub fn rms_i16(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Build a 44-byte canonical RIFF/WAVE header for mono, 16-bit PCM audio of
/// `data_len` bytes at `sample_rate`.
///
/// Raw-PCM TTS chunks are prepended with a freshly built header on every
/// outbound chunk (§6), since each chunk is a self-contained WAV file from
/// the client's perspective.
pub fn wav_header(data_len: u32, sample_rate: u32) -> [u8; 44] {
    let channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * u32::from(channels) * u32::from(bits_per_sample) / 8;
    let block_align = channels * bits_per_sample / 8;
    let riff_chunk_size = 36 + data_len;

    let mut header = [0u8; 44];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Prepend a WAV header to little-endian `i16` PCM samples, returning a
/// self-contained WAV byte buffer.
pub fn wav_wrap(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + samples.len() * 2);
    buf.extend_from_slice(&wav_header(data_len, sample_rate));
    for sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms_i16(&[0; 64]), 0.0);
    }

    #[test]
    fn rms_of_empty_is_zero() {
        assert_eq!(rms_i16(&[]), 0.0);
    }

    #[test]
    fn rms_of_constant_signal() {
        let samples = vec![1000i16; 10];
        assert!((rms_i16(&samples) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn wav_header_has_riff_magic() {
        let header = wav_header(100, 44_100);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn wav_wrap_length_matches_samples_plus_header() {
        let samples = vec![0i16; 50];
        let wrapped = wav_wrap(&samples, 16_000);
        assert_eq!(wrapped.len(), 44 + 100);
    }
}
