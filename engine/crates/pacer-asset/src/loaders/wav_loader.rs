use std::io::Cursor;

use crate::assets::{AssetConfig, LoadData, SoundConfig, SoundData};
use crate::error::AssetError;
use crate::handle::AssetKind;
use crate::loaders::AssetLoader;

/// RIFF/WAVE 文件，采样统一转换为 f32
pub struct WavLoader;

impl AssetLoader for WavLoader {
    fn name(&self) -> &'static str {
        "wav"
    }

    fn kind(&self) -> AssetKind {
        AssetKind::Sound
    }

    fn can_process(&self, bytes: &[u8]) -> bool {
        bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
    }

    fn load_from_binary(&self, bytes: &[u8], config: &AssetConfig) -> Result<LoadData, AssetError> {
        let _span = tracy_client::span!("WavLoader::load_from_binary");
        let config = SoundConfig::from_asset_config(config);

        let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| AssetError::decode(AssetKind::Sound, e))?;
        let spec = reader.spec();

        let samples: Result<Vec<f32>, _> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect(),
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader.samples::<i32>().map(|sample| sample.map(|s| s as f32 / max_value)).collect()
            }
        };
        let mut samples = samples.map_err(|e| AssetError::decode(AssetKind::Sound, e))?;

        let mut channels = spec.channels;
        if config.downmix_to_mono && channels > 1 {
            samples = samples
                .chunks(channels as usize)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect();
            channels = 1;
        }

        Ok(LoadData::Sound(SoundData {
            sample_rate: spec.sample_rate,
            channels,
            samples,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_wav(channels: u16, frames: &[[i16; 2]]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut bytes, spec).unwrap();
            for frame in frames {
                for sample in &frame[..channels as usize] {
                    writer.write_sample(*sample).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        bytes.into_inner()
    }

    #[test]
    fn test_decode_int_samples_to_float() {
        let bytes = encode_wav(2, &[[16384, -16384], [0, 32767]]);
        assert!(WavLoader.can_process(&bytes));

        let LoadData::Sound(sound) = WavLoader.load_from_binary(&bytes, &SoundConfig::default().into()).unwrap() else {
            panic!("expected sound data");
        };
        assert_eq!(sound.channels, 2);
        assert_eq!(sound.sample_rate, 8000);
        assert_eq!(sound.samples.len(), 4);
        assert!((sound.samples[0] - 0.5).abs() < 1e-4);
        assert!((sound.samples[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_downmix_to_mono() {
        let bytes = encode_wav(2, &[[16384, -16384], [16384, 16384]]);
        let config = SoundConfig { downmix_to_mono: true };
        let LoadData::Sound(sound) = WavLoader.load_from_binary(&bytes, &config.into()).unwrap() else {
            panic!("expected sound data");
        };
        assert_eq!(sound.channels, 1);
        assert_eq!(sound.samples.len(), 2);
        assert!(sound.samples[0].abs() < 1e-4);
        assert!((sound.samples[1] - 0.5).abs() < 1e-4);
    }
}
