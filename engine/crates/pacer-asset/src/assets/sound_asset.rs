use std::sync::Arc;
use std::time::Duration;

use pacer_gfx::UploadDevice;

use crate::assets::{Asset, AssetBehavior, AssetConfig, Finalized, FinalizeContext, LoadData};
use crate::error::AssetError;
use crate::handle::AssetKind;

#[derive(Clone, Debug, Default)]
pub struct SoundConfig {
    /// 多声道混合为单声道
    pub downmix_to_mono: bool,
}

impl SoundConfig {
    pub(crate) fn from_asset_config(config: &AssetConfig) -> SoundConfig {
        match config {
            AssetConfig::Sound(config) => config.clone(),
            _ => SoundConfig::default(),
        }
    }
}

/// 交错排列的 f32 采样，范围 [-1, 1]
#[derive(Clone, Debug, Default)]
pub struct SoundData {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

#[derive(Clone, Debug)]
pub struct SoundAsset {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Arc<Vec<f32>>,
}

impl Default for SoundAsset {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            samples: Arc::default(),
        }
    }
}

impl SoundAsset {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }
}

impl AssetBehavior for SoundAsset {
    const KIND: AssetKind = AssetKind::Sound;
    type Config = SoundConfig;
    type Data = SoundData;

    /// 声音只存在于 CPU 内存
    fn post_load(data: SoundData, _ctx: &mut FinalizeContext<'_>) -> Result<(Self, Finalized), AssetError> {
        if data.channels == 0 {
            return Err(AssetError::decode(AssetKind::Sound, "sound has no channels"));
        }
        let asset = SoundAsset {
            sample_rate: data.sample_rate,
            channels: data.channels,
            samples: Arc::new(data.samples),
        };
        Ok((asset, Finalized::Loaded))
    }

    fn unload(&mut self, _device: &mut dyn UploadDevice) {
        self.samples = Arc::default();
    }

    /// 静音
    fn empty_data() -> SoundData {
        SoundData {
            sample_rate: 44100,
            channels: 1,
            samples: Vec::new(),
        }
    }

    fn from_load_data(data: LoadData) -> Option<SoundData> {
        match data {
            LoadData::Sound(data) => Some(data),
            _ => None,
        }
    }

    fn into_asset(self) -> Asset {
        Asset::Sound(self)
    }

    fn from_asset(asset: &Asset) -> Option<&Self> {
        match asset {
            Asset::Sound(asset) => Some(asset),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_counts_frames() {
        let sound = SoundAsset {
            sample_rate: 4,
            channels: 2,
            samples: Arc::new(vec![0.0; 16]),
        };
        assert_eq!(sound.duration(), Duration::from_secs(2));
        assert_eq!(SoundAsset::default().duration(), Duration::ZERO);
    }
}
