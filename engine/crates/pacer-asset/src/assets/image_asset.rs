use std::sync::Arc;

use pacer_gfx::{PixelFormat, TextureDesc, TextureHandle, UploadDevice};

use crate::assets::{Asset, AssetBehavior, AssetConfig, Finalized, FinalizeContext, LoadData};
use crate::error::AssetError;
use crate::handle::AssetKind;
use crate::streaming::{TextureUploadRequest, UploadInfo};

#[derive(Clone, Debug, Default)]
pub struct ImageConfig {
    /// 在 CPU 上生成完整的 mip chain
    pub generate_mips: bool,
    /// 8-bit 图像按 sRGB 处理
    pub srgb: bool,
}

/// 一层 mip 在 `ImageData::pixels` 中的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MipLevel {
    pub offset: u64,
    pub size: u64,
    pub width: u32,
    pub height: u32,
}

/// 解码后的像素数据，所有 mip 紧密排列在 `pixels` 中
#[derive(Clone, Debug)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub levels: Vec<MipLevel>,
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// 只有一层 mip 的图像
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Self {
        let level = MipLevel {
            offset: 0,
            size: pixels.len() as u64,
            width,
            height,
        };
        Self {
            width,
            height,
            format,
            levels: vec![level],
            pixels,
        }
    }

    pub fn validate(&self) -> Result<(), AssetError> {
        if self.width == 0 || self.height == 0 || self.levels.is_empty() {
            return Err(AssetError::decode(AssetKind::Image, "image has no pixels"));
        }
        for (index, level) in self.levels.iter().enumerate() {
            let expected = self.format.level_size(level.width, level.height);
            let out_of_range = level
                .offset
                .checked_add(level.size)
                .is_none_or(|end| end > self.pixels.len() as u64);
            if level.size != expected || out_of_range {
                return Err(AssetError::decode(
                    AssetKind::Image,
                    format!("mip level {} does not match its pixel data", index),
                ));
            }
        }
        Ok(())
    }
}

/// 已经创建 GPU 纹理的图像
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageAsset {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mip_levels: u32,
    pub texture: Option<TextureHandle>,
}

impl Default for ImageAsset {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::Rgba8,
            mip_levels: 0,
            texture: None,
        }
    }
}

impl ImageAsset {
    /// 创建纹理并把像素交给 streamer；字体图集也走这条路径
    pub(crate) fn create_and_upload(
        data: ImageData,
        ctx: &mut FinalizeContext<'_>,
    ) -> Result<(ImageAsset, Finalized), AssetError> {
        data.validate()?;

        let desc = TextureDesc::new(data.width, data.height, data.format, format!("image-{}x{}", data.width, data.height))
            .with_mip_levels(data.levels.len() as u32);
        let texture = ctx.device.create_texture(&desc)?;

        let infos = data
            .levels
            .iter()
            .enumerate()
            .map(|(mip_level, level)| UploadInfo {
                data_offset: level.offset,
                size: level.size,
                mip_level: mip_level as u32,
                width: level.width,
                height: level.height,
            })
            .collect();
        let request = TextureUploadRequest {
            target: ctx.target.clone(),
            texture,
            format: data.format,
            pixels: Arc::from(data.pixels),
            infos,
        };

        // 失败时纹理已经由 streamer 销毁
        let finalized = if ctx.immediate {
            ctx.streamer.upload_texture_immediate(&mut *ctx.device, request)?;
            Finalized::Loaded
        } else {
            ctx.streamer.upload_texture(&mut *ctx.device, request)?;
            Finalized::Uploading
        };

        let asset = ImageAsset {
            width: data.width,
            height: data.height,
            format: data.format,
            mip_levels: data.levels.len() as u32,
            texture: Some(texture),
        };
        Ok((asset, finalized))
    }
}

impl AssetBehavior for ImageAsset {
    const KIND: AssetKind = AssetKind::Image;
    type Config = ImageConfig;
    type Data = ImageData;

    fn post_load(data: ImageData, ctx: &mut FinalizeContext<'_>) -> Result<(Self, Finalized), AssetError> {
        let _span = tracy_client::span!("ImageAsset::post_load");
        ImageAsset::create_and_upload(data, ctx)
    }

    fn unload(&mut self, device: &mut dyn UploadDevice) {
        if let Some(texture) = self.texture.take() {
            device.destroy_texture(texture);
        }
    }

    /// 1x1 的品红色纹理
    fn empty_data() -> ImageData {
        ImageData::new(1, 1, PixelFormat::Rgba8, vec![255, 0, 255, 255])
    }

    fn from_load_data(data: LoadData) -> Option<ImageData> {
        match data {
            LoadData::Image(data) => Some(data),
            _ => None,
        }
    }

    fn into_asset(self) -> Asset {
        Asset::Image(self)
    }

    fn from_asset(asset: &Asset) -> Option<&Self> {
        match asset {
            Asset::Image(asset) => Some(asset),
            _ => None,
        }
    }
}

impl From<ImageData> for LoadData {
    fn from(data: ImageData) -> Self {
        LoadData::Image(data)
    }
}

impl ImageConfig {
    pub(crate) fn from_asset_config(config: &AssetConfig) -> ImageConfig {
        match config {
            AssetConfig::Image(config) => config.clone(),
            _ => ImageConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_truncated_pixels() {
        let mut data = ImageData::new(2, 2, PixelFormat::Rgba8, vec![0; 16]);
        assert!(data.validate().is_ok());

        data.pixels.truncate(8);
        assert!(matches!(data.validate(), Err(AssetError::Decode { .. })));
    }

    #[test]
    fn test_validate_rejects_overflowing_mip_offset() {
        let mut data = ImageData::new(1, 1, PixelFormat::Rgba8, vec![0; 4]);
        data.levels[0].offset = u64::MAX;
        assert!(matches!(data.validate(), Err(AssetError::Decode { .. })));
    }

    #[test]
    fn test_validate_rejects_empty_image() {
        let data = ImageData::new(0, 0, PixelFormat::Rgba8, Vec::new());
        assert!(data.validate().is_err());
    }
}
