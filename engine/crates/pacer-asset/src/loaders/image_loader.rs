use image::imageops::FilterType;
use image::{ColorType, ImageBuffer, Pixel};
use pacer_gfx::PixelFormat;

use crate::assets::{AssetConfig, ImageConfig, ImageData, LoadData, MipLevel};
use crate::error::AssetError;
use crate::handle::AssetKind;
use crate::loaders::AssetLoader;

/// PNG / JPEG / BMP 等 `image` 能识别的格式
///
/// 16-bit 图像保持 16-bit 精度（`Rgba16`），其余统一转换为 RGBA8。
pub struct ImageLoader;

impl AssetLoader for ImageLoader {
    fn name(&self) -> &'static str {
        "image"
    }

    fn kind(&self) -> AssetKind {
        AssetKind::Image
    }

    fn can_process(&self, bytes: &[u8]) -> bool {
        image::guess_format(bytes).is_ok()
    }

    fn load_from_binary(&self, bytes: &[u8], config: &AssetConfig) -> Result<LoadData, AssetError> {
        let _span = tracy_client::span!("ImageLoader::load_from_binary");
        let config = ImageConfig::from_asset_config(config);

        let format = image::guess_format(bytes).map_err(|e| AssetError::decode(AssetKind::Image, e))?;
        let img = image::load_from_memory_with_format(bytes, format).map_err(|e| AssetError::decode(AssetKind::Image, e))?;

        let data = match img.color() {
            ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
                build_image_data(img.to_rgba16(), PixelFormat::Rgba16, config.generate_mips)
            }
            _ => {
                let format = if config.srgb { PixelFormat::Rgba8Srgb } else { PixelFormat::Rgba8 };
                build_image_data(img.to_rgba8(), format, config.generate_mips)
            }
        };
        Ok(LoadData::Image(data))
    }
}

/// 把 level 0 以及（可选的）逐级缩小的 mip 紧密拼接在一起
fn build_image_data<P>(base: ImageBuffer<P, Vec<P::Subpixel>>, format: PixelFormat, generate_mips: bool) -> ImageData
where
    P: Pixel + 'static,
    P::Subpixel: bytemuck::Pod,
{
    let (width, height) = base.dimensions();
    let mut pixels = Vec::new();
    let mut levels = Vec::new();

    let mut push_level = |level: &ImageBuffer<P, Vec<P::Subpixel>>| {
        let bytes: &[u8] = bytemuck::cast_slice(level.as_raw());
        levels.push(MipLevel {
            offset: pixels.len() as u64,
            size: bytes.len() as u64,
            width: level.width(),
            height: level.height(),
        });
        pixels.extend_from_slice(bytes);
    };

    push_level(&base);
    if generate_mips {
        let mut current = base;
        while current.width() > 1 || current.height() > 1 {
            let next_width = (current.width() / 2).max(1);
            let next_height = (current.height() / 2).max(1);
            current = image::imageops::resize(&current, next_width, next_height, FilterType::Triangle);
            push_level(&current);
        }
    }

    ImageData {
        width,
        height,
        format,
        levels,
        pixels,
    }
}
