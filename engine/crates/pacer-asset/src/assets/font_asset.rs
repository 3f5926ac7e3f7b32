use std::collections::HashMap;
use std::sync::Arc;

use pacer_gfx::{PixelFormat, UploadDevice};

use crate::assets::{Asset, AssetBehavior, Finalized, FinalizeContext, ImageAsset, ImageData, LoadData};
use crate::error::AssetError;
use crate::handle::AssetKind;

/// 图集中相邻字形之间的间隔，避免采样时串色
const ATLAS_GLYPH_SPACING: u32 = 1;

/// 查不到字形时使用的字符
pub const FALLBACK_CHAR: char = '\n';

#[derive(Clone, Debug)]
pub struct FontConfig {
    /// 光栅化时的像素大小
    pub size: u32,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self { size: 96 }
    }
}

/// 归一化的图集坐标
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UvRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Glyph {
    /// 像素宽高
    pub size: (u32, u32),
    /// 相对基线的偏移 (left, top)
    pub bearing: (i32, i32),
    pub advance: u32,
    pub uv: UvRect,
}

/// loader 光栅化得到的单个字形，`pixels` 为 R8 覆盖率
#[derive(Clone, Debug)]
pub struct GlyphBitmap {
    pub ch: char,
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
    pub advance: u32,
    pub pixels: Vec<u8>,
}

/// 字形表 + R8 图集
#[derive(Clone, Debug)]
pub struct FontData {
    pub name: String,
    pub base_size: u32,
    pub glyphs: HashMap<char, Glyph>,
    pub atlas: ImageData,
}

impl FontData {
    /// 把字形按行排进一张图集
    ///
    /// 每行 `ceil(sqrt(n))` 个字形，行高取该行最高的字形。
    pub fn from_glyph_bitmaps(
        name: impl Into<String>,
        base_size: u32,
        bitmaps: Vec<GlyphBitmap>,
    ) -> Result<FontData, AssetError> {
        for bitmap in &bitmaps {
            if bitmap.pixels.len() as u64 != bitmap.width as u64 * bitmap.height as u64 {
                return Err(AssetError::decode(
                    AssetKind::Font,
                    format!("glyph {:?} does not match its bitmap size", bitmap.ch),
                ));
            }
        }

        let mut columns = 1;
        while columns * columns < bitmaps.len() {
            columns += 1;
        }

        let mut atlas_width = 1;
        let mut atlas_height = 0;
        for row in bitmaps.chunks(columns) {
            let row_width: u32 = row.iter().map(|b| b.width + ATLAS_GLYPH_SPACING).sum();
            let row_height = row.iter().map(|b| b.height).max().unwrap_or(0) + ATLAS_GLYPH_SPACING;
            atlas_width = atlas_width.max(row_width);
            atlas_height += row_height;
        }
        let atlas_height = atlas_height.max(1);

        let mut pixels = vec![0u8; atlas_width as usize * atlas_height as usize];
        let mut glyphs = HashMap::with_capacity(bitmaps.len());
        let mut y = 0;
        for row in bitmaps.chunks(columns) {
            let mut x = 0;
            for bitmap in row {
                for line in 0..bitmap.height as usize {
                    let src = line * bitmap.width as usize;
                    let dst = (y as usize + line) * atlas_width as usize + x as usize;
                    pixels[dst..dst + bitmap.width as usize]
                        .copy_from_slice(&bitmap.pixels[src..src + bitmap.width as usize]);
                }

                let glyph = Glyph {
                    size: (bitmap.width, bitmap.height),
                    bearing: (bitmap.left, bitmap.top),
                    advance: bitmap.advance,
                    uv: UvRect {
                        x: x as f32 / atlas_width as f32,
                        y: y as f32 / atlas_height as f32,
                        width: bitmap.width as f32 / atlas_width as f32,
                        height: bitmap.height as f32 / atlas_height as f32,
                    },
                };
                glyphs.insert(bitmap.ch, glyph);
                x += bitmap.width + ATLAS_GLYPH_SPACING;
            }
            y += row.iter().map(|b| b.height).max().unwrap_or(0) + ATLAS_GLYPH_SPACING;
        }

        Ok(FontData {
            name: name.into(),
            base_size,
            glyphs,
            atlas: ImageData::new(atlas_width, atlas_height, PixelFormat::R8, pixels),
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct FontAsset {
    pub name: String,
    pub base_size: u32,
    pub glyphs: Arc<HashMap<char, Glyph>>,
    pub atlas: ImageAsset,
}

impl FontAsset {
    #[inline]
    pub fn has_glyphs(&self) -> bool {
        !self.glyphs.is_empty()
    }

    /// 查不到时退回 [`FALLBACK_CHAR`] 的字形
    pub fn get_glyph(&self, ch: char) -> Option<&Glyph> {
        self.glyphs.get(&ch).or_else(|| self.glyphs.get(&FALLBACK_CHAR))
    }
}

impl AssetBehavior for FontAsset {
    const KIND: AssetKind = AssetKind::Font;
    type Config = FontConfig;
    type Data = FontData;

    fn post_load(data: FontData, ctx: &mut FinalizeContext<'_>) -> Result<(Self, Finalized), AssetError> {
        let _span = tracy_client::span!("FontAsset::post_load");
        let (atlas, finalized) = ImageAsset::create_and_upload(data.atlas, ctx)?;
        let asset = FontAsset {
            name: data.name,
            base_size: data.base_size,
            glyphs: Arc::new(data.glyphs),
            atlas,
        };
        Ok((asset, finalized))
    }

    fn unload(&mut self, device: &mut dyn UploadDevice) {
        self.atlas.unload(device);
        self.glyphs = Arc::default();
    }

    /// 没有任何字形的字体，图集为 1x1
    fn empty_data() -> FontData {
        FontData {
            name: String::new(),
            base_size: FontConfig::default().size,
            glyphs: HashMap::new(),
            atlas: ImageData::new(1, 1, PixelFormat::R8, vec![0]),
        }
    }

    fn from_load_data(data: LoadData) -> Option<FontData> {
        match data {
            LoadData::Font(data) => Some(data),
            _ => None,
        }
    }

    fn into_asset(self) -> Asset {
        Asset::Font(self)
    }

    fn from_asset(asset: &Asset) -> Option<&Self> {
        match asset {
            Asset::Font(asset) => Some(asset),
            _ => None,
        }
    }
}
