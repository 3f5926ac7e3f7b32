//! 资源类型
//!
//! 封闭的 [`Asset`] 枚举 + [`AssetBehavior`] trait：
//! - `load_from_file` / `load_from_data` 在工作线程执行，只做 IO 与 CPU 解码
//! - `post_load` 在主线程执行，创建 GPU 资源
//! - `unload` 在主线程执行，释放 GPU 资源

mod font_asset;
mod image_asset;
mod model_asset;
mod sound_asset;

use std::fs;
use std::path::Path;
use std::sync::Weak;

use pacer_gfx::UploadDevice;

use crate::error::AssetError;
use crate::handle::AssetKind;
use crate::loaders::LoaderRegistry;
use crate::slot::AssetSlot;
use crate::streaming::TextureStreamer;

pub use font_asset::{FALLBACK_CHAR, FontAsset, FontConfig, FontData, Glyph, GlyphBitmap, UvRect};
pub use image_asset::{ImageAsset, ImageConfig, ImageData, MipLevel};
pub use model_asset::{MeshData, ModelAsset, ModelConfig, ModelData, VERTEX_FLOATS};
pub use sound_asset::{SoundAsset, SoundConfig, SoundData};

#[derive(Clone, Debug)]
pub enum Asset {
    Image(ImageAsset),
    Model(ModelAsset),
    Sound(SoundAsset),
    Font(FontAsset),
}

impl Asset {
    pub fn kind(&self) -> AssetKind {
        match self {
            Asset::Image(_) => AssetKind::Image,
            Asset::Model(_) => AssetKind::Model,
            Asset::Sound(_) => AssetKind::Sound,
            Asset::Font(_) => AssetKind::Font,
        }
    }

    /// 尚未加载时 slot 中存放的占位资源，不持有任何 GPU 资源
    pub(crate) fn placeholder(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Image => Asset::Image(ImageAsset::default()),
            AssetKind::Model => Asset::Model(ModelAsset::default()),
            AssetKind::Sound => Asset::Sound(SoundAsset::default()),
            AssetKind::Font => Asset::Font(FontAsset::default()),
        }
    }

    pub(crate) fn unload(&mut self, device: &mut dyn UploadDevice) {
        match self {
            Asset::Image(asset) => asset.unload(device),
            Asset::Model(asset) => asset.unload(device),
            Asset::Sound(asset) => asset.unload(device),
            Asset::Font(asset) => asset.unload(device),
        }
    }
}

/// 工作线程解码得到的 CPU 数据
#[derive(Debug)]
pub enum LoadData {
    Image(ImageData),
    Model(ModelData),
    Sound(SoundData),
    Font(FontData),
}

impl LoadData {
    pub fn kind(&self) -> AssetKind {
        match self {
            LoadData::Image(_) => AssetKind::Image,
            LoadData::Model(_) => AssetKind::Model,
            LoadData::Sound(_) => AssetKind::Sound,
            LoadData::Font(_) => AssetKind::Font,
        }
    }
}

/// 每次加载的参数
#[derive(Clone, Debug)]
pub enum AssetConfig {
    Image(ImageConfig),
    Model(ModelConfig),
    Sound(SoundConfig),
    Font(FontConfig),
}

impl From<ImageConfig> for AssetConfig {
    fn from(config: ImageConfig) -> Self {
        AssetConfig::Image(config)
    }
}

impl From<ModelConfig> for AssetConfig {
    fn from(config: ModelConfig) -> Self {
        AssetConfig::Model(config)
    }
}

impl From<SoundConfig> for AssetConfig {
    fn from(config: SoundConfig) -> Self {
        AssetConfig::Sound(config)
    }
}

impl From<FontConfig> for AssetConfig {
    fn from(config: FontConfig) -> Self {
        AssetConfig::Font(config)
    }
}

/// `post_load` 结束后资源所处的阶段
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Finalized {
    Loaded,
    /// 纹理数据还在等待 staging buffer，流式系统完成后会把资源标记为 Loaded
    Uploading,
}

/// `post_load` 可以访问的主线程资源
pub struct FinalizeContext<'a> {
    pub device: &'a mut dyn UploadDevice,
    pub streamer: &'a mut TextureStreamer,
    /// 被 finalize 的资源；内部创建的资源使用 `Weak::new()`
    pub target: Weak<AssetSlot>,
    /// 为 true 时纹理走阻塞上传路径，`post_load` 返回时必定已经 Loaded
    pub immediate: bool,
}

pub trait AssetBehavior: Clone + Default + 'static {
    const KIND: AssetKind;
    type Config: Clone + Default + Into<AssetConfig>;
    type Data: Send + 'static;

    fn load_from_file(path: &Path, config: &AssetConfig, loaders: &LoaderRegistry) -> Result<LoadData, AssetError> {
        let bytes = fs::read(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_from_data(&bytes, config, loaders)
    }

    /// 默认交给 registry 中能处理这段数据的 loader
    fn load_from_data(bytes: &[u8], config: &AssetConfig, loaders: &LoaderRegistry) -> Result<LoadData, AssetError> {
        loaders.decode(Self::KIND, bytes, config)
    }

    fn post_load(data: Self::Data, ctx: &mut FinalizeContext<'_>) -> Result<(Self, Finalized), AssetError>;

    fn unload(&mut self, device: &mut dyn UploadDevice);

    /// 内置空资源的数据
    fn empty_data() -> Self::Data;

    fn from_load_data(data: LoadData) -> Option<Self::Data>;
    fn into_asset(self) -> Asset;
    fn from_asset(asset: &Asset) -> Option<&Self>;
}

/// 根据 kind 在主线程 finalize 一份解码结果
pub(crate) fn finalize(
    kind: AssetKind,
    data: LoadData,
    ctx: &mut FinalizeContext<'_>,
) -> Result<(Asset, Finalized), AssetError> {
    match kind {
        AssetKind::Image => finalize_as::<ImageAsset>(data, ctx),
        AssetKind::Model => finalize_as::<ModelAsset>(data, ctx),
        AssetKind::Sound => finalize_as::<SoundAsset>(data, ctx),
        AssetKind::Font => finalize_as::<FontAsset>(data, ctx),
    }
}

pub(crate) fn finalize_as<T: AssetBehavior>(
    data: LoadData,
    ctx: &mut FinalizeContext<'_>,
) -> Result<(Asset, Finalized), AssetError> {
    let actual = data.kind();
    let data = T::from_load_data(data)
        .ok_or_else(|| AssetError::decode(T::KIND, format!("loader produced {:?} data", actual)))?;
    let (asset, finalized) = T::post_load(data, ctx)?;
    Ok((asset.into_asset(), finalized))
}

/// 根据 kind 在工作线程解码一段数据
pub(crate) fn decode(
    kind: AssetKind,
    bytes: &[u8],
    config: &AssetConfig,
    loaders: &LoaderRegistry,
) -> Result<LoadData, AssetError> {
    match kind {
        AssetKind::Image => ImageAsset::load_from_data(bytes, config, loaders),
        AssetKind::Model => ModelAsset::load_from_data(bytes, config, loaders),
        AssetKind::Sound => SoundAsset::load_from_data(bytes, config, loaders),
        AssetKind::Font => FontAsset::load_from_data(bytes, config, loaders),
    }
}
