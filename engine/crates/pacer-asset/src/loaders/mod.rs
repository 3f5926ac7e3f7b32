//! 文件格式解码器
//!
//! 通过文件头的 magic number 选择 loader，不依赖扩展名。

mod image_loader;
mod obj_loader;
mod wav_loader;

use std::sync::{Arc, PoisonError, RwLock};

use crate::assets::{AssetConfig, LoadData};
use crate::error::AssetError;
use crate::handle::AssetKind;

pub use image_loader::ImageLoader;
pub use obj_loader::ObjLoader;
pub use wav_loader::WavLoader;

/// 把一段二进制数据解码为某一类资源的 CPU 数据
///
/// 在工作线程上调用，因此必须是 `Send + Sync`。
pub trait AssetLoader: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> AssetKind;
    /// 根据文件头判断能否处理
    fn can_process(&self, bytes: &[u8]) -> bool;
    fn load_from_binary(&self, bytes: &[u8], config: &AssetConfig) -> Result<LoadData, AssetError>;
}

/// 已注册的 loader 集合，可以在工作线程之间共享
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: RwLock<Vec<Arc<dyn AssetLoader>>>,
}

impl LoaderRegistry {
    /// 包含图片、OBJ 模型、WAV 声音的内置 loader
    pub fn with_builtin_loaders() -> Self {
        let registry = Self::default();
        registry.register(ImageLoader);
        registry.register(ObjLoader);
        registry.register(WavLoader);
        registry
    }

    /// 后注册的 loader 优先
    pub fn register(&self, loader: impl AssetLoader + 'static) {
        log::info!("register asset loader: {} ({:?})", loader.name(), loader.kind());
        self.loaders.write().unwrap_or_else(PoisonError::into_inner).push(Arc::new(loader));
    }

    pub fn find(&self, kind: AssetKind, bytes: &[u8]) -> Option<Arc<dyn AssetLoader>> {
        let loaders = self.loaders.read().unwrap_or_else(PoisonError::into_inner);
        loaders.iter().rev().find(|loader| loader.kind() == kind && loader.can_process(bytes)).cloned()
    }

    pub fn decode(&self, kind: AssetKind, bytes: &[u8], config: &AssetConfig) -> Result<LoadData, AssetError> {
        let loader = self.find(kind, bytes).ok_or(AssetError::NoLoader(kind))?;
        let data = loader.load_from_binary(bytes, config)?;
        if data.kind() != kind {
            return Err(AssetError::decode(
                kind,
                format!("loader '{}' produced {:?} data", loader.name(), data.kind()),
            ));
        }
        Ok(data)
    }

    pub fn len(&self) -> usize {
        self.loaders.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{FontData, GlyphBitmap};

    struct TestFontLoader;

    impl AssetLoader for TestFontLoader {
        fn name(&self) -> &'static str {
            "test-font"
        }

        fn kind(&self) -> AssetKind {
            AssetKind::Font
        }

        fn can_process(&self, bytes: &[u8]) -> bool {
            bytes.starts_with(b"FONT")
        }

        fn load_from_binary(&self, bytes: &[u8], _config: &AssetConfig) -> Result<LoadData, AssetError> {
            let glyph = GlyphBitmap {
                ch: 'F',
                width: 1,
                height: 1,
                left: 0,
                top: 1,
                advance: 1,
                pixels: vec![bytes.len() as u8],
            };
            Ok(LoadData::Font(FontData::from_glyph_bitmaps("test", 12, vec![glyph])?))
        }
    }

    #[test]
    fn test_fonts_have_no_builtin_loader() {
        let registry = LoaderRegistry::with_builtin_loaders();
        let config = AssetConfig::Font(Default::default());
        assert!(matches!(
            registry.decode(AssetKind::Font, b"FONTDATA", &config),
            Err(AssetError::NoLoader(AssetKind::Font))
        ));

        registry.register(TestFontLoader);
        let data = registry.decode(AssetKind::Font, b"FONTDATA", &config).unwrap();
        assert_eq!(data.kind(), AssetKind::Font);
    }

    #[test]
    fn test_loader_must_match_kind_and_magic() {
        let registry = LoaderRegistry::with_builtin_loaders();
        // PNG 文件头不会被当作声音
        let png_magic = b"\x89PNG\r\n\x1a\n";
        assert!(registry.find(AssetKind::Sound, png_magic).is_none());
        assert!(registry.find(AssetKind::Image, png_magic).is_some());
        assert!(registry.find(AssetKind::Image, b"garbage").is_none());
    }
}
