//! 异步资源加载与纹理流式上传
//!
//! - [`AssetHub`]：资源 registry，提供 `load_from_file` / `get_or_empty` / `unload`
//! - [`io_worker`]：后台读取与解码
//! - [`streaming`]：staging buffer 环形缓冲 + fence 的纹理上传
//!
//! 主线程每帧调用 `process_loading_queue` 与 `process_texture_uploads`，
//! 两者都受时间或容量约束，不会阻塞等待工作线程。

pub mod asset_hub;
pub mod assets;
pub mod error;
pub mod handle;
pub mod io_worker;
pub mod loaders;
pub mod slot;
pub mod streaming;

pub use asset_hub::{AssetEvent, AssetHub, AssetHubConfig};
pub use assets::{
    Asset, AssetBehavior, AssetConfig, FontAsset, FontConfig, FontData, Glyph, GlyphBitmap, ImageAsset, ImageConfig,
    ImageData, LoadData, MeshData, MipLevel, ModelAsset, ModelConfig, ModelData, SoundAsset, SoundConfig, SoundData,
    UvRect,
};
pub use error::AssetError;
pub use handle::{AssetId, AssetKind, AssetSource, LoadStatus};
pub use loaders::{AssetLoader, LoaderRegistry};
pub use streaming::{StreamingConfig, StreamingError, TextureStreamer, UploadStats};
