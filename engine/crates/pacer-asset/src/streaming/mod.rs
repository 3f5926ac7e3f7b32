//! 纹理流式上传
//!
//! 一组 staging buffer 组成环形缓冲，每个 buffer 配一个 fence：
//! - fence signaled 之前 CPU 不会写入对应 buffer
//! - 每帧把尽可能多的待上传请求打包进可用的 buffer，放不下的留到之后的帧
//! - buffer 不够大时按页大小整体扩容

mod texture_streamer;
mod upload_buffer;

use std::sync::{Arc, Weak};

use pacer_gfx::{GfxError, PixelFormat, TextureHandle, format::align_up};
use serde::{Deserialize, Serialize};

use crate::slot::AssetSlot;

pub use texture_streamer::{TextureStreamer, UploadStats};
pub use upload_buffer::TextureUploadBuffer;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub initial_buffer_size: u64,
    pub buffer_count: usize,
    pub page_size: u64,
    pub max_buffer_size: u64,
    /// `upload_texture_immediate` 等待 fence 的上限，单位秒
    pub fence_timeout: f64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: 640 * 480 * 4,
            buffer_count: 3,
            page_size: 4096,
            max_buffer_size: 256 * 1024 * 1024,
            fence_timeout: 5.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamingError {
    #[error("texture upload of {requested} bytes exceeds max staging buffer size {max}")]
    Overflow { requested: u64, max: u64 },

    #[error("timed out waiting for staging buffer {0}")]
    Timeout(usize),

    #[error(transparent)]
    Gfx(#[from] GfxError),
}

/// 纹理中的一个子资源（一层 mip）在像素数据中的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadInfo {
    pub data_offset: u64,
    pub size: u64,
    pub mip_level: u32,
    pub width: u32,
    pub height: u32,
}

/// 一个待上传的纹理
pub struct TextureUploadRequest {
    /// 上传完成后需要通知的资源；资源被卸载后 upgrade 失败
    pub target: Weak<AssetSlot>,
    pub texture: TextureHandle,
    pub format: PixelFormat,
    pub pixels: Arc<[u8]>,
    pub infos: Vec<UploadInfo>,
}

impl TextureUploadRequest {
    /// 从 `start` 开始按格式对齐依次放置每个子资源，返回每个子资源的 offset 以及结束位置
    pub(crate) fn layout(&self, start: u64) -> (Vec<u64>, u64) {
        let alignment = self.format.required_alignment();
        let mut offset = start;
        let offsets = self
            .infos
            .iter()
            .map(|info| {
                let aligned = align_up(offset, alignment);
                offset = aligned + info.size;
                aligned
            })
            .collect();
        (offsets, offset)
    }

    /// 放在 buffer 起始位置时需要的字节数
    #[inline]
    pub fn packed_size(&self) -> u64 {
        self.layout(0).1
    }
}
