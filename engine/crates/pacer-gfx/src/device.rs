use std::time::Duration;

use crate::format::{TextureCopy, TextureDesc};
use crate::handles::{FenceHandle, GpuBufferHandle, StagingBufferHandle, TextureHandle};
use crate::mapped::MappedRegion;

#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("invalid {0} handle")]
    InvalidHandle(&'static str),

    #[error("write of {len} bytes at offset {offset} exceeds mapped region of {size} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[error("failed to load vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[error("no physical device with a graphics + transfer queue")]
    NoSuitableDevice,
}

/// 纹理流式上传所需的最小 GPU 接口
///
/// 所有方法都只在主线程调用。
pub trait UploadDevice {
    fn backend_name(&self) -> &'static str;

    // staging buffer
    fn create_staging_buffer(&mut self, size: u64, name: &str) -> Result<StagingBufferHandle, GfxError>;
    fn destroy_staging_buffer(&mut self, buffer: StagingBufferHandle);
    fn staging_buffer_size(&self, buffer: StagingBufferHandle) -> Option<u64>;
    /// 持久映射内存的视图，调用方必须保证该 buffer 上一次提交的 fence 已经 signaled
    fn mapped_region(&mut self, buffer: StagingBufferHandle) -> Result<MappedRegion<'_>, GfxError>;
    /// 对非 coherent 内存刷新写入的范围
    fn flush_staging_buffer(&mut self, buffer: StagingBufferHandle, offset: u64, size: u64) -> Result<(), GfxError>;

    // fence
    fn create_fence(&mut self, signaled: bool, name: &str) -> Result<FenceHandle, GfxError>;
    fn destroy_fence(&mut self, fence: FenceHandle);
    /// 非阻塞查询
    fn fence_signaled(&mut self, fence: FenceHandle) -> Result<bool, GfxError>;
    /// 阻塞等待，超时返回 `Ok(false)`
    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> Result<bool, GfxError>;

    // 命令
    /// 记录并提交一批 buffer -> texture 拷贝，提交前 fence 会被 reset，GPU 完成后 signal
    fn submit_texture_copies(
        &mut self,
        buffer: StagingBufferHandle,
        copies: &[TextureCopy],
        fence: FenceHandle,
    ) -> Result<(), GfxError>;

    // 资源
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GfxError>;
    fn destroy_texture(&mut self, texture: TextureHandle);
    /// 创建包含 `bytes` 的 GPU buffer（模型的顶点与索引数据）
    fn create_mesh_buffer(&mut self, bytes: &[u8], name: &str) -> Result<GpuBufferHandle, GfxError>;
    fn destroy_mesh_buffer(&mut self, buffer: GpuBufferHandle);
}
