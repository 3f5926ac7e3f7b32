//! GPU 上传设备抽象
//!
//! 纹理流式系统只依赖 [`UploadDevice`] trait：
//! - staging buffer：持久映射的 host visible 内存
//! - fence：CPU 查询 GPU 是否完成某次提交
//! - buffer -> texture 的拷贝命令
//!
//! 两个实现：
//! - [`HeadlessDevice`]：纯内存实现，用于测试与无 GPU 环境
//! - [`vulkan::VulkanUploadDevice`]：基于 ash + vk-mem

pub mod device;
pub mod format;
pub mod handles;
pub mod headless;
pub mod mapped;
pub mod vulkan;

pub use device::{GfxError, UploadDevice};
pub use format::{PixelFormat, TextureCopy, TextureDesc};
pub use handles::{FenceHandle, GpuBufferHandle, StagingBufferHandle, TextureHandle};
pub use headless::{HeadlessConfig, HeadlessDevice, WriteViolation};
pub use mapped::MappedRegion;
