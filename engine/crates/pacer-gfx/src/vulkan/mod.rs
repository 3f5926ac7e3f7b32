//! Vulkan 后端
//!
//! 不创建 surface 和 swapchain，只需要一个同时支持 graphics 与 transfer 的 queue。

mod barrier;
mod context;
mod format;
mod upload_device;

pub use context::VulkanContext;
pub use upload_device::VulkanUploadDevice;
