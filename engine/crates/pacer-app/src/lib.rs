//! 帧循环
//!
//! [`App`] 把 [`pacer_scheduler::Scheduler`]、[`pacer_asset::AssetHub`] 和上传设备组装在一起，
//! 使用方通过实现 [`OuterApp`] 接入。

pub mod app;
pub mod config;
pub mod outer_app;

pub use app::{App, FrameContext, FrameJobs};
pub use config::{EngineConfig, GfxBackend, GfxConfig};
pub use outer_app::OuterApp;
