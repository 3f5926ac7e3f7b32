use std::path::Path;

use pacer_asset::{AssetHubConfig, StreamingConfig};
use pacer_crate_tools::toml_config;
use pacer_gfx::{HeadlessConfig, HeadlessDevice, UploadDevice};
use pacer_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GfxBackend {
    /// 纯内存实现，不需要 GPU
    #[default]
    Headless,
    Vulkan,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxConfig {
    pub backend: GfxBackend,
    pub app_name: String,
    /// headless 后端的 fence 在提交后第几次查询时完成
    pub headless_polls_to_signal: u32,
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            backend: GfxBackend::Headless,
            app_name: "pacer".to_string(),
            headless_polls_to_signal: 1,
        }
    }
}

impl GfxConfig {
    pub fn create_device(&self) -> anyhow::Result<Box<dyn UploadDevice>> {
        let device: Box<dyn UploadDevice> = match self.backend {
            GfxBackend::Headless => Box::new(HeadlessDevice::new(HeadlessConfig {
                polls_to_signal: Some(self.headless_polls_to_signal),
            })),
            GfxBackend::Vulkan => {
                let ctx = pacer_gfx::vulkan::VulkanContext::new(&self.app_name)?;
                Box::new(pacer_gfx::vulkan::VulkanUploadDevice::new(ctx)?)
            }
        };
        log::info!("upload device: {}", device.backend_name());
        Ok(device)
    }
}

/// 引擎配置，对应 `config/engine.toml`
///
/// 所有字段都有默认值，配置文件中可以只写需要修改的部分。
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub assets: AssetHubConfig,
    pub streaming: StreamingConfig,
    pub gfx: GfxConfig,
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        toml_config::load_toml(path)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml_config::parse_toml(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacer_scheduler::SchedulerPolicy;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [scheduler]
            policy = "strict"

            [streaming]
            buffer_count = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.policy, SchedulerPolicy::Strict);
        assert_eq!(config.scheduler.max_threads, 4);
        assert_eq!(config.streaming.buffer_count, 5);
        assert_eq!(config.streaming.page_size, 4096);
        assert_eq!(config.assets.completion_queue_capacity, 256);
        assert_eq!(config.gfx.backend, GfxBackend::Headless);
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let result = EngineConfig::from_toml_str("[scheduler]\npolicy = \"lazy\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_sample_config_file_parses() {
        let path = pacer_crate_tools::resource::PacerPath::config_path("engine.toml");
        let config = EngineConfig::from_file(path).unwrap();
        assert_eq!(config.gfx.backend, GfxBackend::Headless);
        assert!(config.assets.max_load_threads > 0);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::from_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("nope.toml"));
    }
}
