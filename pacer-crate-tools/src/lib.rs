//! Pacer 工具集
//!
//! 提供日志初始化、资源路径管理、TOML 配置读取等通用工具。
//!
//! # PacerPath
//! 基于工作区根目录的统一路径管理，避免硬编码相对路径。
//!
//! # toml_config
//! 从 TOML 文件读取任意 `serde` 配置结构，带上下文的错误信息。

pub mod init_log;
pub mod resource;
pub mod toml_config;
