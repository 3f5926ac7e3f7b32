use std::{
    env,
    path::{Path, PathBuf},
};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
/// 避免使用硬编码相对路径，确保在不同构建环境下路径一致。
///
/// # 使用示例
/// ```ignore
/// let config = PacerPath::config_path("engine.toml"); // config/engine.toml
/// ```
pub struct PacerPath {}
// 核心路径
impl PacerPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // pacer-crate-tools 位于工作区根目录下
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest.parent().map(Path::to_path_buf).unwrap_or_else(|| manifest.to_path_buf())
    }
}
// 根目录下
impl PacerPath {
    /// 获取 `config/` 目录下的文件路径
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("config").join(filename)
    }

    /// 运行期生成的临时文件目录
    ///
    /// 优先使用 `PACER_TEMP_DIR`，否则使用系统临时目录下的 `pacer/`
    pub fn temp_path() -> PathBuf {
        match env::var_os("PACER_TEMP_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => env::temp_dir().join("pacer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_rooted_at_workspace() {
        let root = PacerPath::workspace_path();
        assert!(PacerPath::config_path("engine.toml").starts_with(&root));
        assert!(PacerPath::config_path("engine.toml").ends_with("config/engine.toml"));
        assert!(root.join("pacer-crate-tools").exists());
    }
}
