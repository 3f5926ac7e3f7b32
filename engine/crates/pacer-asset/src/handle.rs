use std::fmt;
use std::path::PathBuf;

use uuid::Uuid;

/// 资源的唯一标识
///
/// 使用随机 uuid，与文件路径无关：同一个文件加载两次会得到两个不同的 id。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AssetId(Uuid);

impl AssetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AssetKind {
    Image,
    Model,
    Sound,
    Font,
}

impl AssetKind {
    pub const ALL: [AssetKind; 4] = [AssetKind::Image, AssetKind::Model, AssetKind::Sound, AssetKind::Font];
}

/// 资源加载状态机
///
/// 状态流转: Created -> Loading -> [Uploading ->] Loaded
///                         \-> Failed
/// 任意状态都可以被 unload 进入 Unloaded
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoadStatus {
    /// slot 已创建，尚未提交加载
    Created,
    /// IO 阶段：正在后台线程读取文件或进行 CPU 解码
    Loading,
    /// GPU 上传阶段：数据已写入 staging buffer，正在等待 fence
    Uploading,
    /// 完成状态：所有 GPU 资源都可用
    Loaded,
    /// 文件损坏、格式不支持或者 finalize 失败
    Failed,
    Unloaded,
}

/// 资源数据的来源
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AssetSource {
    /// 单独的文件
    Standalone(PathBuf),
    /// 打包文件中的一段
    Packed { archive: PathBuf, offset: u64, size: u64 },
    /// 由调用方在内存中构建
    Internal,
}

impl AssetSource {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            AssetSource::Standalone(path) => Some(path),
            AssetSource::Packed { archive, .. } => Some(archive),
            AssetSource::Internal => None,
        }
    }
}
