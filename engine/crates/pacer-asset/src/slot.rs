use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::assets::Asset;
use crate::handle::{AssetId, AssetKind, AssetSource, LoadStatus};

pub struct SlotState {
    pub status: LoadStatus,
    pub asset: Asset,
}

/// registry 中一个资源的存储位置
///
/// `id`、`kind`、`source` 创建后不再变化；状态和资源本身由读写锁保护，
/// 主线程 finalize、纹理流式系统标记 Loaded 以及快照读取都需要获取锁。
pub struct AssetSlot {
    id: AssetId,
    kind: AssetKind,
    source: AssetSource,
    state: RwLock<SlotState>,
}

// new & init
impl AssetSlot {
    pub fn new(id: AssetId, source: AssetSource, asset: Asset) -> Self {
        Self {
            id,
            kind: asset.kind(),
            source,
            state: RwLock::new(SlotState {
                status: LoadStatus::Created,
                asset,
            }),
        }
    }
}

// getters
impl AssetSlot {
    #[inline]
    pub fn id(&self) -> AssetId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    #[inline]
    pub fn source(&self) -> &AssetSource {
        &self.source
    }

    #[inline]
    pub fn status(&self) -> LoadStatus {
        self.read().status
    }

    /// 锁中毒只意味着其他线程在持锁时 panic，数据本身仍然可读
    pub fn read(&self) -> RwLockReadGuard<'_, SlotState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, SlotState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, status: LoadStatus) {
        self.write().status = status;
    }
}
