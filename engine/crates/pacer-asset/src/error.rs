use std::path::PathBuf;

use pacer_gfx::GfxError;

use crate::handle::{AssetId, AssetKind};
use crate::streaming::StreamingError;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {kind:?} asset: {message}")]
    Decode { kind: AssetKind, message: String },

    #[error("no registered loader can process this {0:?} data")]
    NoLoader(AssetKind),

    #[error("asset {id} is {actual:?}, not {expected:?}")]
    TypeMismatch {
        id: AssetId,
        expected: AssetKind,
        actual: AssetKind,
    },

    #[error("unknown asset {0}")]
    UnknownAsset(AssetId),

    #[error("asset {0} is registered as an empty asset")]
    EmptyAssetInUse(AssetId),

    #[error("failed to build asset loader thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to spawn asset dispatch thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Streaming(#[from] StreamingError),

    #[error(transparent)]
    Gfx(#[from] GfxError),
}

impl AssetError {
    pub(crate) fn decode(kind: AssetKind, err: impl std::fmt::Display) -> Self {
        AssetError::Decode {
            kind,
            message: err.to_string(),
        }
    }

    /// 致命错误需要传播给帧循环，其余错误只影响单个资源
    pub fn is_fatal(&self) -> bool {
        matches!(self, AssetError::Streaming(StreamingError::Overflow { .. }))
    }
}
