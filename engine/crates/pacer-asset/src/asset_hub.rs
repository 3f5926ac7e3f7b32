use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use pacer_gfx::UploadDevice;
use serde::{Deserialize, Serialize};

use crate::assets::{
    self, Asset, AssetBehavior, FinalizeContext, Finalized, FontAsset, ImageAsset, LoadData, ModelAsset, SoundAsset,
};
use crate::error::AssetError;
use crate::handle::{AssetId, AssetKind, AssetSource, LoadStatus};
use crate::io_worker::{IoWorker, LoadCompletion, LoadRequest};
use crate::loaders::LoaderRegistry;
use crate::slot::AssetSlot;
use crate::streaming::{StreamingConfig, TextureStreamer, UploadStats};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetHubConfig {
    /// 每帧 finalize 的时间预算，单位秒
    pub max_load_time_per_frame: f64,
    pub max_load_threads: usize,
    pub completion_queue_capacity: usize,
}

impl Default for AssetHubConfig {
    fn default() -> Self {
        Self {
            max_load_time_per_frame: 1.0 / 60.0,
            max_load_threads: 4,
            completion_queue_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetEvent {
    /// 所有 GPU 资源都可用
    Loaded(AssetId),
    /// 读取、解码或 finalize 失败，附带错误信息
    Failed(AssetId, String),
    Unloaded(AssetId),
}

/// 资源中心，管理所有资源的生命周期
///
/// # 加载流程
/// 1. `load_from_file` 创建 slot 并提交到 IO 线程池，立即返回 [`AssetId`]
/// 2. 工作线程读取并解码，把结果放入完成队列
/// 3. 每帧 `process_loading_queue` 在时间预算内取出结果，在主线程执行 `post_load`
/// 4. 图像进入 `Uploading`，由 `process_texture_uploads` 上传完成后标记为 `Loaded`
///
/// 使用方随时可以通过 `get_or_empty` 拿到可渲染的资源：未加载完成或者加载失败时返回同类的空资源。
pub struct AssetHub {
    slots: HashMap<AssetId, Arc<AssetSlot>>,
    /// 每类资源当前使用的空资源
    empty_assets: HashMap<AssetKind, AssetId>,
    /// `new` 中创建的空资源，`unload_all` 不会卸载它们
    builtin_empty_assets: Vec<AssetId>,

    loaders: Arc<LoaderRegistry>,
    io_worker: IoWorker,
    streamer: TextureStreamer,

    max_load_time_per_frame: Duration,

    event_sender: Sender<AssetEvent>,
    event_receiver: Receiver<AssetEvent>,
}

// new & init
impl AssetHub {
    pub fn new(
        config: &AssetHubConfig,
        streaming: &StreamingConfig,
        device: &mut dyn UploadDevice,
    ) -> Result<Self, AssetError> {
        let _span = tracy_client::span!("AssetHub::new");

        let loaders = Arc::new(LoaderRegistry::with_builtin_loaders());
        let io_worker = IoWorker::new(config.max_load_threads, config.completion_queue_capacity, loaders.clone())?;
        let streamer = TextureStreamer::new(device, streaming)?;
        let (event_sender, event_receiver) = crossbeam_channel::unbounded();

        let mut hub = Self {
            slots: HashMap::new(),
            empty_assets: HashMap::new(),
            builtin_empty_assets: Vec::new(),
            loaders,
            io_worker,
            streamer,
            max_load_time_per_frame: seconds_to_duration(config.max_load_time_per_frame),
            event_sender,
            event_receiver,
        };

        hub.create_builtin_empty_asset::<ImageAsset>(device)?;
        hub.create_builtin_empty_asset::<ModelAsset>(device)?;
        hub.create_builtin_empty_asset::<SoundAsset>(device)?;
        hub.create_builtin_empty_asset::<FontAsset>(device)?;

        log::info!(
            "asset hub created: {} loaders, {} load threads",
            hub.loaders.len(),
            config.max_load_threads
        );
        Ok(hub)
    }

    fn create_builtin_empty_asset<T: AssetBehavior>(&mut self, device: &mut dyn UploadDevice) -> Result<(), AssetError> {
        let id = self.finalize_immediate::<T>(AssetSource::Internal, T::empty_data(), device)?;
        self.empty_assets.insert(T::KIND, id);
        self.builtin_empty_assets.push(id);
        Ok(())
    }

    /// 卸载所有资源，等待所有上传完成后释放 staging 资源
    pub fn destroy(self, device: &mut dyn UploadDevice) {
        let _span = tracy_client::span!("AssetHub::destroy");
        let Self {
            slots,
            io_worker,
            streamer,
            ..
        } = self;

        // 先停止工作线程，之后不会再有新的完成结果
        drop(io_worker);
        for slot in slots.values() {
            release_slot(slot, device);
        }
        drop(slots);
        streamer.destroy(device);
        log::info!("asset hub destroyed");
    }
}

// 加载
impl AssetHub {
    /// 异步加载文件，立即返回 id
    ///
    /// 文件不存在时同步返回 [`AssetError::NotFound`]，其余错误通过 slot 状态和 [`AssetEvent::Failed`] 报告。
    pub fn load_from_file<T: AssetBehavior>(
        &mut self,
        path: impl AsRef<Path>,
        config: T::Config,
    ) -> Result<AssetId, AssetError> {
        let path = canonicalize(path.as_ref())?;
        Ok(self.submit::<T>(AssetSource::Standalone(path), config))
    }

    /// 异步加载打包文件中 `[offset, offset + size)` 的一段
    pub fn load_from_packed<T: AssetBehavior>(
        &mut self,
        archive: impl AsRef<Path>,
        offset: u64,
        size: u64,
        config: T::Config,
    ) -> Result<AssetId, AssetError> {
        let archive = canonicalize(archive.as_ref())?;
        Ok(self.submit::<T>(AssetSource::Packed { archive, offset, size }, config))
    }

    /// 在调用线程上读取、解码、finalize，返回时资源已经 `Loaded`
    ///
    /// 纹理走阻塞上传路径，会等待 GPU。
    pub fn load_from_file_immediate<T: AssetBehavior>(
        &mut self,
        path: impl AsRef<Path>,
        config: T::Config,
        device: &mut dyn UploadDevice,
    ) -> Result<AssetId, AssetError> {
        let _span = tracy_client::span!("AssetHub::load_from_file_immediate");
        let path = canonicalize(path.as_ref())?;
        let data = T::load_from_file(&path, &config.into(), &self.loaders)?;
        let data = into_typed_data::<T>(data)?;

        let id = self.finalize_immediate::<T>(AssetSource::Standalone(path), data, device)?;
        self.emit(AssetEvent::Loaded(id));
        Ok(id)
    }

    /// 同步 finalize 调用方构建好的数据
    pub fn load_from_data<T: AssetBehavior>(
        &mut self,
        data: T::Data,
        device: &mut dyn UploadDevice,
    ) -> Result<AssetId, AssetError> {
        let id = self.finalize_immediate::<T>(AssetSource::Internal, data, device)?;
        self.emit(AssetEvent::Loaded(id));
        Ok(id)
    }

    /// 同步解码并 finalize 内存中的文件数据
    pub fn load_from_bytes<T: AssetBehavior>(
        &mut self,
        bytes: &[u8],
        config: T::Config,
        device: &mut dyn UploadDevice,
    ) -> Result<AssetId, AssetError> {
        let data = T::load_from_data(bytes, &config.into(), &self.loaders)?;
        let data = into_typed_data::<T>(data)?;
        self.load_from_data::<T>(data, device)
    }

    /// 注册一个外部已经创建好 GPU 资源的资源
    pub fn add_asset<T: AssetBehavior>(&mut self, asset: T) -> AssetId {
        let id = AssetId::new();
        let slot = Arc::new(AssetSlot::new(id, AssetSource::Internal, asset.into_asset()));
        slot.set_status(LoadStatus::Loaded);
        self.slots.insert(id, slot);
        self.emit(AssetEvent::Loaded(id));
        id
    }

    /// 用已有的资源替换某一类的空资源
    pub fn register_empty_asset<T: AssetBehavior>(&mut self, id: AssetId) -> Result<(), AssetError> {
        let slot = self.slots.get(&id).ok_or(AssetError::UnknownAsset(id))?;
        if slot.kind() != T::KIND {
            return Err(AssetError::TypeMismatch {
                id,
                expected: T::KIND,
                actual: slot.kind(),
            });
        }
        self.empty_assets.insert(T::KIND, id);
        Ok(())
    }

    fn submit<T: AssetBehavior>(&mut self, source: AssetSource, config: T::Config) -> AssetId {
        let id = AssetId::new();
        let slot = Arc::new(AssetSlot::new(id, source.clone(), Asset::placeholder(T::KIND)));

        // 先插入 registry 再提交，完成结果一定能找到 slot
        self.slots.insert(id, slot.clone());
        slot.set_status(LoadStatus::Loading);
        log::debug!("submit {:?} asset {} from {:?}", T::KIND, id, source);

        self.io_worker.request_load(LoadRequest {
            id,
            kind: T::KIND,
            source,
            config: config.into(),
        });
        id
    }

    fn finalize_immediate<T: AssetBehavior>(
        &mut self,
        source: AssetSource,
        data: T::Data,
        device: &mut dyn UploadDevice,
    ) -> Result<AssetId, AssetError> {
        let id = AssetId::new();
        let slot = Arc::new(AssetSlot::new(id, source, Asset::placeholder(T::KIND)));

        let mut ctx = FinalizeContext {
            device,
            streamer: &mut self.streamer,
            target: Arc::downgrade(&slot),
            immediate: true,
        };
        let (asset, finalized) = T::post_load(data, &mut ctx)?;
        debug_assert_eq!(finalized, Finalized::Loaded);
        {
            let mut state = slot.write();
            state.asset = asset.into_asset();
            state.status = LoadStatus::Loaded;
        }

        self.slots.insert(id, slot);
        Ok(id)
    }
}

// 每帧更新
impl AssetHub {
    /// 在时间预算内 finalize 后台完成的资源，返回处理的数量
    ///
    /// 至少处理一个结果。只有致命错误会返回 `Err`，单个资源的失败只影响该资源。
    pub fn process_loading_queue(&mut self, device: &mut dyn UploadDevice) -> Result<usize, AssetError> {
        let _span = tracy_client::span!("AssetHub::process_loading_queue");
        let start = Instant::now();
        let mut processed = 0;

        while let Some(LoadCompletion { id, result }) = self.io_worker.try_recv() {
            processed += 1;
            self.finalize_completion(id, result, device)?;

            if start.elapsed() >= self.max_load_time_per_frame {
                log::debug!(
                    "asset loading budget exhausted after {} assets, {} waiting",
                    processed,
                    self.io_worker.completed()
                );
                break;
            }
        }
        Ok(processed)
    }

    /// 推进纹理流式上传，并为上传完成的资源发送 [`AssetEvent::Loaded`]
    pub fn process_texture_uploads(&mut self, device: &mut dyn UploadDevice) -> Result<UploadStats, AssetError> {
        let stats = self.streamer.process_texture_uploads(device)?;
        for id in self.streamer.take_completed() {
            log::info!("asset {} loaded", id);
            self.emit(AssetEvent::Loaded(id));
        }
        Ok(stats)
    }

    fn finalize_completion(
        &mut self,
        id: AssetId,
        result: Result<LoadData, AssetError>,
        device: &mut dyn UploadDevice,
    ) -> Result<(), AssetError> {
        // 结果返回之前已经被卸载
        let Some(slot) = self.slots.get(&id).cloned() else {
            log::debug!("drop load result of unloaded asset {}", id);
            return Ok(());
        };

        let finalized = match result {
            Ok(data) => {
                let mut state = slot.write();
                let mut ctx = FinalizeContext {
                    device,
                    streamer: &mut self.streamer,
                    target: Arc::downgrade(&slot),
                    immediate: false,
                };
                assets::finalize(slot.kind(), data, &mut ctx).map(|(asset, finalized)| {
                    state.asset = asset;
                    state.status = match finalized {
                        Finalized::Loaded => LoadStatus::Loaded,
                        Finalized::Uploading => LoadStatus::Uploading,
                    };
                    finalized
                })
            }
            Err(e) => Err(e),
        };

        match finalized {
            Ok(Finalized::Loaded) => {
                log::info!("asset {} loaded", id);
                self.emit(AssetEvent::Loaded(id));
            }
            Ok(Finalized::Uploading) => {}
            Err(e) => {
                slot.set_status(LoadStatus::Failed);
                if e.is_fatal() {
                    log::error!("fatal error while finalizing asset {}: {}", id, e);
                    return Err(e);
                }
                log::error!("failed to load asset {} from {:?}: {}", id, slot.source(), e);
                self.emit(AssetEvent::Failed(id, e.to_string()));
            }
        }
        Ok(())
    }

    fn emit(&self, event: AssetEvent) {
        // receiver 与 hub 同生命周期，发送不会失败
        let _ = self.event_sender.send(event);
    }
}

// 卸载
impl AssetHub {
    /// 释放资源的 GPU 句柄并从 registry 中移除
    ///
    /// 仍在上传中的纹理由流式系统在 fence signal 之后释放。
    pub fn unload(&mut self, id: AssetId, device: &mut dyn UploadDevice) -> Result<(), AssetError> {
        if self.empty_assets.values().any(|empty| *empty == id) {
            return Err(AssetError::EmptyAssetInUse(id));
        }
        let slot = self.slots.remove(&id).ok_or(AssetError::UnknownAsset(id))?;
        release_slot(&slot, device);

        log::info!("asset {} unloaded", id);
        self.emit(AssetEvent::Unloaded(id));
        Ok(())
    }

    /// 卸载除空资源以外的所有资源，返回卸载的数量
    pub fn unload_all(&mut self, device: &mut dyn UploadDevice) -> usize {
        let ids: Vec<_> = self
            .slots
            .keys()
            .copied()
            .filter(|id| !self.builtin_empty_assets.contains(id) && !self.empty_assets.values().any(|empty| empty == id))
            .collect();

        for id in &ids {
            if let Some(slot) = self.slots.remove(id) {
                release_slot(&slot, device);
                self.emit(AssetEvent::Unloaded(*id));
            }
        }
        log::info!("unloaded {} assets", ids.len());
        ids.len()
    }
}

// getters
impl AssetHub {
    /// 资源当前的快照，无论处于什么状态
    pub fn get<T: AssetBehavior>(&self, id: AssetId) -> Result<T, AssetError> {
        let slot = self.slots.get(&id).ok_or(AssetError::UnknownAsset(id))?;
        let state = slot.read();
        T::from_asset(&state.asset).cloned().ok_or(AssetError::TypeMismatch {
            id,
            expected: T::KIND,
            actual: slot.kind(),
        })
    }

    /// `Loaded` 时返回资源本身，否则返回同类的空资源
    pub fn get_or_empty<T: AssetBehavior>(&self, id: AssetId) -> T {
        if let Some(slot) = self.slots.get(&id) {
            let state = slot.read();
            if state.status == LoadStatus::Loaded {
                if let Some(asset) = T::from_asset(&state.asset) {
                    return asset.clone();
                }
            }
        }
        self.empty_asset::<T>()
    }

    pub fn empty_asset<T: AssetBehavior>(&self) -> T {
        self.empty_assets
            .get(&T::KIND)
            .and_then(|id| self.slots.get(id))
            .and_then(|slot| T::from_asset(&slot.read().asset).cloned())
            .unwrap_or_default()
    }

    #[inline]
    pub fn status(&self, id: AssetId) -> Option<LoadStatus> {
        self.slots.get(&id).map(|slot| slot.status())
    }

    pub fn source(&self, id: AssetId) -> Option<&AssetSource> {
        self.slots.get(&id).map(|slot| slot.source())
    }

    pub fn loaded_assets(&self) -> Vec<AssetId> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.status() == LoadStatus::Loaded)
            .map(|(id, _)| *id)
            .collect()
    }

    /// 资源事件；需要由使用方定期取走
    #[inline]
    pub fn events(&self) -> &Receiver<AssetEvent> {
        &self.event_receiver
    }

    /// 注册自定义 loader 使用
    #[inline]
    pub fn loaders(&self) -> &Arc<LoaderRegistry> {
        &self.loaders
    }

    #[inline]
    pub fn streamer(&self) -> &TextureStreamer {
        &self.streamer
    }

    /// 已经提交、尚未 finalize 的加载数
    pub fn pending_loads(&self) -> usize {
        self.io_worker.in_flight() + self.io_worker.completed()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn max_load_time_per_frame(&self) -> Duration {
        self.max_load_time_per_frame
    }

    pub fn set_max_load_time_per_frame(&mut self, seconds: f64) {
        self.max_load_time_per_frame = seconds_to_duration(seconds);
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, AssetError> {
    fs::canonicalize(path).map_err(|_| AssetError::NotFound(path.to_path_buf()))
}

fn into_typed_data<T: AssetBehavior>(data: LoadData) -> Result<T::Data, AssetError> {
    let actual = data.kind();
    T::from_load_data(data).ok_or_else(|| AssetError::decode(T::KIND, format!("loader produced {:?} data", actual)))
}

/// 标记为 Unloaded 并释放 GPU 资源
fn release_slot(slot: &AssetSlot, device: &mut dyn UploadDevice) {
    let mut state = slot.write();
    let previous = state.status;
    state.status = LoadStatus::Unloaded;
    if previous == LoadStatus::Uploading {
        // 纹理仍被 GPU 使用，由 streamer 负责销毁
        state.asset = Asset::placeholder(slot.kind());
    } else {
        state.asset.unload(device);
    }
}

fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}
