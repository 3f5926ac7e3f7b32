use std::sync::Weak;
use std::time::Duration;

use pacer_gfx::{GfxError, MappedRegion, TextureCopy, TextureHandle, UploadDevice, format::align_up};

use crate::handle::{AssetId, LoadStatus};
use crate::streaming::upload_buffer::TextureUploadBuffer;
use crate::streaming::{StreamingConfig, StreamingError, TextureUploadRequest};

/// 最大请求连续落选多少次后优先打包
pub const MAX_STARVED_PASSES: u32 = 4;

/// 一次 `process_texture_uploads` 的结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// 本次写入 staging buffer 并提交的纹理数
    pub submitted: usize,
    /// 本次 fence 已完成、标记为 Loaded 的纹理数
    pub completed: usize,
    /// 本次扩容的 buffer 数
    pub grown: usize,
    /// 仍在排队等待空闲 buffer 的纹理数
    pub deferred: usize,
}

/// 纹理流式上传器
///
/// # 工作流程
/// 1. `upload_texture` 把请求放进待上传队列
/// 2. 每帧 `process_texture_uploads`：
///    - 按大小升序排序待上传请求，小纹理优先
///    - 依次检查环形缓冲中的每个 buffer，fence 未 signaled 的跳过
///    - 结算该 buffer 上一次提交的纹理
///    - 必要时扩容，然后尽可能多地打包请求，写入、flush、提交
/// 3. 放不下的请求留到之后的帧
///
/// 每个可用 buffer 都会扩容到最大的待上传请求，但升序打包时大纹理排在最后。
/// 小纹理持续到达时，最大的请求可能一直被挤到下一帧；它在其他请求被提交的情况下
/// 连续落选 [`MAX_STARVED_PASSES`] 次后，下一个可用 buffer 会先打包它。
///
/// CPU 永远不会写入 fence 未 signaled 的 buffer。
pub struct TextureStreamer {
    config: StreamingConfig,

    buffers: Vec<TextureUploadBuffer>,
    next_buffer_index: usize,

    pending: Vec<TextureUploadRequest>,
    /// 当前最大的待上传请求，以及它已经连续落选的次数
    starved: Option<(TextureHandle, u32)>,
    /// 上传完成、尚未被取走的资源
    completed: Vec<AssetId>,
}

// new & init
impl TextureStreamer {
    pub fn new(device: &mut dyn UploadDevice, config: &StreamingConfig) -> Result<Self, StreamingError> {
        let _span = tracy_client::span!("TextureStreamer::new");

        let buffer_count = config.buffer_count.max(1);
        let initial_size = align_up(config.initial_buffer_size, config.page_size).max(config.page_size.max(1));

        let mut buffers = Vec::with_capacity(buffer_count);
        for index in 0..buffer_count {
            match TextureUploadBuffer::new(device, initial_size, index) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    buffers.into_iter().for_each(|buffer| buffer.destroy(device));
                    return Err(e.into());
                }
            }
        }
        log::info!(
            "texture streamer created: {} buffers x {} bytes on {}",
            buffer_count,
            initial_size,
            device.backend_name()
        );

        Ok(Self {
            config: config.clone(),
            buffers,
            next_buffer_index: 0,
            pending: Vec::new(),
            starved: None,
            completed: Vec::new(),
        })
    }

    /// 等待所有 buffer 的 fence，然后释放全部 staging 资源
    pub fn destroy(mut self, device: &mut dyn UploadDevice) {
        let _span = tracy_client::span!("TextureStreamer::destroy");

        let timeout = self.fence_timeout();
        for (index, mut buffer) in std::mem::take(&mut self.buffers).into_iter().enumerate() {
            match device.wait_fence(buffer.fence(), timeout) {
                Ok(true) => {
                    buffer.retire(device, &mut self.completed);
                }
                Ok(false) => log::warn!("texture upload buffer {} still busy at shutdown", index),
                Err(e) => log::error!("failed to wait for texture upload buffer {}: {}", index, e),
            }
            buffer.destroy(device);
        }

        self.drop_abandoned_requests(device);
        if !self.pending.is_empty() {
            log::warn!("{} texture uploads never submitted", self.pending.len());
        }
    }
}

// tools
impl TextureStreamer {
    /// 加入待上传队列，在之后的 `process_texture_uploads` 中提交
    ///
    /// 单个纹理超过 `max_buffer_size` 时返回 [`StreamingError::Overflow`]，并销毁请求中的纹理。
    pub fn upload_texture(
        &mut self,
        device: &mut dyn UploadDevice,
        request: TextureUploadRequest,
    ) -> Result<(), StreamingError> {
        if let Err(e) = self.check_size(&request) {
            device.destroy_texture(request.texture);
            return Err(e);
        }
        self.pending.push(request);
        Ok(())
    }

    /// 阻塞上传：等待下一个 buffer 空闲，提交后等待 GPU 完成
    ///
    /// 返回 `Ok` 时纹理内容已经可用。失败时纹理由 streamer 负责销毁。
    pub fn upload_texture_immediate(
        &mut self,
        device: &mut dyn UploadDevice,
        request: TextureUploadRequest,
    ) -> Result<(), StreamingError> {
        let _span = tracy_client::span!("TextureStreamer::upload_texture_immediate");

        let required = match self.check_size(&request) {
            Ok(required) => required,
            Err(e) => {
                device.destroy_texture(request.texture);
                return Err(e);
            }
        };

        let index = self.next_buffer_index;
        let buffer_count = self.buffers.len();
        let timeout = self.fence_timeout();
        let buffer = &mut self.buffers[index];

        let prepared = prepare_immediate(device, buffer, index, required, timeout, &mut self.completed)
            .and_then(|()| submit_batch(device, buffer, std::slice::from_ref(&request)));
        if let Err(e) = prepared {
            device.destroy_texture(request.texture);
            return Err(e);
        }

        self.next_buffer_index = (index + 1) % buffer_count;
        let finished = device.wait_fence(buffer.fence(), timeout);
        if !matches!(finished, Ok(true)) {
            // 拷贝可能仍在执行，交给 retire 在 fence signal 之后销毁
            buffer.track(Weak::new(), request.texture);
            return Err(match finished {
                Err(e) => e.into(),
                _ => StreamingError::Timeout(index),
            });
        }
        Ok(())
    }

    pub fn process_texture_uploads(&mut self, device: &mut dyn UploadDevice) -> Result<UploadStats, StreamingError> {
        let _span = tracy_client::span!("TextureStreamer::process_texture_uploads");
        let mut stats = UploadStats::default();

        self.drop_abandoned_requests(device);
        // 稳定排序，大小相同的请求保持提交顺序
        self.pending.sort_by_key(TextureUploadRequest::packed_size);
        self.promote_starved_request();

        let buffer_count = self.buffers.len();
        let start = self.next_buffer_index;
        for step in 0..buffer_count {
            let index = (start + step) % buffer_count;
            let buffer = &mut self.buffers[index];

            if !buffer.is_available(device)? {
                continue;
            }
            stats.completed += buffer.retire(device, &mut self.completed);

            let Some(largest) = self.pending.last().map(TextureUploadRequest::packed_size) else {
                continue;
            };
            let required = align_up(largest, self.config.page_size);
            if buffer.size() < required {
                buffer.grow(device, required, index)?;
                stats.grown += 1;
            }

            let count = count_fitting(&self.pending, buffer.size());
            if count == 0 {
                continue;
            }
            submit_batch(device, buffer, &self.pending[..count])?;
            for request in self.pending.drain(..count) {
                buffer.track(request.target, request.texture);
            }
            stats.submitted += count;
            self.next_buffer_index = (index + 1) % buffer_count;
        }

        self.track_starvation(stats.submitted);
        stats.deferred = self.pending.len();
        if stats.submitted > 0 || stats.completed > 0 {
            log::debug!("texture uploads: {:?}", stats);
        }
        Ok(stats)
    }

    /// 取走自上次调用以来完成上传的资源
    pub fn take_completed(&mut self) -> Vec<AssetId> {
        std::mem::take(&mut self.completed)
    }

    #[inline]
    pub fn is_next_buffer_available(&self, device: &mut dyn UploadDevice) -> Result<bool, GfxError> {
        self.buffers[self.next_buffer_index].is_available(device)
    }

    #[inline]
    pub fn reset_buffer_index(&mut self) {
        self.next_buffer_index = 0;
    }

    /// 目标资源已经不存在或者已经卸载的请求不再上传
    fn drop_abandoned_requests(&mut self, device: &mut dyn UploadDevice) {
        self.pending.retain(|request| {
            let abandoned = request
                .target
                .upgrade()
                .is_none_or(|slot| slot.status() == LoadStatus::Unloaded);
            if abandoned {
                device.destroy_texture(request.texture);
            }
            !abandoned
        });
    }

    /// 落选次数达到上限的请求移到队首
    fn promote_starved_request(&mut self) {
        let Some((texture, passes)) = self.starved else {
            return;
        };
        if passes < MAX_STARVED_PASSES {
            return;
        }
        if let Some(position) = self.pending.iter().position(|request| request.texture == texture) {
            let request = self.pending.remove(position);
            self.pending.insert(0, request);
            log::debug!("texture upload {:?} deferred {} times, packing it first", texture, passes);
        }
    }

    /// 本次有请求被提交而最大的请求仍在排队时，记一次落选
    fn track_starvation(&mut self, submitted: usize) {
        let Some(largest) = self.pending.iter().max_by_key(|request| request.packed_size()) else {
            self.starved = None;
            return;
        };
        if submitted == 0 {
            return;
        }
        self.starved = match self.starved {
            Some((texture, passes)) if texture == largest.texture => Some((texture, passes + 1)),
            _ => Some((largest.texture, 1)),
        };
    }

    fn check_size(&self, request: &TextureUploadRequest) -> Result<u64, StreamingError> {
        let required = align_up(request.packed_size(), self.config.page_size);
        if required > self.config.max_buffer_size {
            return Err(StreamingError::Overflow {
                requested: required,
                max: self.config.max_buffer_size,
            });
        }
        Ok(required)
    }

    fn fence_timeout(&self) -> Duration {
        let seconds = self.config.fence_timeout;
        if seconds.is_nan() || seconds <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }
}

// getters
impl TextureStreamer {
    #[inline]
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// 所有 staging buffer 的总大小
    pub fn buffers_size(&self) -> u64 {
        self.buffers.iter().map(TextureUploadBuffer::size).sum()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.buffers.iter().map(TextureUploadBuffer::in_flight_count).sum()
    }

    #[inline]
    pub fn next_buffer_index(&self) -> usize {
        self.next_buffer_index
    }
}

/// 等待 buffer 空闲并结算，然后确保容量足够
fn prepare_immediate(
    device: &mut dyn UploadDevice,
    buffer: &mut TextureUploadBuffer,
    index: usize,
    required: u64,
    timeout: Duration,
    completed: &mut Vec<AssetId>,
) -> Result<(), StreamingError> {
    if !device.wait_fence(buffer.fence(), timeout)? {
        return Err(StreamingError::Timeout(index));
    }
    buffer.retire(device, completed);
    if buffer.size() < required {
        buffer.grow(device, required, index)?;
    }
    Ok(())
}

/// 从队首开始，能连续放进 `size` 字节的请求个数
fn count_fitting(pending: &[TextureUploadRequest], size: u64) -> usize {
    let mut offset = 0;
    let mut count = 0;
    for request in pending {
        let (_, end) = request.layout(offset);
        if end > size {
            break;
        }
        offset = end;
        count += 1;
    }
    count
}

/// 把一批请求连续写入 buffer，flush 后提交拷贝
fn submit_batch(
    device: &mut dyn UploadDevice,
    buffer: &TextureUploadBuffer,
    requests: &[TextureUploadRequest],
) -> Result<(), StreamingError> {
    debug_assert!(matches!(device.fence_signaled(buffer.fence()), Ok(true)));

    let mut copies = Vec::new();
    let mut end = 0;
    {
        let mut region = device.mapped_region(buffer.buffer())?;
        for request in requests {
            let (offsets, request_end) = request.layout(end);
            for (info, offset) in request.infos.iter().zip(offsets) {
                write_subresource(&mut region, request, info.data_offset, info.size, offset)?;
                copies.push(TextureCopy {
                    texture: request.texture,
                    buffer_offset: offset,
                    mip_level: info.mip_level,
                    width: info.width,
                    height: info.height,
                });
            }
            end = request_end;
        }
    }

    device.flush_staging_buffer(buffer.buffer(), 0, end)?;
    device.submit_texture_copies(buffer.buffer(), &copies, buffer.fence())?;
    Ok(())
}

fn write_subresource(
    region: &mut MappedRegion<'_>,
    request: &TextureUploadRequest,
    data_offset: u64,
    size: u64,
    buffer_offset: u64,
) -> Result<(), GfxError> {
    let start = data_offset as usize;
    let len = size as usize;
    let src = start
        .checked_add(len)
        .and_then(|end| request.pixels.get(start..end))
        .ok_or(GfxError::OutOfBounds {
            offset: start,
            len,
            size: request.pixels.len(),
        })?;
    region.write(buffer_offset as usize, src)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pacer_gfx::{HeadlessConfig, HeadlessDevice, PixelFormat, TextureDesc, TextureHandle};

    use super::*;
    use crate::assets::{Asset, ImageAsset};
    use crate::handle::AssetSource;
    use crate::slot::AssetSlot;
    use crate::streaming::UploadInfo;

    fn uploading_slot() -> Arc<AssetSlot> {
        let slot = Arc::new(AssetSlot::new(
            AssetId::new(),
            AssetSource::Internal,
            Asset::Image(ImageAsset::default()),
        ));
        slot.set_status(LoadStatus::Uploading);
        slot
    }

    fn pixels(width: u32, height: u32, seed: u8) -> Vec<u8> {
        (0..width * height * 4).map(|i| (i as u8).wrapping_add(seed)).collect()
    }

    fn request(
        device: &mut HeadlessDevice,
        slot: &Arc<AssetSlot>,
        width: u32,
        height: u32,
        seed: u8,
    ) -> (TextureUploadRequest, TextureHandle) {
        let texture = device
            .create_texture(&TextureDesc::new(width, height, PixelFormat::Rgba8, "test"))
            .unwrap();
        let request = TextureUploadRequest {
            target: Arc::downgrade(slot),
            texture,
            format: PixelFormat::Rgba8,
            pixels: Arc::from(pixels(width, height, seed)),
            infos: vec![UploadInfo {
                data_offset: 0,
                size: (width * height * 4) as u64,
                mip_level: 0,
                width,
                height,
            }],
        };
        (request, texture)
    }

    fn config(buffer_count: usize, initial: u64, max: u64) -> StreamingConfig {
        StreamingConfig {
            initial_buffer_size: initial,
            buffer_count,
            page_size: 256,
            max_buffer_size: max,
            fence_timeout: 1.0,
        }
    }

    #[test]
    fn test_buffer_grows_to_fit_largest_request() {
        let mut device = HeadlessDevice::new(HeadlessConfig {
            polls_to_signal: Some(0),
        });
        let mut streamer = TextureStreamer::new(&mut device, &config(1, 256, 1 << 20)).unwrap();
        assert_eq!(streamer.buffers_size(), 256);

        let slot = uploading_slot();
        let (req, texture) = request(&mut device, &slot, 16, 16, 7);
        streamer.upload_texture(&mut device, req).unwrap();

        let stats = streamer.process_texture_uploads(&mut device).unwrap();
        assert_eq!(stats.grown, 1);
        assert_eq!(stats.submitted, 1);
        assert_eq!(streamer.buffers_size(), 1024);

        // 下一次查询 fence 完成，资源标记为 Loaded
        let stats = streamer.process_texture_uploads(&mut device).unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(slot.status(), LoadStatus::Loaded);
        assert_eq!(streamer.take_completed(), vec![slot.id()]);
        assert_eq!(device.texture_data(texture, 0).unwrap(), pixels(16, 16, 7).as_slice());
        assert!(device.violations().is_empty());

        streamer.destroy(&mut device);
        assert_eq!(device.staging_buffer_count(), 0);
    }

    #[test]
    fn test_busy_buffers_defer_uploads() {
        let mut device = HeadlessDevice::new(HeadlessConfig { polls_to_signal: None });
        let mut streamer = TextureStreamer::new(&mut device, &config(1, 512, 1 << 20)).unwrap();

        // 每个 8x8 纹理 256 字节，buffer 只能放下两个
        let slots: Vec<_> = (0..3).map(|_| uploading_slot()).collect();
        let mut textures = Vec::new();
        for (seed, slot) in slots.iter().enumerate() {
            let (req, texture) = request(&mut device, slot, 8, 8, seed as u8);
            streamer.upload_texture(&mut device, req).unwrap();
            textures.push(texture);
        }

        let stats = streamer.process_texture_uploads(&mut device).unwrap();
        assert_eq!((stats.submitted, stats.deferred), (2, 1));

        // fence 未 signal，buffer 不可用
        let stats = streamer.process_texture_uploads(&mut device).unwrap();
        assert_eq!((stats.submitted, stats.deferred), (0, 1));
        assert!(!streamer.is_next_buffer_available(&mut device).unwrap());

        device.signal_all_fences();
        let stats = streamer.process_texture_uploads(&mut device).unwrap();
        assert_eq!((stats.completed, stats.submitted, stats.deferred), (2, 1, 0));

        device.signal_all_fences();
        streamer.process_texture_uploads(&mut device).unwrap();
        for (seed, (slot, texture)) in slots.iter().zip(&textures).enumerate() {
            assert_eq!(slot.status(), LoadStatus::Loaded);
            assert_eq!(device.texture_data(*texture, 0).unwrap(), pixels(8, 8, seed as u8).as_slice());
        }
        assert_eq!(streamer.take_completed().len(), 3);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn test_smaller_requests_are_packed_first() {
        let mut device = HeadlessDevice::new(HeadlessConfig { polls_to_signal: None });
        let mut streamer = TextureStreamer::new(&mut device, &config(1, 1024, 1 << 20)).unwrap();

        let big = uploading_slot();
        let small = uploading_slot();
        let (req, _) = request(&mut device, &big, 16, 16, 0);
        streamer.upload_texture(&mut device, req).unwrap();
        let (req, _) = request(&mut device, &small, 4, 4, 0);
        streamer.upload_texture(&mut device, req).unwrap();

        // 1024 字节放不下 64 + 1024，只有小纹理被提交
        let stats = streamer.process_texture_uploads(&mut device).unwrap();
        assert_eq!((stats.submitted, stats.deferred), (1, 1));

        device.signal_all_fences();
        streamer.process_texture_uploads(&mut device).unwrap();
        assert_eq!(small.status(), LoadStatus::Loaded);
        assert_eq!(big.status(), LoadStatus::Uploading);
    }

    #[test]
    fn test_large_request_is_not_starved_by_small_ones() {
        let mut device = HeadlessDevice::new(HeadlessConfig { polls_to_signal: None });
        let mut streamer = TextureStreamer::new(&mut device, &config(1, 1024, 1 << 20)).unwrap();

        let big = uploading_slot();
        let (req, texture) = request(&mut device, &big, 16, 16, 3);
        streamer.upload_texture(&mut device, req).unwrap();

        // 每帧都有一个新的小纹理，1024 字节的 buffer 放不下 64 + 1024
        let mut smalls = Vec::new();
        let mut passes = 0;
        while big.status() != LoadStatus::Loaded {
            passes += 1;
            assert!(passes <= MAX_STARVED_PASSES + 2, "large upload starved");

            let small = uploading_slot();
            let (req, _) = request(&mut device, &small, 4, 4, 0);
            streamer.upload_texture(&mut device, req).unwrap();
            smalls.push(small);

            device.signal_all_fences();
            streamer.process_texture_uploads(&mut device).unwrap();
        }

        assert_eq!(device.texture_data(texture, 0).unwrap(), pixels(16, 16, 3).as_slice());
        assert!(device.violations().is_empty());

        // 之后小纹理照常完成
        device.signal_all_fences();
        streamer.process_texture_uploads(&mut device).unwrap();
        device.signal_all_fences();
        streamer.process_texture_uploads(&mut device).unwrap();
        assert!(smalls.iter().all(|slot| slot.status() == LoadStatus::Loaded));
    }

    #[test]
    fn test_oversized_texture_overflows() {
        let mut device = HeadlessDevice::default();
        let mut streamer = TextureStreamer::new(&mut device, &config(2, 256, 1024)).unwrap();

        let slot = uploading_slot();
        let (req, _) = request(&mut device, &slot, 32, 32, 0);
        assert!(matches!(
            streamer.upload_texture(&mut device, req),
            Err(StreamingError::Overflow { requested: 4096, max: 1024 })
        ));
        assert_eq!(device.texture_count(), 0);
        assert_eq!(streamer.pending_count(), 0);
    }

    #[test]
    fn test_unloaded_targets_release_their_textures() {
        let mut device = HeadlessDevice::new(HeadlessConfig { polls_to_signal: None });
        let mut streamer = TextureStreamer::new(&mut device, &config(1, 256, 1 << 20)).unwrap();

        let in_flight = uploading_slot();
        let (req, _) = request(&mut device, &in_flight, 8, 8, 0);
        streamer.upload_texture(&mut device, req).unwrap();
        streamer.process_texture_uploads(&mut device).unwrap();

        let queued = uploading_slot();
        let (req, _) = request(&mut device, &queued, 8, 8, 0);
        streamer.upload_texture(&mut device, req).unwrap();
        assert_eq!(device.texture_count(), 2);

        // 排队中的请求直接丢弃
        drop(queued);
        streamer.process_texture_uploads(&mut device).unwrap();
        assert_eq!(device.texture_count(), 1);

        // 提交中的纹理在 fence signal 之后才销毁
        in_flight.set_status(LoadStatus::Unloaded);
        assert_eq!(device.texture_count(), 1);
        device.signal_all_fences();
        let stats = streamer.process_texture_uploads(&mut device).unwrap();
        assert_eq!(stats.completed, 0);
        assert_eq!(device.texture_count(), 0);
        assert!(streamer.take_completed().is_empty());
    }

    #[test]
    fn test_immediate_upload_is_ready_on_return() {
        let mut device = HeadlessDevice::new(HeadlessConfig { polls_to_signal: None });
        let mut streamer = TextureStreamer::new(&mut device, &config(2, 256, 1 << 20)).unwrap();

        let slot = uploading_slot();
        let (req, texture) = request(&mut device, &slot, 16, 16, 3);
        streamer.upload_texture_immediate(&mut device, req).unwrap();

        assert_eq!(device.texture_data(texture, 0).unwrap(), pixels(16, 16, 3).as_slice());
        assert_eq!(streamer.next_buffer_index(), 1);
        assert_eq!(device.pending_fence_count(), 0);
        // 阻塞路径不经过 retire，由调用方设置状态
        assert!(streamer.take_completed().is_empty());

        streamer.reset_buffer_index();
        assert_eq!(streamer.next_buffer_index(), 0);
        assert!(device.violations().is_empty());
    }
}
