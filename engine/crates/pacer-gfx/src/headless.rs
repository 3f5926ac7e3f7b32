use std::time::Duration;

use slotmap::SlotMap;

use crate::device::{GfxError, UploadDevice};
use crate::format::{TextureCopy, TextureDesc};
use crate::handles::{FenceHandle, GpuBufferHandle, StagingBufferHandle, TextureHandle};
use crate::mapped::MappedRegion;

#[derive(Clone, Copy, Debug)]
pub struct HeadlessConfig {
    /// 提交后 fence 在第几次查询时变为 signaled；`None` 表示只能手动 signal
    pub polls_to_signal: Option<u32>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            polls_to_signal: Some(1),
        }
    }
}

/// 在 fence 未 signaled 时访问了 staging 内存
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteViolation {
    pub buffer: StagingBufferHandle,
    pub fence: FenceHandle,
}

struct HeadlessStagingBuffer {
    memory: Box<[u8]>,
    name: String,
    last_fence: Option<FenceHandle>,
    flush_count: usize,
    submit_count: usize,
}

struct HeadlessFence {
    signaled: bool,
    polls_remaining: u32,
    pending: Option<(StagingBufferHandle, Vec<TextureCopy>)>,
}

struct HeadlessTexture {
    desc: TextureDesc,
    levels: Vec<Vec<u8>>,
}

/// 纯内存的上传设备
///
/// - staging buffer 是普通的堆内存
/// - 拷贝命令在 fence signal 的时刻执行，此时才从 staging 内存读取数据；
///   因此在 fence 未 signal 时改写 staging 内存会直接污染纹理内容
/// - 所有在 fence 未 signal 时对 staging 内存的访问都会记录为 [`WriteViolation`]
pub struct HeadlessDevice {
    config: HeadlessConfig,

    staging_buffers: SlotMap<StagingBufferHandle, HeadlessStagingBuffer>,
    fences: SlotMap<FenceHandle, HeadlessFence>,
    textures: SlotMap<TextureHandle, HeadlessTexture>,
    mesh_buffers: SlotMap<GpuBufferHandle, Vec<u8>>,

    violations: Vec<WriteViolation>,
    executed_copies: usize,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

// new & init
impl HeadlessDevice {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            config,
            staging_buffers: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            mesh_buffers: SlotMap::with_key(),
            violations: Vec::new(),
            executed_copies: 0,
        }
    }
}

// tools
impl HeadlessDevice {
    /// 手动 signal 一个 fence，并执行其关联的拷贝
    pub fn signal_fence(&mut self, fence: FenceHandle) {
        let Some(state) = self.fences.get_mut(fence) else {
            return;
        };
        if state.signaled {
            return;
        }
        state.signaled = true;
        let pending = state.pending.take();

        if let Some((buffer, copies)) = pending {
            self.execute_copies(buffer, &copies);
        }
    }

    pub fn signal_all_fences(&mut self) {
        let fences: Vec<_> = self.fences.keys().collect();
        for fence in fences {
            self.signal_fence(fence);
        }
    }

    fn execute_copies(&mut self, buffer: StagingBufferHandle, copies: &[TextureCopy]) {
        let Some(staging) = self.staging_buffers.get(buffer) else {
            log::warn!("staging buffer destroyed before its copies executed");
            return;
        };

        for copy in copies {
            let Some(texture) = self.textures.get_mut(copy.texture) else {
                log::warn!("texture destroyed before its upload executed");
                continue;
            };
            let size = texture.desc.format.level_size(copy.width, copy.height) as usize;
            let start = copy.buffer_offset as usize;
            let Some(src) = staging.memory.get(start..start + size) else {
                log::error!("texture copy reads outside of staging buffer '{}'", staging.name);
                continue;
            };
            if let Some(level) = texture.levels.get_mut(copy.mip_level as usize) {
                level.clear();
                level.extend_from_slice(src);
                self.executed_copies += 1;
            }
        }
    }

    fn fence_pending(&self, fence: Option<FenceHandle>) -> Option<FenceHandle> {
        fence.filter(|fence| self.fences.get(*fence).is_some_and(|state| !state.signaled))
    }
}

// getters
impl HeadlessDevice {
    #[inline]
    pub fn violations(&self) -> &[WriteViolation] {
        &self.violations
    }

    /// 已经执行（即 fence 已 signal）的拷贝数量
    #[inline]
    pub fn executed_copies(&self) -> usize {
        self.executed_copies
    }

    pub fn texture_data(&self, texture: TextureHandle, mip_level: u32) -> Option<&[u8]> {
        self.textures.get(texture)?.levels.get(mip_level as usize).map(Vec::as_slice)
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.textures.get(texture).map(|texture| &texture.desc)
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn staging_buffer_count(&self) -> usize {
        self.staging_buffers.len()
    }

    pub fn flush_count(&self, buffer: StagingBufferHandle) -> usize {
        self.staging_buffers.get(buffer).map_or(0, |staging| staging.flush_count)
    }

    pub fn submit_count(&self, buffer: StagingBufferHandle) -> usize {
        self.staging_buffers.get(buffer).map_or(0, |staging| staging.submit_count)
    }

    pub fn pending_fence_count(&self) -> usize {
        self.fences.values().filter(|fence| !fence.signaled).count()
    }

    pub fn mesh_buffer_data(&self, buffer: GpuBufferHandle) -> Option<&[u8]> {
        self.mesh_buffers.get(buffer).map(Vec::as_slice)
    }
}

impl UploadDevice for HeadlessDevice {
    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn create_staging_buffer(&mut self, size: u64, name: &str) -> Result<StagingBufferHandle, GfxError> {
        Ok(self.staging_buffers.insert(HeadlessStagingBuffer {
            memory: vec![0u8; size as usize].into_boxed_slice(),
            name: name.to_string(),
            last_fence: None,
            flush_count: 0,
            submit_count: 0,
        }))
    }

    fn destroy_staging_buffer(&mut self, buffer: StagingBufferHandle) {
        let Some(last_fence) = self.staging_buffers.get(buffer).map(|staging| staging.last_fence) else {
            return;
        };
        if let Some(fence) = self.fence_pending(last_fence) {
            log::error!("staging buffer destroyed while fence is pending");
            self.violations.push(WriteViolation { buffer, fence });
        }
        self.staging_buffers.remove(buffer);
    }

    fn staging_buffer_size(&self, buffer: StagingBufferHandle) -> Option<u64> {
        self.staging_buffers.get(buffer).map(|staging| staging.memory.len() as u64)
    }

    fn mapped_region(&mut self, buffer: StagingBufferHandle) -> Result<MappedRegion<'_>, GfxError> {
        let last_fence =
            self.staging_buffers.get(buffer).ok_or(GfxError::InvalidHandle("staging buffer"))?.last_fence;
        if let Some(fence) = self.fence_pending(last_fence) {
            log::error!("staging buffer mapped while fence is pending");
            self.violations.push(WriteViolation { buffer, fence });
        }

        let staging = self.staging_buffers.get_mut(buffer).ok_or(GfxError::InvalidHandle("staging buffer"))?;
        Ok(MappedRegion::from_slice(&mut staging.memory))
    }

    fn flush_staging_buffer(&mut self, buffer: StagingBufferHandle, offset: u64, size: u64) -> Result<(), GfxError> {
        let staging = self.staging_buffers.get_mut(buffer).ok_or(GfxError::InvalidHandle("staging buffer"))?;
        let len = staging.memory.len();
        if offset.saturating_add(size) > len as u64 {
            return Err(GfxError::OutOfBounds {
                offset: offset as usize,
                len: size as usize,
                size: len,
            });
        }
        staging.flush_count += 1;
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool, _name: &str) -> Result<FenceHandle, GfxError> {
        Ok(self.fences.insert(HeadlessFence {
            signaled,
            polls_remaining: 0,
            pending: None,
        }))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.fences.remove(fence);
    }

    fn fence_signaled(&mut self, fence: FenceHandle) -> Result<bool, GfxError> {
        let polls_to_signal = self.config.polls_to_signal;
        let state = self.fences.get_mut(fence).ok_or(GfxError::InvalidHandle("fence"))?;
        if state.signaled {
            return Ok(true);
        }
        if polls_to_signal.is_none() {
            return Ok(false);
        }
        if state.polls_remaining > 0 {
            state.polls_remaining -= 1;
            return Ok(false);
        }

        self.signal_fence(fence);
        Ok(true)
    }

    /// 等待即意味着 GPU 完成，直接 signal
    fn wait_fence(&mut self, fence: FenceHandle, _timeout: Duration) -> Result<bool, GfxError> {
        if !self.fences.contains_key(fence) {
            return Err(GfxError::InvalidHandle("fence"));
        }
        self.signal_fence(fence);
        Ok(true)
    }

    fn submit_texture_copies(
        &mut self,
        buffer: StagingBufferHandle,
        copies: &[TextureCopy],
        fence: FenceHandle,
    ) -> Result<(), GfxError> {
        if !self.staging_buffers.contains_key(buffer) {
            return Err(GfxError::InvalidHandle("staging buffer"));
        }
        if !self.fences.contains_key(fence) {
            return Err(GfxError::InvalidHandle("fence"));
        }
        if let Some(copy) = copies.iter().find(|copy| !self.textures.contains_key(copy.texture)) {
            log::error!("texture copy targets a destroyed texture: {:?}", copy.texture);
            return Err(GfxError::InvalidHandle("texture"));
        }

        // 复用一个尚未完成的 fence：先让上一次提交完成
        if self.fences.get(fence).is_some_and(|state| !state.signaled) {
            log::warn!("fence reused while pending, completing previous submission first");
            self.signal_fence(fence);
        }

        let polls_remaining = self.config.polls_to_signal.unwrap_or(0);
        if let Some(state) = self.fences.get_mut(fence) {
            state.signaled = false;
            state.polls_remaining = polls_remaining;
            state.pending = Some((buffer, copies.to_vec()));
        }
        if let Some(staging) = self.staging_buffers.get_mut(buffer) {
            staging.last_fence = Some(fence);
            staging.submit_count += 1;
        }
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GfxError> {
        let levels = (0..desc.mip_levels.max(1)).map(|_| Vec::new()).collect();
        Ok(self.textures.insert(HeadlessTexture {
            desc: desc.clone(),
            levels,
        }))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(texture);
    }

    fn create_mesh_buffer(&mut self, bytes: &[u8], _name: &str) -> Result<GpuBufferHandle, GfxError> {
        Ok(self.mesh_buffers.insert(bytes.to_vec()))
    }

    fn destroy_mesh_buffer(&mut self, buffer: GpuBufferHandle) {
        self.mesh_buffers.remove(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;

    fn setup(config: HeadlessConfig) -> (HeadlessDevice, StagingBufferHandle, FenceHandle, TextureHandle) {
        let mut device = HeadlessDevice::new(config);
        let buffer = device.create_staging_buffer(64, "staging").unwrap();
        let fence = device.create_fence(true, "fence").unwrap();
        let texture = device.create_texture(&TextureDesc::new(2, 2, PixelFormat::Rgba8, "tex")).unwrap();
        (device, buffer, fence, texture)
    }

    fn copy(texture: TextureHandle) -> TextureCopy {
        TextureCopy {
            texture,
            buffer_offset: 0,
            mip_level: 0,
            width: 2,
            height: 2,
        }
    }

    #[test]
    fn test_fence_signals_after_configured_polls() {
        let (mut device, buffer, fence, texture) = setup(HeadlessConfig {
            polls_to_signal: Some(2),
        });
        device.mapped_region(buffer).unwrap().write(0, &[7u8; 16]).unwrap();
        device.submit_texture_copies(buffer, &[copy(texture)], fence).unwrap();

        assert!(!device.fence_signaled(fence).unwrap());
        assert!(!device.fence_signaled(fence).unwrap());
        // 拷贝在 signal 时才执行
        assert_eq!(device.texture_data(texture, 0).unwrap(), &[] as &[u8]);
        assert!(device.fence_signaled(fence).unwrap());
        assert_eq!(device.texture_data(texture, 0).unwrap(), &[7u8; 16]);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn test_manual_fences_only_signal_on_request() {
        let (mut device, buffer, fence, texture) = setup(HeadlessConfig { polls_to_signal: None });
        device.submit_texture_copies(buffer, &[copy(texture)], fence).unwrap();
        for _ in 0..10 {
            assert!(!device.fence_signaled(fence).unwrap());
        }
        assert_eq!(device.pending_fence_count(), 1);

        device.signal_all_fences();
        assert!(device.fence_signaled(fence).unwrap());
        assert_eq!(device.executed_copies(), 1);
    }

    #[test]
    fn test_write_while_pending_is_recorded() {
        let (mut device, buffer, fence, texture) = setup(HeadlessConfig { polls_to_signal: None });
        device.mapped_region(buffer).unwrap().write(0, &[1u8; 16]).unwrap();
        device.submit_texture_copies(buffer, &[copy(texture)], fence).unwrap();

        device.mapped_region(buffer).unwrap().write(0, &[2u8; 16]).unwrap();
        assert_eq!(device.violations(), &[WriteViolation { buffer, fence }]);

        // 违规写入污染了尚未执行的拷贝
        device.signal_fence(fence);
        assert_eq!(device.texture_data(texture, 0).unwrap(), &[2u8; 16]);
    }

    #[test]
    fn test_wait_fence_completes_submission() {
        let (mut device, buffer, fence, texture) = setup(HeadlessConfig { polls_to_signal: None });
        device.submit_texture_copies(buffer, &[copy(texture)], fence).unwrap();
        assert!(device.wait_fence(fence, Duration::from_secs(1)).unwrap());
        assert_eq!(device.executed_copies(), 1);
    }

    #[test]
    fn test_flush_out_of_range_is_rejected() {
        let (mut device, buffer, _, _) = setup(HeadlessConfig::default());
        device.flush_staging_buffer(buffer, 0, 64).unwrap();
        assert!(device.flush_staging_buffer(buffer, 60, 8).is_err());
        assert_eq!(device.flush_count(buffer), 1);
    }
}
