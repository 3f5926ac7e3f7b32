use std::sync::Weak;

use pacer_gfx::{FenceHandle, GfxError, StagingBufferHandle, TextureHandle, UploadDevice};

use crate::handle::{AssetId, LoadStatus};
use crate::slot::AssetSlot;

/// 环形缓冲中的一个 staging buffer
///
/// `in_flight` 记录最近一次提交中的纹理，fence signal 之后通过 [`retire`](Self::retire) 结算。
pub struct TextureUploadBuffer {
    buffer: StagingBufferHandle,
    size: u64,
    fence: FenceHandle,
    in_flight: Vec<(Weak<AssetSlot>, TextureHandle)>,
}

// new & init
impl TextureUploadBuffer {
    pub fn new(device: &mut dyn UploadDevice, size: u64, index: usize) -> Result<Self, GfxError> {
        let buffer = device.create_staging_buffer(size, &format!("texture-upload-buffer-{}", index))?;
        // 初始为 signaled，第一帧即可写入
        let fence = match device.create_fence(true, &format!("texture-upload-fence-{}", index)) {
            Ok(fence) => fence,
            Err(e) => {
                device.destroy_staging_buffer(buffer);
                return Err(e);
            }
        };

        Ok(Self {
            buffer,
            size,
            fence,
            in_flight: Vec::new(),
        })
    }

    /// 重新创建更大的 staging buffer，调用前 fence 必须已经 signaled
    pub fn grow(&mut self, device: &mut dyn UploadDevice, new_size: u64, index: usize) -> Result<(), GfxError> {
        log::info!("grow texture upload buffer {}: {} -> {} bytes", index, self.size, new_size);

        let buffer = device.create_staging_buffer(new_size, &format!("texture-upload-buffer-{}", index))?;
        device.destroy_staging_buffer(self.buffer);
        self.buffer = buffer;
        self.size = new_size;
        Ok(())
    }

    pub fn destroy(self, device: &mut dyn UploadDevice) {
        device.destroy_staging_buffer(self.buffer);
        device.destroy_fence(self.fence);
    }
}

// tools
impl TextureUploadBuffer {
    #[inline]
    pub fn is_available(&self, device: &mut dyn UploadDevice) -> Result<bool, GfxError> {
        device.fence_signaled(self.fence)
    }

    pub(crate) fn track(&mut self, target: Weak<AssetSlot>, texture: TextureHandle) {
        self.in_flight.push((target, texture));
    }

    /// 结算上一次提交：仍处于 Uploading 的资源标记为 Loaded，
    /// 已经被卸载的资源在这里销毁纹理
    ///
    /// 只能在 fence signaled 之后调用。返回标记为 Loaded 的数量。
    pub(crate) fn retire(&mut self, device: &mut dyn UploadDevice, completed: &mut Vec<AssetId>) -> usize {
        let mut loaded = 0;
        for (target, texture) in self.in_flight.drain(..) {
            let Some(slot) = target.upgrade() else {
                device.destroy_texture(texture);
                continue;
            };

            let mut state = slot.write();
            match state.status {
                LoadStatus::Uploading => {
                    state.status = LoadStatus::Loaded;
                    completed.push(slot.id());
                    loaded += 1;
                }
                LoadStatus::Unloaded => device.destroy_texture(texture),
                status => log::warn!("asset {} finished uploading in unexpected state {:?}", slot.id(), status),
            }
        }
        loaded
    }
}

// getters
impl TextureUploadBuffer {
    #[inline]
    pub fn buffer(&self) -> StagingBufferHandle {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn fence(&self) -> FenceHandle {
        self.fence
    }

    #[inline]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
