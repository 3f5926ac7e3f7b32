use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::device::GfxError;

/// 持久映射的 staging 内存的一段视图
///
/// 借用自上传设备，生命周期内设备不能销毁对应的 buffer。
/// 所有写入都做越界检查。
pub struct MappedRegion<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> MappedRegion<'a> {
    /// # Safety
    /// `ptr` 在 `'a` 内必须指向至少 `len` 字节可写内存，并且没有其他别名
    pub unsafe fn from_raw(ptr: *mut u8, len: usize) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            len,
            _marker: PhantomData,
        })
    }

    pub fn from_slice(slice: &'a mut [u8]) -> Self {
        Self {
            // slice 的指针永远非空
            ptr: NonNull::from(&mut *slice).cast(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 将 `data` 写入 `offset` 处
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), GfxError> {
        let end = offset.checked_add(data.len()).filter(|end| *end <= self.len).ok_or(GfxError::OutOfBounds {
            offset,
            len: data.len(),
            size: self.len,
        })?;
        debug_assert!(end <= self.len);

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
