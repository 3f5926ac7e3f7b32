use crate::handles::TextureHandle;

/// 纹理像素格式
///
/// 只包含上传路径需要关心的信息：每个像素的字节数以及 buffer offset 的对齐要求。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Rgba8Srgb,
    Bgra8,
    R16,
    Rgba16,
    R32Float,
    Rgba32Float,
}

impl PixelFormat {
    #[inline]
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::Rg8 | PixelFormat::R16 => 2,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Rgba8Srgb | PixelFormat::Bgra8 | PixelFormat::R32Float => 4,
            PixelFormat::Rgba16 => 8,
            PixelFormat::Rgba32Float => 16,
        }
    }

    /// buffer -> image 拷贝时 buffer offset 的对齐要求
    ///
    /// vkCmdCopyBufferToImage 要求 offset 同时是 texel block 大小和 4 的倍数，取二者最小公倍数
    #[inline]
    pub fn required_alignment(self) -> u64 {
        lcm(self.bytes_per_pixel(), 4)
    }

    /// 指定尺寸的一层 mip 的字节数
    #[inline]
    pub fn level_size(self, width: u32, height: u32) -> u64 {
        width as u64 * height as u64 * self.bytes_per_pixel()
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

/// 将 `value` 向上取整到 `alignment` 的倍数，`alignment` 为 0 时原样返回
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: PixelFormat,
    pub name: String,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat, name: impl Into<String>) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            format,
            name: name.into(),
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    /// 第 `level` 层 mip 的尺寸，最小为 1
    pub fn mip_extent(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

/// 一次 staging buffer -> texture 子资源的拷贝
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureCopy {
    pub texture: TextureHandle,
    pub buffer_offset: u64,
    pub mip_level: u32,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_alignment() {
        assert_eq!(PixelFormat::R8.required_alignment(), 4);
        assert_eq!(PixelFormat::Rgb8.required_alignment(), 12);
        assert_eq!(PixelFormat::Rgba8.required_alignment(), 4);
        assert_eq!(PixelFormat::Rgba16.required_alignment(), 8);
        assert_eq!(PixelFormat::Rgba32Float.required_alignment(), 16);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(13, 12), 24);
        assert_eq!(align_up(7, 0), 7);
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let desc = TextureDesc::new(8, 2, PixelFormat::Rgba8, "t").with_mip_levels(4);
        assert_eq!(desc.mip_extent(0), (8, 2));
        assert_eq!(desc.mip_extent(1), (4, 1));
        assert_eq!(desc.mip_extent(3), (1, 1));
    }
}
