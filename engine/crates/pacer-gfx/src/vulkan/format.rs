use ash::vk;

use crate::format::PixelFormat;

pub(crate) fn vk_format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::R8 => vk::Format::R8_UNORM,
        PixelFormat::Rg8 => vk::Format::R8G8_UNORM,
        PixelFormat::Rgb8 => vk::Format::R8G8B8_UNORM,
        PixelFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        PixelFormat::Bgra8 => vk::Format::B8G8R8A8_UNORM,
        PixelFormat::R16 => vk::Format::R16_UNORM,
        PixelFormat::Rgba16 => vk::Format::R16G16B16A16_UNORM,
        PixelFormat::R32Float => vk::Format::R32_SFLOAT,
        PixelFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srgb_and_unorm_are_distinct() {
        assert_eq!(vk_format(PixelFormat::Rgba8), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(vk_format(PixelFormat::Rgba8Srgb), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(vk_format(PixelFormat::Rgba16), vk::Format::R16G16B16A16_UNORM);
    }
}
