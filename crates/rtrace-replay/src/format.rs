//! Texel layout of the formats the engine can size, stage and prime.

use ash::vk;

/// How a compute shader writes one texel of a storage image.
#[derive(Debug, Clone, Copy)]
pub struct StorageInfo {
    /// GLSL image format qualifier, e.g. `rgba8`.
    pub qualifier: &'static str,
    /// GLSL image type: `image2D`, `uimage2D` or `iimage2D`.
    pub image_type: &'static str,
    /// GLSL expression producing the texel from `uint` words `src[i..]`.
    pub decode: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct FormatInfo {
    pub format: vk::Format,
    pub block_width: u32,
    pub block_height: u32,
    /// Bytes per texel block, all aspects combined.
    pub block_bytes: u32,
    pub aspects: vk::ImageAspectFlags,
    pub storage: Option<StorageInfo>,
}

const COLOR: vk::ImageAspectFlags = vk::ImageAspectFlags::COLOR;
const DEPTH: vk::ImageAspectFlags = vk::ImageAspectFlags::DEPTH;
const STENCIL: vk::ImageAspectFlags = vk::ImageAspectFlags::STENCIL;

macro_rules! format_table {
    ($( $fmt:ident => ($bw:expr, $bh:expr, $bytes:expr, $aspects:expr, $storage:expr) ),* $(,)?) => {
        static FORMATS: &[FormatInfo] = &[
            $(FormatInfo {
                format: vk::Format::$fmt,
                block_width: $bw,
                block_height: $bh,
                block_bytes: $bytes,
                aspects: $aspects,
                storage: $storage,
            },)*
        ];
    };
}

const fn storage(qualifier: &'static str, image_type: &'static str, decode: &'static str) -> Option<StorageInfo> {
    Some(StorageInfo { qualifier, image_type, decode })
}

format_table! {
    R8_UNORM => (1, 1, 1, COLOR, storage("r8", "image2D",
        "vec4(float((src[i >> 2] >> ((i & 3u) * 8u)) & 0xFFu) / 255.0)")),
    R8G8_UNORM => (1, 1, 2, COLOR, storage("rg8", "image2D",
        "vec4(unpackUnorm4x8((src[i >> 1] >> ((i & 1u) * 16u)) & 0xFFFFu).xy, 0.0, 1.0)")),
    R8G8B8A8_UNORM => (1, 1, 4, COLOR, storage("rgba8", "image2D", "unpackUnorm4x8(src[i])")),
    R8G8B8A8_SNORM => (1, 1, 4, COLOR, storage("rgba8_snorm", "image2D", "unpackSnorm4x8(src[i])")),
    R8G8B8A8_UINT => (1, 1, 4, COLOR, storage("rgba8ui", "uimage2D",
        "uvec4(src[i] & 0xFFu, (src[i] >> 8) & 0xFFu, (src[i] >> 16) & 0xFFu, src[i] >> 24)")),
    R8G8B8A8_SRGB => (1, 1, 4, COLOR, None),
    B8G8R8A8_UNORM => (1, 1, 4, COLOR, None),
    B8G8R8A8_SRGB => (1, 1, 4, COLOR, None),
    A2B10G10R10_UNORM_PACK32 => (1, 1, 4, COLOR, storage("rgb10_a2", "image2D",
        "vec4(float(src[i] & 0x3FFu) / 1023.0, float((src[i] >> 10) & 0x3FFu) / 1023.0, \
         float((src[i] >> 20) & 0x3FFu) / 1023.0, float(src[i] >> 30) / 3.0)")),
    R16_SFLOAT => (1, 1, 2, COLOR, storage("r16f", "image2D",
        "vec4(unpackHalf2x16(src[i >> 1] >> ((i & 1u) * 16u)).x)")),
    R16G16_SFLOAT => (1, 1, 4, COLOR, storage("rg16f", "image2D", "vec4(unpackHalf2x16(src[i]), 0.0, 1.0)")),
    R16G16B16A16_SFLOAT => (1, 1, 8, COLOR, storage("rgba16f", "image2D",
        "vec4(unpackHalf2x16(src[2u * i]), unpackHalf2x16(src[2u * i + 1u]))")),
    R32_UINT => (1, 1, 4, COLOR, storage("r32ui", "uimage2D", "uvec4(src[i])")),
    R32_SINT => (1, 1, 4, COLOR, storage("r32i", "iimage2D", "ivec4(int(src[i]))")),
    R32_SFLOAT => (1, 1, 4, COLOR, storage("r32f", "image2D", "vec4(uintBitsToFloat(src[i]))")),
    R32G32_SFLOAT => (1, 1, 8, COLOR, storage("rg32f", "image2D",
        "vec4(uintBitsToFloat(src[2u * i]), uintBitsToFloat(src[2u * i + 1u]), 0.0, 1.0)")),
    R32G32B32A32_UINT => (1, 1, 16, COLOR, storage("rgba32ui", "uimage2D",
        "uvec4(src[4u * i], src[4u * i + 1u], src[4u * i + 2u], src[4u * i + 3u])")),
    R32G32B32A32_SFLOAT => (1, 1, 16, COLOR, storage("rgba32f", "image2D",
        "uintBitsToFloat(uvec4(src[4u * i], src[4u * i + 1u], src[4u * i + 2u], src[4u * i + 3u]))")),
    D16_UNORM => (1, 1, 2, DEPTH, None),
    X8_D24_UNORM_PACK32 => (1, 1, 4, DEPTH, None),
    D32_SFLOAT => (1, 1, 4, DEPTH, None),
    S8_UINT => (1, 1, 1, STENCIL, None),
    D24_UNORM_S8_UINT => (1, 1, 4, vk::ImageAspectFlags::from_raw(DEPTH.as_raw() | STENCIL.as_raw()), None),
    D32_SFLOAT_S8_UINT => (1, 1, 5, vk::ImageAspectFlags::from_raw(DEPTH.as_raw() | STENCIL.as_raw()), None),
    BC1_RGBA_UNORM_BLOCK => (4, 4, 8, COLOR, None),
    BC1_RGBA_SRGB_BLOCK => (4, 4, 8, COLOR, None),
    BC3_UNORM_BLOCK => (4, 4, 16, COLOR, None),
    BC3_SRGB_BLOCK => (4, 4, 16, COLOR, None),
    BC7_UNORM_BLOCK => (4, 4, 16, COLOR, None),
    BC7_SRGB_BLOCK => (4, 4, 16, COLOR, None),
    ETC2_R8G8B8A8_UNORM_BLOCK => (4, 4, 16, COLOR, None),
    ASTC_4X4_UNORM_BLOCK => (4, 4, 16, COLOR, None),
}

pub fn info(format: vk::Format) -> Option<&'static FormatInfo> {
    FORMATS.iter().find(|f| f.format == format)
}

pub fn info_raw(format: i32) -> Option<&'static FormatInfo> {
    info(vk::Format::from_raw(format))
}

impl FormatInfo {
    pub fn is_compressed(&self) -> bool {
        self.block_width > 1 || self.block_height > 1
    }

    /// Bytes for one tightly packed `width` x `height` x `depth` level.
    pub fn level_size(&self, width: u32, height: u32, depth: u32) -> u64 {
        let bw = u64::from(width.max(1).div_ceil(self.block_width));
        let bh = u64::from(height.max(1).div_ceil(self.block_height));
        bw * bh * u64::from(depth.max(1)) * u64::from(self.block_bytes)
    }
}

/// Extent of `level` in a chain whose base is `extent`.
pub fn mip_extent(extent: [u32; 3], level: u32) -> [u32; 3] {
    [
        (extent[0] >> level).max(1),
        (extent[1] >> level).max(1),
        (extent[2] >> level).max(1),
    ]
}

/// Tightly packed bytes of every level and layer, or `None` for unknown formats.
pub fn image_size(format: vk::Format, extent: [u32; 3], mip_levels: u32, array_layers: u32) -> Option<u64> {
    let info = info(format)?;
    let per_layer: u64 = (0..mip_levels.max(1))
        .map(|level| {
            let [w, h, d] = mip_extent(extent, level);
            info.level_size(w, h, d)
        })
        .sum();
    Some(per_layer * u64::from(array_layers.max(1)))
}
