//! Pixel format and color space types used by filter descriptions and rules.

use serde::{Deserialize, Serialize};

/// Pixel/sampling format of a compositing layer.
///
/// `Source` and `Any` are rule wildcards: they never describe an actual
/// surface, only a rule-table value ("copy from the layer" / "match
/// anything").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Rule wildcard: take the format from the current layer entry.
    Source = -1,
    /// Rule wildcard: matches any concrete format.
    Any = 0,
    /// NV12: Y plane + interleaved UV at half resolution.
    Nv12,
    /// P010: 10-bit NV12 variant.
    P010,
    /// Planar YV12.
    Yv12,
    /// Packed YUY2 (4:2:2).
    Yuy2,
    /// Packed AYUV (4:4:4 with alpha).
    Ayuv,
    /// 8-bit ARGB.
    Argb,
    /// 8-bit ABGR.
    Abgr,
    /// 16-bit RGB 5:6:5.
    Rgb565,
    /// 10:10:10:2 RGB.
    R10G10B10A2,
}

impl PixelFormat {
    /// True for YUV-family surface formats (wildcards excluded).
    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            Self::Nv12 | Self::P010 | Self::Yv12 | Self::Yuy2 | Self::Ayuv
        )
    }

    /// True for RGB-family surface formats (wildcards excluded).
    pub fn is_rgb(self) -> bool {
        matches!(
            self,
            Self::Argb | Self::Abgr | Self::Rgb565 | Self::R10G10B10A2
        )
    }

    /// Stable single-byte code for canonical filter serialization.
    pub fn code(self) -> u8 {
        self as i8 as u8
    }
}

/// Color space of a layer or render target.
///
/// `None`, `Source` and `Any` are rule sentinels, as in [`PixelFormat`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorSpace {
    /// No color space (colorfill-only layers).
    None = -2,
    /// Rule wildcard: take the color space from the current layer entry.
    Source = -1,
    /// Rule wildcard: matches any concrete color space.
    Any = 0,
    /// BT.601 limited range.
    Bt601,
    /// BT.601 full range.
    Bt601FullRange,
    /// BT.709 limited range.
    Bt709,
    /// BT.709 full range.
    Bt709FullRange,
    /// xvYCC extended-gamut BT.601.
    XvYcc601,
    /// xvYCC extended-gamut BT.709.
    XvYcc709,
    /// Grayscale treated as BT.601 luma.
    Bt601Gray,
    /// sRGB full range.
    Srgb,
    /// Studio-range RGB (16..235).
    StRgb,
    /// BT.2020 limited-range YUV.
    Bt2020,
    /// BT.2020 full-range YUV.
    Bt2020FullRange,
    /// BT.2020 full-range RGB.
    Bt2020Rgb,
    /// BT.2020 studio-range RGB.
    Bt2020StRgb,
}

impl ColorSpace {
    /// True for RGB-family color spaces.
    pub fn is_rgb(self) -> bool {
        matches!(
            self,
            Self::Srgb | Self::StRgb | Self::Bt2020Rgb | Self::Bt2020StRgb
        )
    }

    /// True for YUV-family color spaces.
    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            Self::Bt601
                | Self::Bt601FullRange
                | Self::Bt709
                | Self::Bt709FullRange
                | Self::XvYcc601
                | Self::XvYcc709
                | Self::Bt601Gray
                | Self::Bt2020
                | Self::Bt2020FullRange
        )
    }

    /// True for the BT.2020 family (wide-gamut matrices).
    pub fn is_bt2020(self) -> bool {
        matches!(
            self,
            Self::Bt2020 | Self::Bt2020FullRange | Self::Bt2020Rgb | Self::Bt2020StRgb
        )
    }

    /// Canonicalize extended-gamut and grayscale variants to the base space
    /// used for rule matching and matrix selection.
    pub fn translate(self) -> Self {
        match self {
            Self::XvYcc601 | Self::Bt601Gray => Self::Bt601,
            Self::XvYcc709 => Self::Bt709,
            other => other,
        }
    }

    /// Stable single-byte code for canonical filter serialization.
    pub fn code(self) -> u8 {
        self as i8 as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_families_are_disjoint() {
        for fmt in [
            PixelFormat::Nv12,
            PixelFormat::P010,
            PixelFormat::Yv12,
            PixelFormat::Yuy2,
            PixelFormat::Ayuv,
            PixelFormat::Argb,
            PixelFormat::Abgr,
            PixelFormat::Rgb565,
            PixelFormat::R10G10B10A2,
        ] {
            assert!(fmt.is_yuv() != fmt.is_rgb(), "{fmt:?}");
        }
    }

    #[test]
    fn wildcards_belong_to_no_family() {
        assert!(!PixelFormat::Any.is_yuv());
        assert!(!PixelFormat::Any.is_rgb());
        assert!(!ColorSpace::Any.is_yuv());
        assert!(!ColorSpace::Any.is_rgb());
    }

    #[test]
    fn translate_canonicalizes_extended_gamut() {
        assert_eq!(ColorSpace::XvYcc601.translate(), ColorSpace::Bt601);
        assert_eq!(ColorSpace::XvYcc709.translate(), ColorSpace::Bt709);
        assert_eq!(ColorSpace::Bt601Gray.translate(), ColorSpace::Bt601);
        assert_eq!(ColorSpace::Bt709.translate(), ColorSpace::Bt709);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(PixelFormat::Source.code(), 0xFF);
        assert_eq!(PixelFormat::Any.code(), 0);
        assert_eq!(ColorSpace::None.code(), 0xFE);
    }
}
