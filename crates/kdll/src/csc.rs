//! Color-space conversion parameters: standard matrices, procamp folding,
//! fixed-point mapping, and the memoizing per-slot resolver.
//!
//! Matrices are 3x4 row-major (`[c0 c1 c2 off]` per output channel) acting
//! on 8-bit-domain channel values. The resolver allocates coefficient slots
//! 0..=5 per search and memoizes computed coefficient sets by
//! `(src, dst, procamp id, procamp version)` so an unchanged pair returns
//! bit-identical coefficients without recomputation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use fc_common::{CoeffId, ColorSpace, Procamp, RuleFlag};
use tracing::{debug, trace};

use crate::error::KdllError;
use crate::state::SearchState;

/// Allocatable coefficient slots (CoeffID 0..=5).
pub const CSC_SLOTS: usize = 6;

/// A 3x4 conversion matrix in row-major order.
pub type CscMat = [f32; 12];

/// Conversion family, used by the strategy hook when mapping coefficients
/// into hardware fixed-point layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CscType {
    YuvToRgb,
    RgbToYuv,
    YuvToYuv,
    RgbToRgb,
}

impl CscType {
    /// Classify a (src, dst) color-space pair.
    pub fn of(src: ColorSpace, dst: ColorSpace) -> Self {
        match (src.is_rgb(), dst.is_rgb()) {
            (false, true) => Self::YuvToRgb,
            (true, false) => Self::RgbToYuv,
            (false, false) => Self::YuvToYuv,
            (true, true) => Self::RgbToRgb,
        }
    }
}

// ---------------------------------------------------------------------------
// Standard conversion matrices
// ---------------------------------------------------------------------------

/// Identity (no conversion).
pub const CSC_IDENTITY: CscMat = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0,
];

/// BT.601 full-range YUV (centered chroma) to full-range RGB.
const CSC_BT601_YUV_RGB: [f32; 9] = [
    1.000000, 0.000000, 1.402000, //
    1.000000, -0.344136, -0.714136, //
    1.000000, 1.772000, 0.000000,
];

/// BT.709 full-range YUV to full-range RGB.
const CSC_BT709_YUV_RGB: [f32; 9] = [
    1.000000, 0.000000, 1.574800, //
    1.000000, -0.187324, -0.468124, //
    1.000000, 1.855600, 0.000000,
];

/// BT.2020 non-constant YUV to RGB.
const CSC_BT2020_YUV_RGB: [f32; 9] = [
    1.000000, 0.000000, 1.474600, //
    1.000000, -0.164553, -0.571353, //
    1.000000, 1.881400, 0.000000,
];

/// BT.601 RGB to YUV.
const CSC_BT601_RGB_YUV: [f32; 9] = [
    0.299000, 0.587000, 0.114000, //
    -0.168736, -0.331264, 0.500000, //
    0.500000, -0.418688, -0.081312,
];

/// BT.709 RGB to YUV.
const CSC_BT709_RGB_YUV: [f32; 9] = [
    0.212600, 0.715200, 0.072200, //
    -0.114572, -0.385428, 0.500000, //
    0.500000, -0.454153, -0.045847,
];

/// BT.2020 RGB to non-constant YUV.
const CSC_BT2020_RGB_YUV: [f32; 9] = [
    0.262700, 0.678000, 0.059300, //
    -0.139630, -0.360370, 0.500000, //
    0.500000, -0.459786, -0.040214,
];

/// Full-range sRGB to studio-range RGB.
const CSC_SRGB_STRGB: CscMat = [
    0.858824, 0.000000, 0.000000, 16.000000, //
    0.000000, 0.858824, 0.000000, 16.000000, //
    0.000000, 0.000000, 0.858824, 16.000000,
];

/// Studio-range RGB to full-range sRGB.
const CSC_STRGB_SRGB: CscMat = [
    1.164384, 0.000000, 0.000000, -18.630137, //
    0.000000, 1.164384, 0.000000, -18.630137, //
    0.000000, 0.000000, 1.164384, -18.630137,
];

/// BT.2020 full-range RGB to studio-range RGB.
const CSC_BT2020RGB_BT2020STRGB: CscMat = [
    0.856305, 0.000000, 0.000000, 64.000000, //
    0.000000, 0.856305, 0.000000, 64.000000, //
    0.000000, 0.000000, 0.856305, 64.000000,
];

/// BT.2020 studio-range RGB to full-range RGB.
const CSC_BT2020STRGB_BT2020RGB: CscMat = [
    1.167808, 0.000000, 0.000000, -74.739726, //
    0.000000, 1.167808, 0.000000, -74.739726, //
    0.000000, 0.000000, 1.167808, -74.739726,
];

// ---------------------------------------------------------------------------
// Matrix algebra
// ---------------------------------------------------------------------------

/// Lift a 3x3 matrix into 3x4 with zero offsets.
fn mat3(m: &[f32; 9]) -> CscMat {
    [
        m[0], m[1], m[2], 0.0, //
        m[3], m[4], m[5], 0.0, //
        m[6], m[7], m[8], 0.0,
    ]
}

/// Compose two 3x4 matrices: result applies `b` first, then `a`.
pub fn matrix_product(a: &CscMat, b: &CscMat) -> CscMat {
    let mut out = [0.0f32; 12];
    for row in 0..3 {
        for col in 0..3 {
            out[row * 4 + col] = a[row * 4] * b[col]
                + a[row * 4 + 1] * b[4 + col]
                + a[row * 4 + 2] * b[8 + col];
        }
        out[row * 4 + 3] = a[row * 4] * b[3]
            + a[row * 4 + 1] * b[7]
            + a[row * 4 + 2] * b[11]
            + a[row * 4 + 3];
    }
    out
}

/// Fold a pre-offset into a matrix: `M * (x + o)`.
fn with_pre_offset(m: &CscMat, o: [f32; 3]) -> CscMat {
    let mut out = *m;
    for row in 0..3 {
        out[row * 4 + 3] +=
            m[row * 4] * o[0] + m[row * 4 + 1] * o[1] + m[row * 4 + 2] * o[2];
    }
    out
}

/// Add an offset to the matrix output: `M * x + o`.
fn with_post_offset(m: &CscMat, o: [f32; 3]) -> CscMat {
    let mut out = *m;
    for row in 0..3 {
        out[row * 4 + 3] += o[row];
    }
    out
}

// ---------------------------------------------------------------------------
// Conversion selection
// ---------------------------------------------------------------------------

/// YUV base matrix (full-range, centered chroma) for a YUV space.
fn yuv_rgb_base(cs: ColorSpace) -> Option<&'static [f32; 9]> {
    match cs {
        ColorSpace::Bt601 | ColorSpace::Bt601FullRange => Some(&CSC_BT601_YUV_RGB),
        ColorSpace::Bt709 | ColorSpace::Bt709FullRange => Some(&CSC_BT709_YUV_RGB),
        ColorSpace::Bt2020 | ColorSpace::Bt2020FullRange => Some(&CSC_BT2020_YUV_RGB),
        _ => None,
    }
}

fn rgb_yuv_base(cs: ColorSpace) -> Option<&'static [f32; 9]> {
    match cs {
        ColorSpace::Bt601 | ColorSpace::Bt601FullRange => Some(&CSC_BT601_RGB_YUV),
        ColorSpace::Bt709 | ColorSpace::Bt709FullRange => Some(&CSC_BT709_RGB_YUV),
        ColorSpace::Bt2020 | ColorSpace::Bt2020FullRange => Some(&CSC_BT2020_RGB_YUV),
        _ => None,
    }
}

fn is_limited_yuv(cs: ColorSpace) -> bool {
    matches!(
        cs,
        ColorSpace::Bt601 | ColorSpace::Bt709 | ColorSpace::Bt2020
    )
}

/// YUV space to its full-range RGB sibling.
fn yuv_to_full_rgb(cs: ColorSpace) -> Option<CscMat> {
    let base = yuv_rgb_base(cs)?;
    let m = with_pre_offset(&mat3(base), [0.0, -128.0, -128.0]);
    Some(if is_limited_yuv(cs) {
        // Expand the studio range on the way out.
        matrix_product(&CSC_STRGB_SRGB, &m)
    } else {
        m
    })
}

/// Full-range RGB to a YUV space.
fn full_rgb_to_yuv(cs: ColorSpace) -> Option<CscMat> {
    let base = rgb_yuv_base(cs)?;
    let m = with_post_offset(&mat3(base), [0.0, 128.0, 128.0]);
    Some(if is_limited_yuv(cs) {
        matrix_product(&m, &CSC_SRGB_STRGB)
    } else {
        m
    })
}

/// RGB space to full-range RGB.
fn rgb_to_full_rgb(cs: ColorSpace) -> Option<CscMat> {
    match cs {
        ColorSpace::Srgb | ColorSpace::Bt2020Rgb => Some(CSC_IDENTITY),
        ColorSpace::StRgb => Some(CSC_STRGB_SRGB),
        ColorSpace::Bt2020StRgb => Some(CSC_BT2020STRGB_BT2020RGB),
        _ => None,
    }
}

/// Full-range RGB to an RGB space.
fn full_rgb_to_rgb(cs: ColorSpace) -> Option<CscMat> {
    match cs {
        ColorSpace::Srgb | ColorSpace::Bt2020Rgb => Some(CSC_IDENTITY),
        ColorSpace::StRgb => Some(CSC_SRGB_STRGB),
        ColorSpace::Bt2020StRgb => Some(CSC_BT2020RGB_BT2020STRGB),
        _ => None,
    }
}

/// Conversion matrix from `src` to `dst`, composed through full-range RGB
/// where no direct matrix exists.
pub fn csc_matrix(src: ColorSpace, dst: ColorSpace) -> Result<CscMat, KdllError> {
    let unsupported = || KdllError::CscUnsupported { src, dst };
    let s = src.translate();
    let d = dst.translate();
    if s == d {
        return Ok(CSC_IDENTITY);
    }
    let to_rgb = if s.is_yuv() {
        yuv_to_full_rgb(s).ok_or_else(unsupported)?
    } else if s.is_rgb() {
        rgb_to_full_rgb(s).ok_or_else(unsupported)?
    } else {
        return Err(unsupported());
    };
    let from_rgb = if d.is_yuv() {
        full_rgb_to_yuv(d).ok_or_else(unsupported)?
    } else if d.is_rgb() {
        full_rgb_to_rgb(d).ok_or_else(unsupported)?
    } else {
        return Err(unsupported());
    };
    Ok(matrix_product(&from_rgb, &to_rgb))
}

// ---------------------------------------------------------------------------
// Procamp folding
// ---------------------------------------------------------------------------

/// Procamp adjustment as a YUV-domain matrix.
fn procamp_matrix(p: &Procamp) -> CscMat {
    let c = p.contrast;
    let s = p.saturation;
    let (sin_h, cos_h) = p.hue.to_radians().sin_cos();
    let uv = s * c;
    [
        c, 0.0, 0.0, p.brightness + 16.0 - 16.0 * c, //
        0.0, uv * cos_h, -uv * sin_h, 128.0 * (1.0 - uv * cos_h) + 128.0 * uv * sin_h, //
        0.0, uv * sin_h, uv * cos_h, 128.0 * (1.0 - uv * cos_h) - 128.0 * uv * sin_h,
    ]
}

/// Fold a procamp adjustment into a conversion matrix.
///
/// The adjustment is defined in the YUV domain: it is applied after the
/// conversion when the destination is YUV, before it when only the source
/// side is YUV.
fn fold_procamp(m: &CscMat, src: ColorSpace, dst: ColorSpace, p: &Procamp) -> CscMat {
    let pm = procamp_matrix(p);
    if dst.is_yuv() {
        matrix_product(&pm, m)
    } else if src.is_yuv() {
        matrix_product(m, &pm)
    } else {
        // RGB-to-RGB procamp is not defined; leave the matrix unchanged.
        *m
    }
}

// ---------------------------------------------------------------------------
// Fixed-point mapping
// ---------------------------------------------------------------------------

/// Round half away from zero and saturate to `i16`.
pub fn to_fixed(v: f32) -> i16 {
    let scaled = v * 256.0;
    let rounded = scaled + if scaled >= 0.0 { 0.5 } else { -0.5 };
    rounded.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Default coefficient mapping: Q8.8 fixed point for every entry.
pub fn map_csc_matrix_default(_kind: CscType, matrix: &CscMat, coeff: &mut [i16; 12]) {
    for (c, v) in coeff.iter_mut().zip(matrix.iter()) {
        *c = to_fixed(*v);
    }
}

// ---------------------------------------------------------------------------
// Resolved parameters and resolver
// ---------------------------------------------------------------------------

/// One resolved coefficient set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CscMatrixEntry {
    /// Slot this set is allocated to.
    pub coeff_id: CoeffId,
    /// Source color space (translated).
    pub src: ColorSpace,
    /// Destination color space (translated).
    pub dst: ColorSpace,
    /// Procamp table index folded into the matrix, if any.
    pub procamp_id: Option<usize>,
    /// Procamp version the matrix was computed from.
    pub procamp_version: u32,
    /// Fixed-point coefficients.
    pub coeff: [i16; 12],
}

/// The full CSC parameter block of one combined kernel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CscParams {
    /// Internal color space selected for composition.
    pub cspace: Option<ColorSpace>,
    /// Allocated coefficient sets, slot order.
    pub matrices: Vec<CscMatrixEntry>,
}

impl CscParams {
    /// The coefficient set allocated to `id`, if any.
    pub fn matrix(&self, id: CoeffId) -> Option<&CscMatrixEntry> {
        self.matrices.iter().find(|m| m.coeff_id == id)
    }

    /// True when any resolved matrix was computed from a procamp version
    /// older than the one in `procamps`.
    pub fn procamp_stale(&self, procamps: &[Procamp]) -> bool {
        self.matrices.iter().any(|m| {
            m.procamp_id
                .and_then(|id| procamps.get(id))
                .is_some_and(|p| p.version != m.procamp_version)
        })
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    src: ColorSpace,
    dst: ColorSpace,
    procamp: Option<(usize, u32)>,
}

/// Computes and memoizes coefficient sets across searches.
///
/// Owned by the engine behind a mutex; `recompute_count` exposes how many
/// matrices were actually recomputed (memoization is observable).
pub struct CscResolver {
    memo: HashMap<MemoKey, [i16; 12]>,
    recompute_count: u64,
}

impl CscResolver {
    pub fn new() -> Self {
        Self {
            memo: HashMap::new(),
            recompute_count: 0,
        }
    }

    /// Number of matrices computed from scratch since construction.
    pub fn recompute_count(&self) -> u64 {
        self.recompute_count
    }

    /// Resolve CSC parameters for a search: pick the internal color space,
    /// allocate coefficient slots for every layer that needs conversion,
    /// and write the slot ids back into the working filter.
    pub fn resolve(
        &mut self,
        search: &mut SearchState,
        procamps: &[Procamp],
        map: &dyn Fn(CscType, &CscMat, &mut [i16; 12]),
    ) -> Result<(), KdllError> {
        let internal = search.target_cspace.translate();
        search.csc.cspace = Some(internal);

        for i in 0..search.filter.len() {
            let entry = &search.filter.entries()[i];
            let src = entry.cspace.translate();
            let procamp_id = match entry.procamp {
                RuleFlag::True => procamps.iter().position(|p| p.enabled),
                _ => None,
            };

            if (src == internal && procamp_id.is_none()) || src == ColorSpace::None {
                search.filter.entries_mut()[i].matrix = CoeffId::None;
                continue;
            }

            // Reuse a slot already allocated for the same conversion.
            if let Some(existing) = search
                .csc
                .matrices
                .iter()
                .find(|m| m.src == src && m.dst == internal && m.procamp_id == procamp_id)
            {
                search.filter.entries_mut()[i].matrix = existing.coeff_id;
                continue;
            }

            let slot = search.csc.matrices.len();
            let coeff_id = CoeffId::from_slot(slot).ok_or(KdllError::CscSlotsExhausted)?;
            let procamp_version = procamp_id
                .and_then(|id| procamps.get(id))
                .map_or(0, |p| p.version);

            let key = MemoKey {
                src,
                dst: internal,
                procamp: procamp_id.map(|id| (id, procamp_version)),
            };
            let coeff = match self.memo.get(&key) {
                Some(cached) => {
                    trace!(?src, ?internal, "csc matrix served from memo");
                    *cached
                }
                None => {
                    let mut m = csc_matrix(src, internal)?;
                    if let Some(id) = procamp_id {
                        m = fold_procamp(&m, src, internal, &procamps[id]);
                    }
                    let mut coeff = [0i16; 12];
                    map(CscType::of(src, internal), &m, &mut coeff);
                    self.recompute_count += 1;
                    debug!(?src, ?internal, slot, "computed csc matrix");
                    self.memo.insert(key, coeff);
                    coeff
                }
            };

            search.csc.matrices.push(CscMatrixEntry {
                coeff_id,
                src,
                dst: internal,
                procamp_id,
                procamp_version,
                coeff,
            });
            search.filter.entries_mut()[i].matrix = coeff_id;
        }
        Ok(())
    }
}

impl Default for CscResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_common::{FilterDescription, LayerFilter, LayerRole, PixelFormat};

    #[test]
    fn identity_for_same_space() {
        let m = csc_matrix(ColorSpace::Bt601, ColorSpace::Bt601).unwrap();
        assert_eq!(m, CSC_IDENTITY);
    }

    #[test]
    fn xvycc_translates_before_comparison() {
        let m = csc_matrix(ColorSpace::XvYcc601, ColorSpace::Bt601).unwrap();
        assert_eq!(m, CSC_IDENTITY);
    }

    #[test]
    fn unsupported_pair_is_an_error() {
        assert!(matches!(
            csc_matrix(ColorSpace::None, ColorSpace::Bt601),
            Err(KdllError::CscUnsupported { .. })
        ));
    }

    #[test]
    fn yuv_to_rgb_maps_black_near_zero() {
        // Limited-range black (16, 128, 128) should land near RGB 0.
        let m = csc_matrix(ColorSpace::Bt601, ColorSpace::Srgb).unwrap();
        let apply = |m: &CscMat, x: [f32; 3], row: usize| {
            m[row * 4] * x[0] + m[row * 4 + 1] * x[1] + m[row * 4 + 2] * x[2] + m[row * 4 + 3]
        };
        let black = [16.0, 128.0, 128.0];
        for row in 0..3 {
            let v = apply(&m, black, row);
            assert!(v.abs() < 1.0, "row {row}: {v}");
        }
    }

    #[test]
    fn matrix_product_identity_is_neutral() {
        let m = csc_matrix(ColorSpace::Bt709, ColorSpace::Srgb).unwrap();
        let p = matrix_product(&CSC_IDENTITY, &m);
        assert_eq!(p, m);
    }

    #[test]
    fn to_fixed_rounds_half_away_from_zero() {
        assert_eq!(to_fixed(1.0), 256);
        assert_eq!(to_fixed(0.001953125), 1); // 0.5/256 rounds up
        assert_eq!(to_fixed(-0.001953125), -1);
        assert_eq!(to_fixed(1000.0), i16::MAX);
        assert_eq!(to_fixed(-1000.0), i16::MIN);
    }

    fn search(src: ColorSpace, dst: ColorSpace) -> SearchState {
        let filter = FilterDescription::new(vec![
            LayerFilter::new(LayerRole::MainVideo, PixelFormat::Nv12, src),
            LayerFilter::new(LayerRole::RenderTarget, PixelFormat::Argb, dst),
        ])
        .unwrap();
        SearchState::new(filter)
    }

    #[test]
    fn resolver_allocates_slot_only_when_needed() {
        let mut resolver = CscResolver::new();
        let mut s = search(ColorSpace::Bt601, ColorSpace::Srgb);
        resolver
            .resolve(&mut s, &[], &map_csc_matrix_default)
            .unwrap();
        assert_eq!(s.filter.entries()[0].matrix, CoeffId::Slot0);
        assert_eq!(s.filter.entries()[1].matrix, CoeffId::None);
        assert_eq!(s.csc.matrices.len(), 1);
    }

    #[test]
    fn resolver_memoizes_across_searches() {
        let mut resolver = CscResolver::new();
        let mut a = search(ColorSpace::Bt601, ColorSpace::Srgb);
        resolver
            .resolve(&mut a, &[], &map_csc_matrix_default)
            .unwrap();
        assert_eq!(resolver.recompute_count(), 1);

        let mut b = search(ColorSpace::Bt601, ColorSpace::Srgb);
        resolver
            .resolve(&mut b, &[], &map_csc_matrix_default)
            .unwrap();
        assert_eq!(resolver.recompute_count(), 1, "second search must reuse memo");
        assert_eq!(a.csc.matrices[0].coeff, b.csc.matrices[0].coeff);
    }

    #[test]
    fn procamp_version_bump_forces_recompute() {
        let mut resolver = CscResolver::new();
        let procamp = Procamp {
            enabled: true,
            version: 1,
            contrast: 1.2,
            ..Procamp::default()
        };

        let mut a = search(ColorSpace::Bt601, ColorSpace::Srgb);
        a.filter.entries_mut()[0].procamp = RuleFlag::True;
        resolver
            .resolve(&mut a, std::slice::from_ref(&procamp), &map_csc_matrix_default)
            .unwrap();
        assert_eq!(resolver.recompute_count(), 1);

        let bumped = Procamp {
            version: 2,
            ..procamp
        };
        let mut b = search(ColorSpace::Bt601, ColorSpace::Srgb);
        b.filter.entries_mut()[0].procamp = RuleFlag::True;
        resolver
            .resolve(&mut b, std::slice::from_ref(&bumped), &map_csc_matrix_default)
            .unwrap();
        assert_eq!(resolver.recompute_count(), 2);
        assert!(a.csc.procamp_stale(std::slice::from_ref(&bumped)));
    }
}
