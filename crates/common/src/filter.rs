//! Filter description — the ordered, declarative per-layer input that drives
//! kernel selection.
//!
//! A [`FilterDescription`] lists up to [`MAX_FILTER_SIZE`] [`LayerFilter`]
//! entries, bottom layer first, with the render target as the final entry.
//! It is immutable once handed to a search and is the cache key for linked
//! kernels (via [`FilterDescription::canonical_bytes`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::{ColorSpace, PixelFormat};

/// Maximum number of entries in a filter description.
pub const MAX_FILTER_SIZE: usize = 10;

/// Role of a layer within the composition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerRole {
    /// No layer (rule sentinel).
    None = -1,
    /// Background color layer.
    Background = 0,
    /// Main video layer.
    MainVideo,
    /// Secondary video layer.
    SubVideo,
    /// Sub-picture 1 (subtitles, OSD).
    SubPicture1,
    /// Sub-picture 2.
    SubPicture2,
    /// Sub-picture 3.
    SubPicture3,
    /// Sub-picture 4.
    SubPicture4,
    /// Graphics overlay.
    Graphics = 14,
    /// The render target pseudo-layer (always last).
    RenderTarget = 15,
}

impl LayerRole {
    pub fn code(self) -> u8 {
        self as i8 as u8
    }
}

/// Sampling mode for reading a layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sampling {
    /// Not sampled yet (rule sentinel).
    None = -2,
    /// Rule wildcard: take the mode from the current layer entry.
    Source = -1,
    /// Rule wildcard: matches any concrete mode.
    Any = 0,
    /// Scaling at any factor.
    ScalingAny,
    /// Bilinear scaling (>= 0.34x).
    Scaling,
    /// Bilinear scaling below 0.34x.
    Scaling034x,
    /// Interlaced scaling.
    IScaling,
    /// AVS (adaptive video scaler) sampling.
    ScalingAvs,
}

impl Sampling {
    pub fn code(self) -> u8 {
        self as i8 as u8
    }
}

/// Processing mode that combines a layer with the accumulated output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Processing {
    /// Not processed (rule sentinel).
    None = -2,
    /// Rule wildcard: take the mode from the current layer entry.
    Source = -1,
    /// Rule wildcard: matches any concrete mode.
    Any = 0,
    /// Plain composite of two layers.
    Composite,
    /// XOR mono composite.
    XorComposite,
    /// Partial blend, 8-bit alpha.
    PBlend,
    /// Constant blend, 8-bit alpha.
    CBlend,
    /// Source blend, 8-bit alpha.
    SBlend,
    /// Constant * source blend, source not premultiplied.
    CSBlend,
    /// Constant * source blend, source premultiplied.
    CPBlend,
}

impl Processing {
    pub fn code(self) -> u8 {
        self as i8 as u8
    }
}

/// Rotation/mirroring applied to a layer before composition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    /// Rule wildcard: take the rotation from the current layer entry.
    Source = -1,
    /// No rotation.
    Identity = 0,
    Rotate90,
    Rotate180,
    Rotate270,
    MirrorHorizontal,
    MirrorVertical,
}

impl Rotation {
    pub fn code(self) -> u8 {
        self as i8 as u8
    }
}

/// Surface tiling of the render target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileType {
    Linear = 0,
    TileX,
    TileY,
}

impl TileType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// CSC coefficient slot selector.
///
/// Slots 0..=5 address resident coefficient sets; the sentinels mirror the
/// rule wildcards used elsewhere.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoeffId {
    /// Rule wildcard: take the slot from the current layer entry.
    Source = -3,
    /// Rule wildcard: matches any allocated slot.
    Any = -2,
    /// No CSC for this layer.
    None = -1,
    Slot0 = 0,
    Slot1,
    Slot2,
    Slot3,
    Slot4,
    Slot5,
}

impl CoeffId {
    /// Slot index for allocated coefficient sets; `None` for sentinels.
    pub fn slot(self) -> Option<usize> {
        let v = self as i8;
        (v >= 0).then_some(v as usize)
    }

    /// Coefficient slot for a slot index (0..=5).
    pub fn from_slot(slot: usize) -> Option<Self> {
        match slot {
            0 => Some(Self::Slot0),
            1 => Some(Self::Slot1),
            2 => Some(Self::Slot2),
            3 => Some(Self::Slot3),
            4 => Some(Self::Slot4),
            5 => Some(Self::Slot5),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as i8 as u8
    }
}

/// Tri-state layer flag: disabled, enabled, or "copy from layer" wildcard.
///
/// Used for colorfill, luma keying, procamp and chroma siting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleFlag {
    /// Rule wildcard: take the flag from the current layer entry.
    Source = -1,
    False = 0,
    True = 1,
}

impl RuleFlag {
    pub fn from_bool(v: bool) -> Self {
        if v {
            Self::True
        } else {
            Self::False
        }
    }

    pub fn code(self) -> u8 {
        self as i8 as u8
    }
}

/// How the combined kernel is dispatched by the command encoder.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderMethod {
    /// One media object per macroblock row.
    #[default]
    MediaObject = 0,
    /// Hardware media walker.
    MediaWalker,
}

impl RenderMethod {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// How CSC coefficients reach the combined kernel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetCoeffMethod {
    /// Coefficients are loaded through constant registers.
    #[default]
    Curbe = 0,
    /// Coefficients are patched into the kernel's patch list.
    Patch,
}

impl SetCoeffMethod {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// One entry of a filter description: the composition attributes of a single
/// layer (or of the render target, for the final entry).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerFilter {
    /// Layer role (main video, sub-picture, render target, ...).
    pub role: LayerRole,
    /// Surface pixel format.
    pub format: PixelFormat,
    /// Surface color space.
    pub cspace: ColorSpace,
    /// Sampling mode.
    pub sampling: Sampling,
    /// Processing mode combining this layer with the output.
    pub process: Processing,
    /// Rotation applied before composition.
    pub rotation: Rotation,
    /// Colorfill flag.
    pub colorfill: RuleFlag,
    /// Luma-key flag.
    pub lumakey: RuleFlag,
    /// Procamp adjustment flag.
    pub procamp: RuleFlag,
    /// Chroma-siting adjustment flag.
    pub chromasiting: RuleFlag,
    /// CSC coefficient slot assigned by the CSC resolver (`None` = no CSC).
    pub matrix: CoeffId,
    /// Surface tiling.
    pub tiletype: TileType,
    /// Dual output mode.
    pub dualout: bool,
    /// Fill output alpha with a constant instead of source alpha.
    pub const_alpha: bool,
    /// Dispatch method.
    pub render_method: RenderMethod,
    /// CSC coefficient delivery method.
    pub coeff_mode: SetCoeffMethod,
}

impl LayerFilter {
    /// A filter entry with neutral attributes for the given role/format/space.
    pub fn new(role: LayerRole, format: PixelFormat, cspace: ColorSpace) -> Self {
        Self {
            role,
            format,
            cspace,
            sampling: Sampling::Any,
            process: Processing::Any,
            rotation: Rotation::Identity,
            colorfill: RuleFlag::False,
            lumakey: RuleFlag::False,
            procamp: RuleFlag::False,
            chromasiting: RuleFlag::False,
            matrix: CoeffId::None,
            tiletype: TileType::Linear,
            dualout: false,
            const_alpha: false,
            render_method: RenderMethod::MediaObject,
            coeff_mode: SetCoeffMethod::Curbe,
        }
    }

    /// Append this entry's stable byte representation to `out`.
    fn write_canonical(&self, out: &mut Vec<u8>) {
        out.push(self.role.code());
        out.push(self.format.code());
        out.push(self.cspace.code());
        out.push(self.sampling.code());
        out.push(self.process.code());
        out.push(self.rotation.code());
        out.push(self.colorfill.code());
        out.push(self.lumakey.code());
        out.push(self.procamp.code());
        out.push(self.chromasiting.code());
        out.push(self.matrix.code());
        out.push(self.tiletype.code());
        out.push(self.dualout as u8);
        out.push(self.const_alpha as u8);
        out.push(self.render_method.code());
        out.push(self.coeff_mode.code());
    }
}

/// Errors from filter description construction.
#[derive(Debug, Error)]
pub enum FilterError {
    /// More entries than [`MAX_FILTER_SIZE`].
    #[error("filter description has {len} entries, maximum is {MAX_FILTER_SIZE}")]
    TooLarge { len: usize },

    /// A filter description must contain at least one entry.
    #[error("filter description is empty")]
    Empty,
}

/// Ordered, bounded list of [`LayerFilter`] entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterDescription {
    entries: Vec<LayerFilter>,
}

impl FilterDescription {
    /// Build a filter description, validating the entry-count bound.
    pub fn new(entries: Vec<LayerFilter>) -> Result<Self, FilterError> {
        if entries.is_empty() {
            return Err(FilterError::Empty);
        }
        if entries.len() > MAX_FILTER_SIZE {
            return Err(FilterError::TooLarge { len: entries.len() });
        }
        Ok(Self { entries })
    }

    /// The filter entries, bottom layer first.
    pub fn entries(&self) -> &[LayerFilter] {
        &self.entries
    }

    /// Mutable access for working copies (the CSC resolver writes
    /// coefficient slot ids into its copy of the filter).
    pub fn entries_mut(&mut self) -> &mut [LayerFilter] {
        &mut self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The render-target entry, if the description carries one (by
    /// convention the last entry).
    pub fn render_target(&self) -> Option<&LayerFilter> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.role == LayerRole::RenderTarget)
    }

    /// Stable byte serialization used for hashing and exact cache
    /// comparison. Two descriptions compare equal if and only if their
    /// canonical bytes are identical.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 16 + 1);
        out.push(self.entries.len() as u8);
        for entry in &self.entries {
            entry.write_canonical(&mut out);
        }
        out
    }
}
