//! Parser states and per-search working state.

use serde::{Deserialize, Serialize};

use fc_common::{
    CoeffId, ColorSpace, FilterDescription, PixelFormat, Processing, RenderMethod, Rotation,
    RuleFlag, Sampling, TileType,
};

use crate::csc::CscParams;
use crate::error::KdllError;

/// Maximum component kernels in one combined kernel.
pub const MAX_KERNELS: usize = 256;
/// Maximum patch-data blocks per search.
pub const MAX_PATCHES: usize = 8;
/// Maximum bytes of data per patch.
pub const MAX_PATCH_DATA_SIZE: usize = 64;
/// Maximum destination blocks per patch.
pub const MAX_PATCH_BLOCKS: usize = 8;

/// One stage of the abstract compositing pipeline.
///
/// The rule engine walks these states in pipeline order, from [`Begin`] to
/// the terminal [`End`]; each rule set is registered for exactly one state.
///
/// [`Begin`]: ParserState::Begin
/// [`End`]: ParserState::End
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParserState {
    Begin = 0,
    SetRenderMethod,
    SetupLayer0,
    SetupLayer1,
    SetParamsLayer0,
    SetParamsLayer1,
    SetParamsTarget,
    SampleLayer0,
    SampleLayer0Done,
    SampleLayer1,
    SampleLayer1Done,
    SetupCsc0,
    ExecuteCsc0,
    ExecuteCsc0Done,
    SetupCsc1,
    ExecuteCsc1,
    ExecuteCsc1Done,
    Lumakey,
    ProcessLayer,
    ProcessLayerDone,
    Colorfill,
    WriteOutput,
    End,
}

/// Number of parser states, bounding the search loop.
pub const STATE_COUNT: usize = ParserState::End as usize + 1;

impl ParserState {
    /// Dense index for per-state rule tables.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// What a patch block's data represents.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchKind {
    /// CSC coefficients of the src0 slot.
    CscCoeffSrc0,
    /// CSC coefficients of the src1 slot.
    CscCoeffSrc1,
}

/// One destination block of a patch: copy `size` bytes from `src_offset`
/// within the patch data to `dst_offset` within the consumer's state heap.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchBlock {
    pub dst_offset: u16,
    pub src_offset: u8,
    pub size: u8,
}

/// A patch carried alongside the combined kernel: a small data payload plus
/// the blocks describing where the consumer writes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchData {
    pub kind: PatchKind,
    pub data: Vec<u8>,
    pub blocks: Vec<PatchBlock>,
}

impl PatchData {
    pub fn new(kind: PatchKind, data: Vec<u8>) -> Self {
        Self {
            kind,
            data,
            blocks: Vec::new(),
        }
    }
}

/// Working attributes of one source slot (src0 = bottom layer of the
/// current pass, src1 = layer being combined onto it).
#[derive(Copy, Clone, Debug)]
pub struct SrcState {
    pub format: PixelFormat,
    pub sampling: Sampling,
    pub rotation: Rotation,
    pub colorfill: RuleFlag,
    pub lumakey: RuleFlag,
    pub procamp: RuleFlag,
    pub coeff: CoeffId,
    pub process: Processing,
}

impl Default for SrcState {
    fn default() -> Self {
        Self {
            format: PixelFormat::Any,
            sampling: Sampling::None,
            rotation: Rotation::Identity,
            colorfill: RuleFlag::False,
            lumakey: RuleFlag::False,
            procamp: RuleFlag::False,
            coeff: CoeffId::None,
            process: Processing::None,
        }
    }
}

/// Transient, single-owner working memory of one kernel search.
///
/// Created fresh per search from the caller's filter description; the rule
/// engine and linker only ever mutate this, never shared engine state, so
/// no locking is needed around the search itself.
#[derive(Clone, Debug)]
pub struct SearchState {
    /// Working copy of the filter (the CSC resolver writes slot ids into it).
    pub filter: FilterDescription,
    /// Current parser state.
    pub state: ParserState,
    /// Index of the current filter entry.
    pub layer_index: usize,
    /// Running layer counter, used by `IsLayerNumber` conditions.
    pub layer_number: i32,
    /// Current quadrant for multi-pass composition.
    pub quadrant: i32,

    /// Destination color space.
    pub target_cspace: ColorSpace,
    /// Render target format.
    pub target_format: PixelFormat,
    /// Render target tiling.
    pub target_tiletype: TileType,
    /// Dispatch method, seeded from the filter.
    pub render_method: RenderMethod,
    /// CSC must run before the mix stage.
    pub csc_before_mix: bool,

    /// Source slot 0 attributes.
    pub src0: SrcState,
    /// Source slot 1 attributes.
    pub src1: SrcState,

    /// Ordered component-kernel selection.
    pub kernels: Vec<fc_common::KernelId>,
    /// Patch index associated with each selected kernel (parallel array).
    pub kernel_patch: Vec<Option<usize>>,
    /// Patches accumulated by set actions.
    pub patches: Vec<PatchData>,

    /// CSC parameters resolved for this search.
    pub csc: CscParams,
}

impl SearchState {
    /// Fresh search state over an owned copy of the filter.
    pub fn new(filter: FilterDescription) -> Self {
        let target = filter.render_target();
        let target_cspace = target.map_or(ColorSpace::Any, |t| t.cspace);
        let target_format = target.map_or(PixelFormat::Any, |t| t.format);
        let target_tiletype = target.map_or(TileType::Linear, |t| t.tiletype);
        let render_method = filter.entries()[0].render_method;

        Self {
            filter,
            state: ParserState::Begin,
            layer_index: 0,
            layer_number: 0,
            quadrant: 0,
            target_cspace,
            target_format,
            target_tiletype,
            render_method,
            csc_before_mix: false,
            src0: SrcState::default(),
            src1: SrcState::default(),
            kernels: Vec::new(),
            kernel_patch: Vec::new(),
            patches: Vec::new(),
            csc: CscParams::default(),
        }
    }

    /// The filter entry the parser is currently looking at.
    pub fn current_layer(&self) -> &fc_common::LayerFilter {
        // layer_index is clamped by advance_layer.
        &self.filter.entries()[self.layer_index]
    }

    /// Advance to the next filter entry (`delta` = 0), or re-process the
    /// current one (`delta` = -1, the "backoff" used when a single layer
    /// turns out to be the last).
    pub fn advance_layer(&mut self, delta: i32) {
        let step = 1 + delta;
        if step > 0 {
            let last = self.filter.len() - 1;
            self.layer_index = (self.layer_index + step as usize).min(last);
            self.layer_number += step;
        }
    }

    /// Append a kernel selection, enforcing the combined-kernel bound.
    pub fn push_kernel(&mut self, id: fc_common::KernelId) -> Result<(), KdllError> {
        if self.kernels.len() >= MAX_KERNELS {
            return Err(KdllError::TooManyKernels { max: MAX_KERNELS });
        }
        self.kernels.push(id);
        self.kernel_patch.push(None);
        Ok(())
    }

    /// Append a patch and associate it with the most recent kernel.
    pub fn push_patch(&mut self, patch: PatchData) -> Result<usize, KdllError> {
        if self.patches.len() >= MAX_PATCHES {
            return Err(KdllError::TooManyPatches { max: MAX_PATCHES });
        }
        if patch.data.len() > MAX_PATCH_DATA_SIZE {
            return Err(KdllError::PatchTooLarge {
                size: patch.data.len(),
                max: MAX_PATCH_DATA_SIZE,
            });
        }
        if patch.blocks.len() > MAX_PATCH_BLOCKS {
            return Err(KdllError::TooManyPatchBlocks {
                max: MAX_PATCH_BLOCKS,
            });
        }
        let idx = self.patches.len();
        self.patches.push(patch);
        if let Some(slot) = self.kernel_patch.last_mut() {
            *slot = Some(idx);
        }
        Ok(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_common::{KernelId, LayerFilter, LayerRole};

    fn filter() -> FilterDescription {
        FilterDescription::new(vec![
            LayerFilter::new(LayerRole::MainVideo, PixelFormat::Nv12, ColorSpace::Bt601),
            LayerFilter::new(LayerRole::RenderTarget, PixelFormat::Nv12, ColorSpace::Bt601),
        ])
        .unwrap()
    }

    #[test]
    fn new_seeds_target_attributes() {
        let s = SearchState::new(filter());
        assert_eq!(s.state, ParserState::Begin);
        assert_eq!(s.target_format, PixelFormat::Nv12);
        assert_eq!(s.target_cspace, ColorSpace::Bt601);
        assert_eq!(s.layer_index, 0);
    }

    #[test]
    fn advance_layer_clamps_at_last_entry() {
        let mut s = SearchState::new(filter());
        s.advance_layer(0);
        assert_eq!(s.layer_index, 1);
        s.advance_layer(0);
        assert_eq!(s.layer_index, 1);
        assert_eq!(s.layer_number, 2);
    }

    #[test]
    fn backoff_keeps_current_layer() {
        let mut s = SearchState::new(filter());
        s.advance_layer(-1);
        assert_eq!(s.layer_index, 0);
        assert_eq!(s.layer_number, 0);
    }

    #[test]
    fn kernel_bound_is_enforced() {
        let mut s = SearchState::new(filter());
        for i in 0..MAX_KERNELS {
            s.push_kernel(KernelId(i as u16)).unwrap();
        }
        assert!(matches!(
            s.push_kernel(KernelId(999)),
            Err(KdllError::TooManyKernels { .. })
        ));
    }

    #[test]
    fn patch_data_bound_is_enforced() {
        let mut s = SearchState::new(filter());
        s.push_kernel(KernelId::SET_PATCHED_CSC_COEFF).unwrap();
        let patch = PatchData::new(PatchKind::CscCoeffSrc0, vec![0; MAX_PATCH_DATA_SIZE + 1]);
        assert!(matches!(
            s.push_patch(patch),
            Err(KdllError::PatchTooLarge { size: 65, max: MAX_PATCH_DATA_SIZE })
        ));
        assert!(s.patches.is_empty());
    }

    #[test]
    fn patch_block_bound_is_enforced() {
        let mut s = SearchState::new(filter());
        s.push_kernel(KernelId::SET_PATCHED_CSC_COEFF).unwrap();
        let mut patch = PatchData::new(PatchKind::CscCoeffSrc0, vec![0; 24]);
        patch.blocks = vec![PatchBlock::default(); MAX_PATCH_BLOCKS + 1];
        assert!(matches!(
            s.push_patch(patch),
            Err(KdllError::TooManyPatchBlocks { max: MAX_PATCH_BLOCKS })
        ));
        assert!(s.patches.is_empty());
    }

    #[test]
    fn patch_attaches_to_last_kernel() {
        let mut s = SearchState::new(filter());
        s.push_kernel(KernelId::SET_PATCHED_CSC_COEFF).unwrap();
        let idx = s
            .push_patch(PatchData::new(PatchKind::CscCoeffSrc0, vec![0; 24]))
            .unwrap();
        assert_eq!(s.kernel_patch.last().copied().flatten(), Some(idx));
    }
}
