//! The built-in rule table.
//!
//! These rules drive the generic compositing pipeline: setup, per-layer
//! load, color space conversion, luma keying, mixing, colorfill and
//! write-out. Layers beyond the first are mixed sequentially: each pass
//! loads one layer as source 1, converts it, combines it with the
//! accumulated output, and loops back for the next filter entry until the
//! render target is reached.
//!
//! A strategy may shadow any of these per state via its custom table.

use fc_common::{
    CoeffId, ColorSpace, KernelId, LayerRole, PixelFormat, Processing, RenderMethod, RuleFlag,
    Sampling, SetCoeffMethod,
};

use crate::rules::{RuleAction, RuleCond, RuleEntrySet};
use crate::state::{ParserState, PatchBlock, PatchKind};

/// Destination blocks of a patched CSC coefficient payload: 24 bytes of
/// fixed-point coefficients split across two 16-byte aligned writes.
fn csc_patch_blocks() -> Vec<PatchBlock> {
    vec![
        PatchBlock {
            dst_offset: 0,
            src_offset: 0,
            size: 16,
        },
        PatchBlock {
            dst_offset: 16,
            src_offset: 16,
            size: 8,
        },
    ]
}

/// The complete default rule table.
pub fn default_rules() -> Vec<RuleEntrySet> {
    use ParserState as S;
    use RuleAction as A;
    use RuleCond as C;

    let mut rules = Vec::new();

    // Begin: nothing to decide yet.
    rules.push(RuleEntrySet::new(S::Begin).then(A::SetParserState(S::SetRenderMethod)));

    // Dispatch setup kernel, by render method.
    rules.push(
        RuleEntrySet::new(S::SetRenderMethod)
            .when(C::RenderMethod(RenderMethod::MediaObject))
            .then(A::AddKernel(KernelId::SETUP))
            .then(A::SetParserState(S::SetupLayer0)),
    );
    rules.push(
        RuleEntrySet::new(S::SetRenderMethod)
            .when(C::RenderMethod(RenderMethod::MediaWalker))
            .then(A::AddKernel(KernelId::SETUP_WALKER))
            .then(A::SetParserState(S::SetupLayer0)),
    );

    // Layer 0 setup. A filter whose first entry is already the render
    // target carries no source layers (colorfill only).
    rules.push(
        RuleEntrySet::new(S::SetupLayer0)
            .when(C::LayerRole(LayerRole::RenderTarget))
            .then(A::SetParserState(S::SetParamsTarget)),
    );
    rules.push(
        RuleEntrySet::new(S::SetupLayer0)
            .then(A::AddKernel(KernelId::SET_LAYER_0))
            .then(A::SetParserState(S::SetParamsLayer0)),
    );

    // Copy layer 0 attributes into source slot 0 and move on.
    rules.push(
        RuleEntrySet::new(S::SetParamsLayer0)
            .then(A::Src0Format(PixelFormat::Source))
            .then(A::Src0Sampling(Sampling::Source))
            .then(A::Src0Rotation(fc_common::Rotation::Source))
            .then(A::Src0ColorFill(RuleFlag::Source))
            .then(A::Src0LumaKey(RuleFlag::Source))
            .then(A::Src0Procamp(RuleFlag::Source))
            .then(A::Src0Coeff(CoeffId::Source))
            .then(A::NextLayer(0))
            .then(A::SetParserState(S::SetupLayer1)),
    );

    // Subsequent layer setup. Reaching the render target with source 0
    // already consumed means the mix loop is done.
    rules.push(
        RuleEntrySet::new(S::SetupLayer1)
            .when(C::LayerRole(LayerRole::RenderTarget))
            .when(C::Src0Sampling(Sampling::None))
            .then(A::SetParserState(S::Colorfill)),
    );
    rules.push(
        RuleEntrySet::new(S::SetupLayer1)
            .when(C::LayerRole(LayerRole::RenderTarget))
            .then(A::SetParserState(S::SetParamsTarget)),
    );
    for (n, kernel) in [
        (1, KernelId::SET_LAYER_1),
        (2, KernelId::SET_LAYER_2),
        (3, KernelId::SET_LAYER_3),
        (4, KernelId::SET_LAYER_4),
        (5, KernelId::SET_LAYER_5),
    ] {
        rules.push(
            RuleEntrySet::new(S::SetupLayer1)
                .when(C::LayerNumber(n))
                .then(A::AddKernel(kernel))
                .then(A::SetParserState(S::SetParamsLayer1)),
        );
    }

    // Copy the current layer into source slot 1.
    rules.push(
        RuleEntrySet::new(S::SetParamsLayer1)
            .then(A::Src1Format(PixelFormat::Source))
            .then(A::Src1Sampling(Sampling::Source))
            .then(A::Src1LumaKey(RuleFlag::Source))
            .then(A::Src1Procamp(RuleFlag::Source))
            .then(A::Src1Coeff(CoeffId::Source))
            .then(A::Src1Processing(Processing::Source))
            .then(A::NextLayer(0))
            .then(A::SetParserState(S::SampleLayer0)),
    );

    // Render target reached on the sampling path: latch the destination
    // color space and go sample what was set up.
    rules.push(
        RuleEntrySet::new(S::SetParamsTarget)
            .then(A::SetTargetCspace(ColorSpace::Source))
            .then(A::SetParserState(S::SampleLayer0)),
    );

    // Source 0 load, by format. Sampling::None marks the slot consumed so
    // later passes skip straight through.
    rules.push(
        RuleEntrySet::new(S::SampleLayer0)
            .when(C::Src0Sampling(Sampling::None))
            .then(A::SetParserState(S::SampleLayer0Done)),
    );
    for (format, kernel) in [
        (PixelFormat::Nv12, KernelId::LOAD_NV12),
        (PixelFormat::P010, KernelId::LOAD_P010),
        (PixelFormat::Yuy2, KernelId::LOAD_YUY2),
        (PixelFormat::Yv12, KernelId::LOAD_PLANAR),
        (PixelFormat::Ayuv, KernelId::LOAD_AYUV),
    ] {
        rules.push(
            RuleEntrySet::new(S::SampleLayer0)
                .when(C::Src0Format(format))
                .then(A::AddKernel(kernel))
                .then(A::Src0Sampling(Sampling::None))
                .then(A::SetParserState(S::SampleLayer0Done)),
        );
    }
    rules.push(
        RuleEntrySet::new(S::SampleLayer0)
            .when(C::Src0Format(PixelFormat::Argb))
            .or(C::Src0Format(PixelFormat::Abgr))
            .or(C::Src0Format(PixelFormat::Rgb565))
            .or(C::Src0Format(PixelFormat::R10G10B10A2))
            .then(A::AddKernel(KernelId::LOAD_ARGB))
            .then(A::Src0Sampling(Sampling::None))
            .then(A::SetParserState(S::SampleLayer0Done)),
    );

    // No second source in flight: go straight to CSC.
    rules.push(
        RuleEntrySet::new(S::SampleLayer0Done)
            .when(C::Src1Processing(Processing::None))
            .then(A::SetParserState(S::SetupCsc0)),
    );
    rules.push(RuleEntrySet::new(S::SampleLayer0Done).then(A::SetParserState(S::SampleLayer1)));

    // Source 1 load, by format.
    for (format, kernel) in [
        (PixelFormat::Nv12, KernelId::LOAD_NV12),
        (PixelFormat::P010, KernelId::LOAD_P010),
        (PixelFormat::Yuy2, KernelId::LOAD_YUY2),
        (PixelFormat::Yv12, KernelId::LOAD_PLANAR),
        (PixelFormat::Ayuv, KernelId::LOAD_AYUV),
    ] {
        rules.push(
            RuleEntrySet::new(S::SampleLayer1)
                .when(C::Src1Format(format))
                .then(A::AddKernel(kernel))
                .then(A::Src1Sampling(Sampling::None))
                .then(A::SetParserState(S::SampleLayer1Done)),
        );
    }
    rules.push(
        RuleEntrySet::new(S::SampleLayer1)
            .when(C::Src1Format(PixelFormat::Argb))
            .or(C::Src1Format(PixelFormat::Abgr))
            .or(C::Src1Format(PixelFormat::Rgb565))
            .or(C::Src1Format(PixelFormat::R10G10B10A2))
            .then(A::AddKernel(KernelId::LOAD_ARGB))
            .then(A::Src1Sampling(Sampling::None))
            .then(A::SetParserState(S::SampleLayer1Done)),
    );
    rules.push(RuleEntrySet::new(S::SampleLayer1Done).then(A::SetParserState(S::SetupCsc0)));

    // CSC for source 0. Coefficients travel either through constant
    // registers or through a patched payload, per the filter's delivery
    // mode.
    rules.push(
        RuleEntrySet::new(S::SetupCsc0)
            .when(C::Src0Coeff(CoeffId::None))
            .then(A::SetParserState(S::SetupCsc1)),
    );
    rules.push(
        RuleEntrySet::new(S::SetupCsc0)
            .when(C::LayerCoeffMode(SetCoeffMethod::Patch))
            .then(A::AddKernel(KernelId::SET_PATCHED_CSC_COEFF))
            .then(A::SetPatchData(PatchKind::CscCoeffSrc0))
            .then(A::SetPatch(csc_patch_blocks()))
            .then(A::SetParserState(S::ExecuteCsc0)),
    );
    rules.push(RuleEntrySet::new(S::SetupCsc0).then(A::SetParserState(S::ExecuteCsc0)));
    rules.push(
        RuleEntrySet::new(S::ExecuteCsc0)
            .then(A::AddKernel(KernelId::CSC_SRC0))
            .then(A::Src0Coeff(CoeffId::None))
            .then(A::SetParserState(S::ExecuteCsc0Done)),
    );
    rules.push(RuleEntrySet::new(S::ExecuteCsc0Done).then(A::SetParserState(S::SetupCsc1)));

    // CSC for source 1.
    rules.push(
        RuleEntrySet::new(S::SetupCsc1)
            .when(C::Src1Coeff(CoeffId::None))
            .then(A::SetParserState(S::Lumakey)),
    );
    rules.push(
        RuleEntrySet::new(S::SetupCsc1)
            .when(C::LayerCoeffMode(SetCoeffMethod::Patch))
            .then(A::AddKernel(KernelId::SET_PATCHED_CSC_COEFF))
            .then(A::SetPatchData(PatchKind::CscCoeffSrc1))
            .then(A::SetPatch(csc_patch_blocks()))
            .then(A::SetParserState(S::ExecuteCsc1)),
    );
    rules.push(RuleEntrySet::new(S::SetupCsc1).then(A::SetParserState(S::ExecuteCsc1)));
    rules.push(
        RuleEntrySet::new(S::ExecuteCsc1)
            .then(A::AddKernel(KernelId::CSC_SRC1))
            .then(A::Src1Coeff(CoeffId::None))
            .then(A::SetParserState(S::ExecuteCsc1Done)),
    );
    rules.push(RuleEntrySet::new(S::ExecuteCsc1Done).then(A::SetParserState(S::Lumakey)));

    // Luma keying removes keyed pixels of source 1 before the mix.
    rules.push(
        RuleEntrySet::new(S::Lumakey)
            .when(C::Src1LumaKey(RuleFlag::True))
            .then(A::AddKernel(KernelId::LUMAKEY))
            .then(A::Src1LumaKey(RuleFlag::False))
            .then(A::SetParserState(S::ProcessLayer)),
    );
    rules.push(RuleEntrySet::new(S::Lumakey).then(A::SetParserState(S::ProcessLayer)));

    // Combine source 1 onto the accumulated output. Clearing the
    // processing mode marks the layer consumed.
    rules.push(
        RuleEntrySet::new(S::ProcessLayer)
            .when(C::Src1Processing(Processing::None))
            .then(A::SetParserState(S::ProcessLayerDone)),
    );
    for (mode, kernel) in [
        (Processing::Composite, KernelId::COMPOSITE),
        (Processing::PBlend, KernelId::PBLEND),
        (Processing::CBlend, KernelId::CBLEND),
        (Processing::SBlend, KernelId::SBLEND),
    ] {
        rules.push(
            RuleEntrySet::new(S::ProcessLayer)
                .when(C::Src1Processing(mode))
                .then(A::AddKernel(kernel))
                .then(A::Src1Processing(Processing::None))
                .then(A::SetParserState(S::ProcessLayerDone)),
        );
    }

    // Loop back for the next filter entry.
    rules.push(RuleEntrySet::new(S::ProcessLayerDone).then(A::SetParserState(S::SetupLayer1)));

    // Background colorfill. A source-free filter carries the flag on the
    // render target entry itself.
    rules.push(
        RuleEntrySet::new(S::Colorfill)
            .when(C::Src0ColorFill(RuleFlag::True))
            .or(C::LayerColorFill(RuleFlag::True))
            .then(A::AddKernel(KernelId::COLORFILL))
            .then(A::Src0ColorFill(RuleFlag::False))
            .then(A::SetParserState(S::WriteOutput)),
    );
    rules.push(RuleEntrySet::new(S::Colorfill).then(A::SetParserState(S::WriteOutput)));

    // Write-out, by target format.
    for (format, kernel) in [
        (PixelFormat::Nv12, KernelId::SAVE_NV12),
        (PixelFormat::P010, KernelId::SAVE_P010),
        (PixelFormat::Yuy2, KernelId::SAVE_YUY2),
    ] {
        rules.push(
            RuleEntrySet::new(S::WriteOutput)
                .when(C::TargetFormat(format))
                .then(A::AddKernel(kernel))
                .then(A::SetParserState(S::End)),
        );
    }
    // RGB565 has no alpha channel; constant-alpha targets also skip the
    // alpha-preserving writer.
    rules.push(
        RuleEntrySet::new(S::WriteOutput)
            .when(C::TargetFormat(PixelFormat::Rgb565))
            .then(A::AddKernel(KernelId::SAVE_RGB))
            .then(A::SetParserState(S::End)),
    );
    rules.push(
        RuleEntrySet::new(S::WriteOutput)
            .when(C::ConstOutAlpha(true))
            .when(C::TargetFormat(PixelFormat::Argb))
            .or(C::TargetFormat(PixelFormat::Abgr))
            .or(C::TargetFormat(PixelFormat::R10G10B10A2))
            .then(A::AddKernel(KernelId::SAVE_RGB))
            .then(A::SetParserState(S::End)),
    );
    rules.push(
        RuleEntrySet::new(S::WriteOutput)
            .when(C::TargetFormat(PixelFormat::Argb))
            .or(C::TargetFormat(PixelFormat::Abgr))
            .or(C::TargetFormat(PixelFormat::R10G10B10A2))
            .then(A::AddKernel(KernelId::SAVE_ARGB))
            .then(A::SetParserState(S::End)),
    );

    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleTable;
    use crate::state::SearchState;
    use fc_common::{FilterDescription, LayerFilter};

    #[test]
    fn every_state_but_end_has_rules() {
        let table = RuleTable::build(default_rules(), Vec::new());
        assert!(!table.is_empty());

        let filter = FilterDescription::new(vec![LayerFilter::new(
            LayerRole::RenderTarget,
            PixelFormat::Nv12,
            ColorSpace::Bt601,
        )])
        .unwrap();
        let s = SearchState::new(filter);
        // Begin always matches its unconditional rule.
        assert!(table.find_rule(&s).is_some());
    }

    #[test]
    fn unsupported_target_format_has_no_writer() {
        let table = RuleTable::build(default_rules(), Vec::new());
        let filter = FilterDescription::new(vec![LayerFilter::new(
            LayerRole::RenderTarget,
            PixelFormat::Any,
            ColorSpace::Bt601,
        )])
        .unwrap();
        let mut s = SearchState::new(filter);
        s.state = ParserState::WriteOutput;
        assert!(table.find_rule(&s).is_none());
    }
}
