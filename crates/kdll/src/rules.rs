//! Rule model: typed conditions, actions, rule sets and the per-state table.
//!
//! A [`RuleEntrySet`] is registered for one [`ParserState`] and carries a
//! condition list plus an action list. Conditions form AND-terms; entries
//! appended with [`RuleEntrySet::or`] extend the previous term into an
//! OR-chain, and [`RuleEntrySet::not`] negates a single entry. The first
//! matching rule set for the current state wins, with [`RuleGroup`]
//! priority deciding order between the built-in and strategy tables.

use fc_common::{
    CoeffId, ColorSpace, KernelId, LayerFilter, LayerRole, PixelFormat, Processing, RenderMethod,
    Rotation, RuleFlag, Sampling, SetCoeffMethod, TileType,
};

use crate::error::KdllError;
use crate::state::{
    ParserState, PatchBlock, PatchData, PatchKind, SearchState, MAX_PATCH_BLOCKS, STATE_COUNT,
};

/// Priority group of a rule set.
///
/// Within a state, matching proceeds `NoOverride`, then `Custom`, then
/// `Default`: a strategy's custom rules shadow the built-in defaults unless
/// the default is marked non-overridable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleGroup {
    NoOverride = 0,
    Custom,
    Default,
}

/// How a condition entry combines with its predecessor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RuleLogic {
    /// Starts a new AND-term.
    And,
    /// Extends the previous term into an OR-chain.
    Or,
    /// Starts a new AND-term with the condition negated.
    Not,
}

/// A single testable condition over the search state.
///
/// Sentinel values carry wildcard meaning: `Any` matches any concrete
/// value, `Source` compares the state field against the corresponding
/// attribute of the current filter entry, and `None` (where the type has
/// one) matches only the unset sentinel itself.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleCond {
    TargetCspace(ColorSpace),
    TargetFormat(PixelFormat),
    TargetTileType(TileType),
    LayerRole(LayerRole),
    LayerFormat(PixelFormat),
    LayerNumber(i32),
    LayerRotation(Rotation),
    LayerColorFill(RuleFlag),
    LayerProcamp(RuleFlag),
    LayerCoeffMode(SetCoeffMethod),
    Src0Format(PixelFormat),
    Src0Sampling(Sampling),
    Src0Rotation(Rotation),
    Src0ColorFill(RuleFlag),
    Src0LumaKey(RuleFlag),
    Src0Procamp(RuleFlag),
    Src0Coeff(CoeffId),
    Src0Processing(Processing),
    Src1Format(PixelFormat),
    Src1Sampling(Sampling),
    Src1LumaKey(RuleFlag),
    Src1Procamp(RuleFlag),
    Src1Coeff(CoeffId),
    Src1Processing(Processing),
    Quadrant(i32),
    CscBeforeMix(bool),
    ConstOutAlpha(bool),
    DualOutput(bool),
    RenderMethod(RenderMethod),
}

fn match_format(want: PixelFormat, have: PixelFormat, layer: PixelFormat) -> bool {
    match want {
        PixelFormat::Any => have != PixelFormat::Any,
        PixelFormat::Source => have == layer,
        w => have == w,
    }
}

fn match_cspace(want: ColorSpace, have: ColorSpace, layer: ColorSpace) -> bool {
    match want {
        ColorSpace::Any => have != ColorSpace::None && have != ColorSpace::Any,
        ColorSpace::Source => have.translate() == layer.translate(),
        w => have == w,
    }
}

fn match_sampling(want: Sampling, have: Sampling, layer: Sampling) -> bool {
    match want {
        Sampling::Any => have != Sampling::None,
        Sampling::Source => have == layer,
        w => have == w,
    }
}

fn match_processing(want: Processing, have: Processing, layer: Processing) -> bool {
    match want {
        Processing::Any => have != Processing::None,
        Processing::Source => have == layer,
        w => have == w,
    }
}

fn match_rotation(want: Rotation, have: Rotation, layer: Rotation) -> bool {
    match want {
        Rotation::Source => have == layer,
        w => have == w,
    }
}

fn match_flag(want: RuleFlag, have: RuleFlag, layer: RuleFlag) -> bool {
    match want {
        RuleFlag::Source => have == layer,
        w => have == w,
    }
}

fn match_coeff(want: CoeffId, have: CoeffId, layer: CoeffId) -> bool {
    match want {
        CoeffId::Any => have.slot().is_some(),
        CoeffId::Source => have == layer,
        w => have == w,
    }
}

impl RuleCond {
    /// Evaluate this condition against the search state.
    pub fn matches(&self, s: &SearchState) -> bool {
        let layer = s.current_layer();
        match *self {
            Self::TargetCspace(want) => match_cspace(want, s.target_cspace, layer.cspace),
            Self::TargetFormat(want) => match_format(want, s.target_format, layer.format),
            Self::TargetTileType(want) => s.target_tiletype == want,
            Self::LayerRole(want) => layer.role == want,
            Self::LayerFormat(want) => match_format(want, layer.format, layer.format),
            Self::LayerNumber(want) => s.layer_number == want,
            Self::LayerRotation(want) => match_rotation(want, layer.rotation, layer.rotation),
            Self::LayerColorFill(want) => match_flag(want, layer.colorfill, layer.colorfill),
            Self::LayerProcamp(want) => match_flag(want, layer.procamp, layer.procamp),
            Self::LayerCoeffMode(want) => layer.coeff_mode == want,
            Self::Src0Format(want) => match_format(want, s.src0.format, layer.format),
            Self::Src0Sampling(want) => match_sampling(want, s.src0.sampling, layer.sampling),
            Self::Src0Rotation(want) => match_rotation(want, s.src0.rotation, layer.rotation),
            Self::Src0ColorFill(want) => match_flag(want, s.src0.colorfill, layer.colorfill),
            Self::Src0LumaKey(want) => match_flag(want, s.src0.lumakey, layer.lumakey),
            Self::Src0Procamp(want) => match_flag(want, s.src0.procamp, layer.procamp),
            Self::Src0Coeff(want) => match_coeff(want, s.src0.coeff, layer.matrix),
            Self::Src0Processing(want) => match_processing(want, s.src0.process, layer.process),
            Self::Src1Format(want) => match_format(want, s.src1.format, layer.format),
            Self::Src1Sampling(want) => match_sampling(want, s.src1.sampling, layer.sampling),
            Self::Src1LumaKey(want) => match_flag(want, s.src1.lumakey, layer.lumakey),
            Self::Src1Procamp(want) => match_flag(want, s.src1.procamp, layer.procamp),
            Self::Src1Coeff(want) => match_coeff(want, s.src1.coeff, layer.matrix),
            Self::Src1Processing(want) => match_processing(want, s.src1.process, layer.process),
            Self::Quadrant(want) => s.quadrant == want,
            Self::CscBeforeMix(want) => s.csc_before_mix == want,
            Self::ConstOutAlpha(want) => layer.const_alpha == want,
            Self::DualOutput(want) => layer.dualout == want,
            Self::RenderMethod(want) => s.render_method == want,
        }
    }
}

/// A state mutation performed by a matching rule set.
///
/// `Source` sentinels in set actions copy the value from the current
/// filter entry instead of using a literal.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleAction {
    /// Transition to a new parser state.
    SetParserState(ParserState),
    /// Select the internal color space.
    SetTargetCspace(ColorSpace),
    /// Append a component kernel to the selection.
    AddKernel(KernelId),
    /// Move on to the next filter entry. The delta adjusts the step:
    /// 0 advances one entry, -1 stays on the current one.
    NextLayer(i32),
    /// Emit a patch-data payload attached to the latest kernel.
    SetPatchData(PatchKind),
    /// Describe the destination blocks of the latest patch.
    SetPatch(Vec<PatchBlock>),
    SetQuadrant(i32),
    SetCscBeforeMix(bool),
    Src0Format(PixelFormat),
    Src0Sampling(Sampling),
    Src0Rotation(Rotation),
    Src0ColorFill(RuleFlag),
    Src0LumaKey(RuleFlag),
    Src0Procamp(RuleFlag),
    Src0Coeff(CoeffId),
    Src0Processing(Processing),
    Src1Format(PixelFormat),
    Src1Sampling(Sampling),
    Src1LumaKey(RuleFlag),
    Src1Procamp(RuleFlag),
    Src1Coeff(CoeffId),
    Src1Processing(Processing),
}

fn resolve_format(v: PixelFormat, layer: &LayerFilter) -> PixelFormat {
    if v == PixelFormat::Source {
        layer.format
    } else {
        v
    }
}

fn resolve_cspace(v: ColorSpace, layer: &LayerFilter) -> ColorSpace {
    if v == ColorSpace::Source {
        layer.cspace
    } else {
        v
    }
}

fn resolve_sampling(v: Sampling, layer: &LayerFilter) -> Sampling {
    if v == Sampling::Source {
        layer.sampling
    } else {
        v
    }
}

fn resolve_processing(v: Processing, layer: &LayerFilter) -> Processing {
    if v == Processing::Source {
        layer.process
    } else {
        v
    }
}

fn resolve_rotation(v: Rotation, layer: &LayerFilter) -> Rotation {
    if v == Rotation::Source {
        layer.rotation
    } else {
        v
    }
}

fn resolve_coeff(v: CoeffId, layer: &LayerFilter) -> CoeffId {
    if v == CoeffId::Source {
        layer.matrix
    } else {
        v
    }
}

fn resolve_flag(v: RuleFlag, actual: RuleFlag) -> RuleFlag {
    if v == RuleFlag::Source {
        actual
    } else {
        v
    }
}

impl RuleAction {
    /// Apply this action to the search state.
    ///
    /// [`SetPatchData`] snapshots the resolved CSC coefficients of the
    /// slot the patch refers to, so CSC resolution must run before the
    /// rule search.
    ///
    /// [`SetPatchData`]: RuleAction::SetPatchData
    pub fn apply(&self, s: &mut SearchState) -> Result<(), KdllError> {
        let layer = s.current_layer().clone();
        match self {
            Self::SetParserState(next) => s.state = *next,
            Self::SetTargetCspace(v) => s.target_cspace = resolve_cspace(*v, &layer),
            Self::AddKernel(id) => s.push_kernel(*id)?,
            Self::NextLayer(delta) => s.advance_layer(*delta),
            Self::SetPatchData(kind) => {
                let coeff_id = match kind {
                    PatchKind::CscCoeffSrc0 => s.src0.coeff,
                    PatchKind::CscCoeffSrc1 => s.src1.coeff,
                };
                let data = s.csc.matrix(coeff_id).map_or_else(Vec::new, |m| {
                    m.coeff.iter().flat_map(|c| c.to_le_bytes()).collect()
                });
                s.push_patch(PatchData::new(*kind, data))?;
            }
            Self::SetPatch(blocks) => {
                if blocks.len() > MAX_PATCH_BLOCKS {
                    return Err(KdllError::TooManyPatchBlocks { max: MAX_PATCH_BLOCKS });
                }
                if let Some(patch) = s.patches.last_mut() {
                    patch.blocks = blocks.clone();
                }
            }
            Self::SetQuadrant(q) => s.quadrant = *q,
            Self::SetCscBeforeMix(v) => s.csc_before_mix = *v,
            Self::Src0Format(v) => s.src0.format = resolve_format(*v, &layer),
            Self::Src0Sampling(v) => s.src0.sampling = resolve_sampling(*v, &layer),
            Self::Src0Rotation(v) => s.src0.rotation = resolve_rotation(*v, &layer),
            Self::Src0ColorFill(v) => s.src0.colorfill = resolve_flag(*v, layer.colorfill),
            Self::Src0LumaKey(v) => s.src0.lumakey = resolve_flag(*v, layer.lumakey),
            Self::Src0Procamp(v) => s.src0.procamp = resolve_flag(*v, layer.procamp),
            Self::Src0Coeff(v) => s.src0.coeff = resolve_coeff(*v, &layer),
            Self::Src0Processing(v) => s.src0.process = resolve_processing(*v, &layer),
            Self::Src1Format(v) => s.src1.format = resolve_format(*v, &layer),
            Self::Src1Sampling(v) => s.src1.sampling = resolve_sampling(*v, &layer),
            Self::Src1LumaKey(v) => s.src1.lumakey = resolve_flag(*v, layer.lumakey),
            Self::Src1Procamp(v) => s.src1.procamp = resolve_flag(*v, layer.procamp),
            Self::Src1Coeff(v) => s.src1.coeff = resolve_coeff(*v, &layer),
            Self::Src1Processing(v) => s.src1.process = resolve_processing(*v, &layer),
        }
        Ok(())
    }
}

/// One rule: a state, a priority group, conditions and actions.
#[derive(Clone, Debug)]
pub struct RuleEntrySet {
    state: ParserState,
    group: RuleGroup,
    conds: Vec<(RuleLogic, RuleCond)>,
    actions: Vec<RuleAction>,
}

impl RuleEntrySet {
    /// Start a rule for `state` in the default group.
    pub fn new(state: ParserState) -> Self {
        Self {
            state,
            group: RuleGroup::Default,
            conds: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Mark this rule as belonging to a strategy's custom table.
    pub fn custom(mut self) -> Self {
        self.group = RuleGroup::Custom;
        self
    }

    /// Mark this rule as non-overridable by custom tables.
    pub fn no_override(mut self) -> Self {
        self.group = RuleGroup::NoOverride;
        self
    }

    /// Append a condition starting a new AND-term.
    pub fn when(mut self, cond: RuleCond) -> Self {
        self.conds.push((RuleLogic::And, cond));
        self
    }

    /// Append an alternative to the previous term.
    pub fn or(mut self, cond: RuleCond) -> Self {
        debug_assert!(!self.conds.is_empty(), "or() without a preceding when()");
        self.conds.push((RuleLogic::Or, cond));
        self
    }

    /// Append a negated condition starting a new AND-term.
    pub fn not(mut self, cond: RuleCond) -> Self {
        self.conds.push((RuleLogic::Not, cond));
        self
    }

    /// Append an action.
    pub fn then(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn group(&self) -> RuleGroup {
        self.group
    }

    pub fn actions(&self) -> &[RuleAction] {
        &self.actions
    }

    /// True when every AND-term of the condition list holds.
    ///
    /// A rule with no conditions always matches (a state's fallthrough).
    pub fn matches(&self, s: &SearchState) -> bool {
        let mut i = 0;
        while i < self.conds.len() {
            let mut term = self.eval(i, s);
            i += 1;
            while i < self.conds.len() && self.conds[i].0 == RuleLogic::Or {
                term = term || self.eval(i, s);
                i += 1;
            }
            if !term {
                return false;
            }
        }
        true
    }

    fn eval(&self, i: usize, s: &SearchState) -> bool {
        let (logic, cond) = &self.conds[i];
        let v = cond.matches(s);
        if *logic == RuleLogic::Not {
            !v
        } else {
            v
        }
    }
}

/// The merged rule table: built-in defaults plus a strategy's custom rules,
/// indexed by parser state and ordered by priority group.
pub struct RuleTable {
    rules: Vec<RuleEntrySet>,
    by_state: Vec<Vec<usize>>,
}

impl RuleTable {
    /// Merge the default table with a strategy's custom rules.
    pub fn build(default: Vec<RuleEntrySet>, custom: Vec<RuleEntrySet>) -> Self {
        let mut rules = default;
        rules.extend(custom.into_iter().map(RuleEntrySet::custom));

        let mut by_state: Vec<Vec<usize>> = vec![Vec::new(); STATE_COUNT];
        for (idx, rule) in rules.iter().enumerate() {
            by_state[rule.state.index()].push(idx);
        }
        // Group order decides match priority; insertion order breaks ties.
        for bucket in &mut by_state {
            bucket.sort_by_key(|&i| rules[i].group);
        }
        Self { rules, by_state }
    }

    /// First rule registered for the current state that matches `s`.
    pub fn find_rule(&self, s: &SearchState) -> Option<&RuleEntrySet> {
        self.by_state[s.state.index()]
            .iter()
            .map(|&i| &self.rules[i])
            .find(|r| r.matches(s))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
