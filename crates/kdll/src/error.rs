//! Engine error types.

use fc_common::{ColorSpace, FilterError, KernelId};
use thiserror::Error;

use crate::state::ParserState;

/// Errors from kernel search, linking, CSC resolution and caching.
///
/// All variants are recoverable at the call boundary: a failed search or
/// build never commits partial results to the cache, and the arena/pool are
/// left exactly as before the attempt.
#[derive(Debug, Error)]
pub enum KdllError {
    /// The state machine stalled: no rule matches the current state for
    /// this filter, so the combination is unsupported on this platform.
    #[error("no rule matches parser state {state:?} for this filter")]
    RuleNotFound { state: ParserState },

    /// The rule loop exceeded its defensive iteration bound.
    #[error("rule search did not terminate (stuck near state {state:?})")]
    SearchOverrun { state: ParserState },

    /// An import symbol has no matching export among the linked fragments.
    #[error("unresolved import: kernel {kuid}, label {label}")]
    UnresolvedImport { kuid: KernelId, label: u16 },

    /// The combined kernel would exceed the maximum kernel size.
    #[error("combined kernel too large: {size} bytes, maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// The cache arena is exhausted even after growth.
    #[error("kernel cache is full")]
    CacheFull,

    /// No conversion is known for this color-space pair.
    #[error("unsupported color space conversion: {src:?} -> {dst:?}")]
    CscUnsupported { src: ColorSpace, dst: ColorSpace },

    /// All CSC coefficient slots are allocated.
    #[error("no free CSC coefficient slot")]
    CscSlotsExhausted,

    /// A selected kernel id is not present in the component catalog.
    #[error("component kernel {kuid} not found in catalog")]
    KernelNotFound { kuid: KernelId },

    /// A fragment's byte length is not a whole number of instruction words.
    #[error("component kernel {kuid} is not word aligned ({size} bytes)")]
    MisalignedKernel { kuid: KernelId, size: usize },

    /// A link symbol's word offset lies outside its owning fragment.
    #[error("symbol label {label} at word {offset_words} is outside kernel {kuid} ({size_words} words)")]
    SymbolOutOfBounds {
        kuid: KernelId,
        label: u16,
        offset_words: u32,
        size_words: u32,
    },

    /// The search selected more component kernels than a combined kernel
    /// may contain.
    #[error("too many component kernels selected (maximum {max})")]
    TooManyKernels { max: usize },

    /// The search emitted more patches than a combined kernel may carry.
    #[error("too many kernel patches (maximum {max})")]
    TooManyPatches { max: usize },

    /// A patch carries more data bytes than a combined kernel may store.
    #[error("patch data too large: {size} bytes, maximum {max}")]
    PatchTooLarge { size: usize, max: usize },

    /// A patch addresses more destination blocks than allowed.
    #[error("too many patch blocks (maximum {max})")]
    TooManyPatchBlocks { max: usize },

    /// A cache handle refers to an evicted or rebuilt entry.
    #[error("stale kernel cache handle")]
    StaleHandle,

    /// Invalid filter description.
    #[error(transparent)]
    Filter(#[from] FilterError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = KdllError::UnresolvedImport {
            kuid: KernelId(7),
            label: 3,
        };
        assert!(err.to_string().contains("K007"));

        let err = KdllError::TooLarge {
            size: 200_000,
            max: 163_840,
        };
        assert!(err.to_string().contains("200000"));
    }
}
