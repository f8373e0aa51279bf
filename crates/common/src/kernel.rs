//! Component-kernel identification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique id of a component kernel within the catalog (KUID).
///
/// Newtype over the catalog-assigned 16-bit id; the well-known ids of the
/// built-in catalog are defined as associated constants.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KernelId(pub u16);

impl KernelId {
    // Setup
    pub const SETUP: Self = Self(1);
    pub const SETUP_WALKER: Self = Self(2);

    // Per-layer parameter setup
    pub const SET_LAYER_0: Self = Self(8);
    pub const SET_LAYER_1: Self = Self(9);
    pub const SET_LAYER_2: Self = Self(10);
    pub const SET_LAYER_3: Self = Self(11);
    pub const SET_LAYER_4: Self = Self(12);
    pub const SET_LAYER_5: Self = Self(13);

    // Layer sampling/load
    pub const LOAD_NV12: Self = Self(16);
    pub const LOAD_P010: Self = Self(17);
    pub const LOAD_YUY2: Self = Self(18);
    pub const LOAD_PLANAR: Self = Self(19);
    pub const LOAD_ARGB: Self = Self(20);
    pub const LOAD_AYUV: Self = Self(21);

    // Color space conversion
    pub const CSC_SRC0: Self = Self(32);
    pub const CSC_SRC1: Self = Self(33);
    pub const SET_PATCHED_CSC_COEFF: Self = Self(34);

    // Layer combination
    pub const LUMAKEY: Self = Self(40);
    pub const COMPOSITE: Self = Self(48);
    pub const PBLEND: Self = Self(49);
    pub const CBLEND: Self = Self(50);
    pub const SBLEND: Self = Self(51);

    // Colorfill and write-out
    pub const COLORFILL: Self = Self(56);
    pub const SAVE_NV12: Self = Self(64);
    pub const SAVE_P010: Self = Self(65);
    pub const SAVE_YUY2: Self = Self(66);
    pub const SAVE_ARGB: Self = Self(67);
    pub const SAVE_RGB: Self = Self(68);
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K{:03}", self.0)
    }
}
