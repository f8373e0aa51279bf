//! Procamp (processing amplifier) adjustment parameters.

use serde::{Deserialize, Serialize};

/// Brightness/contrast/hue/saturation adjustments folded into the CSC
/// matrix of layers that request procamp.
///
/// The `version` counter is bumped by the host every time the parameters
/// change; cached CSC matrices record the version they were computed from
/// and are recomputed only when it moves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Procamp {
    /// Whether procamp is applied at all.
    pub enabled: bool,
    /// Parameter version, for CSC memoization.
    pub version: u32,
    /// Brightness: -100.0..=100.0, default 0.0.
    pub brightness: f32,
    /// Contrast: 0.0..=10.0, default 1.0.
    pub contrast: f32,
    /// Hue in degrees: -180.0..=180.0, default 0.0.
    pub hue: f32,
    /// Saturation: 0.0..=10.0, default 1.0.
    pub saturation: f32,
}

impl Default for Procamp {
    fn default() -> Self {
        Self {
            enabled: false,
            version: 0,
            brightness: 0.0,
            contrast: 1.0,
            hue: 0.0,
            saturation: 1.0,
        }
    }
}

impl Procamp {
    /// True when the parameters are the identity adjustment.
    pub fn is_identity(&self) -> bool {
        self.brightness == 0.0
            && self.contrast == 1.0
            && self.hue == 0.0
            && self.saturation == 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_identity() {
        assert!(Procamp::default().is_identity());
    }

    #[test]
    fn adjusted_is_not_identity() {
        let p = Procamp {
            enabled: true,
            contrast: 1.2,
            ..Procamp::default()
        };
        assert!(!p.is_identity());
    }
}
