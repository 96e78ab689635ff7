use serde::{Deserialize, Serialize};

pub mod packets;

pub mod errors;
pub use errors::*;

pub mod layout;

/// Link, device and driver modules talk to real hardware and need the tokio
/// runtime; the `driver` feature (on by default) pulls them in. With the
/// feature off the crate is just the pure frame codec and layout logic.
#[cfg(feature = "driver")]
pub mod link;
#[cfg(feature = "driver")]
pub mod device;
#[cfg(feature = "driver")]
pub mod progress;
#[cfg(feature = "driver")]
pub mod drivers;

/// Expected capture counts per layer, fixed for the lifetime of a session.
///
/// The plan is supplied at startup (configuration, not negotiated over the
/// wire). Layer indices are 0-based internally; the PLC's folder numbering
/// is 1-based, handled by [`layout`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LayerPlan(Vec<u16>);

impl LayerPlan {
    /// Builds a plan from per-layer section counts. Every count must be
    /// positive and the plan must not be empty.
    pub fn new(sections_per_layer: Vec<u16>) -> Result<Self, CaptureError> {
        if sections_per_layer.is_empty() {
            return Err(CaptureError::InvalidPlan(
                "layer plan must contain at least one layer".to_string(),
            ));
        }
        if sections_per_layer.iter().any(|&s| s == 0) {
            return Err(CaptureError::InvalidPlan(
                "every layer must expect at least one section".to_string(),
            ));
        }
        Ok(Self(sections_per_layer))
    }

    /// Number of layers in the plan.
    pub fn layer_count(&self) -> usize {
        self.0.len()
    }

    /// Expected section count for a 0-based layer index, if the layer exists.
    pub fn sections(&self, layer: usize) -> Option<u16> {
        self.0.get(layer).copied()
    }

    /// Total number of images the whole session is expected to produce.
    pub fn total_sections(&self) -> u32 {
        self.0.iter().map(|&s| u32::from(s)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl Default for LayerPlan {
    // Section counts of the rig this controller was first deployed on.
    fn default() -> Self {
        Self(vec![1, 8, 12, 18, 24, 30, 36, 40, 45, 60, 60])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_rejects_empty_and_zero_counts() {
        assert!(LayerPlan::new(vec![]).is_err());
        assert!(LayerPlan::new(vec![3, 0, 2]).is_err());
    }

    #[test]
    fn plan_totals() {
        let plan = LayerPlan::new(vec![1, 8]).unwrap();
        assert_eq!(plan.layer_count(), 2);
        assert_eq!(plan.sections(1), Some(8));
        assert_eq!(plan.sections(2), None);
        assert_eq!(plan.total_sections(), 9);
    }

    #[test]
    fn default_plan_matches_deployed_rig() {
        let plan = LayerPlan::default();
        assert_eq!(plan.layer_count(), 11);
        assert_eq!(plan.total_sections(), 334);
    }
}
