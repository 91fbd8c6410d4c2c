//! Scoring network capability, the default MLP scorer, and tensor conversions.

pub mod bridge;
pub mod scorer;
