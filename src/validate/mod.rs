//! Pure validators: severity tolerance policy and response shape contract.

pub mod classification;
pub mod shape;
