//! Feature preparation applied identically to reference and window frames.

pub mod normalize;

pub use normalize::{CATEGORICAL_FILL, NUMERICAL_FILL, Normalizer};
