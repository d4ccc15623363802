//! Model loading and scoring.

pub mod model;
pub mod scoring;

pub use model::{
    DictVectorizer, FeatureTransform, LinearRegressor, LoadedModel, ModelArtifact, Regressor,
    SparseRow,
};
pub use scoring::ScoringAdapter;
