pub mod design;
pub mod matrix;
pub mod metadata;

pub use design::{DesignMatrix, DesignModel};
pub use matrix::ExpressionMatrix;
pub use metadata::{BatchLabel, Covariate, SampleMetadata};
