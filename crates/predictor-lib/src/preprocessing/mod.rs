//! Preprocessing and normalization engine
//!
//! Provides:
//! - Min-max scaling of continuous attributes
//! - Ordinal encoding of categorical attributes over fixed vocabularies
//! - Target normalization statistics shared by training and inference

mod features;
mod normalization;
mod vocabulary;

pub use features::{feature_matrix, EncodedDataset, FeatureEncoder, Vocabularies};
pub use normalization::{
    normalize, AttributeRange, NormalizationStats, TargetStats, DEGENERATE_RANGE_VALUE,
};
pub use vocabulary::{Vocabulary, UNKNOWN_ENCODING};
