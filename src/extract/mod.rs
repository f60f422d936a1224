//! Two-stage extraction: classify the document, then extract the fields the
//! category's schema names.

pub mod classify;
pub mod fields;
pub mod normalize;
pub mod prompts;

pub use classify::{Classification, ClassificationResponse, TypeClassifier};
pub use fields::{Extraction, FieldExtractor, RawFieldMap};
