pub mod anthropic;
pub mod chunk;
pub mod comment;
pub mod model;
pub mod openai;
pub mod prompts;
pub mod synthesize;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use crate::{
    model::{LanguageModel, Providers},
    synthesize::synthesize_review,
};
