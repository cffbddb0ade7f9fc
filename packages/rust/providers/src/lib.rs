//! Model-facing providers for OpenCraft.
//!
//! - [`chat`]: chat-completions transport behind the [`ChatBackend`] trait
//! - [`validation`]: candidate parsing and the name/emoji rules
//! - [`generator`]: the bounded retry loop that yields a valid material
//! - [`embedding`]: text-to-vector providers behind [`EmbeddingProvider`]

pub mod chat;
pub mod embedding;
pub mod generator;
pub mod validation;

pub use chat::{ChatBackend, ChatMessage, OpenAiChat, Role};
pub use embedding::{EmbeddingProvider, HashEmbedder, HttpEmbedder, build_embedder};
pub use generator::{GeneratedMaterial, Generator};
pub use validation::{Candidate, MAX_NAME_WORDS, Rejection, ValidatedMaterial, validate_candidate};
