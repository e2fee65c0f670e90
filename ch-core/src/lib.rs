//! Shared contract for consult-human.
//!
//! Providers consume an [`AskRequest`] and produce a [`Reply`]; the CLI turns
//! the pair into an [`AskResult`] on stdout. Everything that crosses a crate
//! boundary lives here so the app and the provider agree on one vocabulary.

pub mod classify;
mod error;
mod types;

pub use error::{RelayError, Result};
pub use types::{AskRequest, AskResult, Choice, QuestionType, Reply};
