//! Client for the QBank question API.
//!
//! Every request carries the current session token from a
//! [`TokenProvider`](qbank_auth::TokenProvider). A `401` invalidates the
//! session and surfaces `SessionExpired`; a `403` surfaces `Forbidden` and
//! leaves the session alone.

mod client;
mod models;

pub use client::ApiClient;
pub use models::{EvaluationRequest, EvaluationResponse, Question, QuestionDraft};
