//! # kb-chat
//!
//! Retrieval-augmented chat over an archived message knowledge base.
//!
//! A turn streams a model answer while the model calls knowledge-base tools.
//! Retrieval counts matches first, answers small result sets with one ranked
//! fetch, and digests large ones with bounded map-reduce summarization. Every
//! turn ends with a non-empty answer: streamed text, a non-streaming
//! fallback, one explicit retry, or a fixed message.
//!
//! ## Layers
//!
//! - [`core`]: turn context, documents, reply language
//! - [`retrieval`]: query planning, batched digests, rendering, per-turn cache
//! - [`agent`]: providers, tool loop, stream reconciliation, turn controller
//! - [`history`]: per-thread history and the rolling conversation summary
//! - [`storage`]: `SQLite` FTS5 message index and history store
//! - [`cli`]: the `kb-chat` command-line interface

pub mod agent;
pub mod cli;
pub mod core;
pub mod error;
pub mod history;
pub mod retrieval;
pub mod storage;

pub use error::{Error, Result};
