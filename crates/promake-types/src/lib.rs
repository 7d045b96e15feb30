//! Shared types for promake.
//!
//! This crate defines the data model used across the pipeline: interned
//! strings and keys, the 16-bit instruction stream, compiled documents,
//! source locations, and the diagnostic types.

pub mod message;
pub mod pro_string;
pub mod profile;
pub mod tokens;

pub use message::{CollectingHandler, Message, MessageHandler, MessageKind, Severity, StderrHandler};
pub use pro_string::{pro_hash, ProKey, ProString, ProStringList};
pub use profile::{ProFile, ProFileLocation, ProFileRef, ProFunctionDef};
pub use tokens::{LenSlot, Op, TokenReader, TokenWriter, NEW_STR, OP_MASK};
