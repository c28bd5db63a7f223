//! # provis-id
//!
//! Identifier types shared by the reconciler and resource kinds.
//!
//! ## Design Principles
//!
//! - Handles are assigned by the remote system and are opaque to us
//! - A handle identifies exactly one remote object until that object is deleted
//! - Client tokens are generated locally, once per create, and reused on retry
//!
//! ## Formats
//!
//! Handles are arbitrary non-empty strings without whitespace, e.g.
//! `sfr-1` or `my-schedule-group`. Client tokens use a prefixed ULID:
//! `ct_01HV4Z2WQXKJNM8GPQY6VBKC3D`.

mod error;
mod types;

pub use error::HandleError;
pub use types::*;

