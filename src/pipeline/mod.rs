//! Pipeline stages for batch-to-Markdown conversion.
//!
//! Each submodule implements one step and is tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ classify ──▶ registry ──▶ (converter) ──▶ placement ──▶ archive
//! (batch)   (category)   (validate,                   (paths,       (zip)
//!                         dispatch)                    assets)
//! ```
//!
//! 1. [`input`]     turn a batch description into requests; fetches remote
//!    files on behalf of the orchestrator
//! 2. [`classify`]  map kind + extension to an output category
//! 3. [`validate`]  check the content shape before a converter sees it
//! 4. [`registry`]  two-stage key lookup and dispatch
//! 5. [`postprocess`] deterministic cleanup of converter Markdown
//! 6. [`sanitize`]  safe file and folder names, collision suffixes
//! 7. [`assets`]    decode embedded images and rewrite their references
//! 8. [`placement`] decide where each result lands in the archive

pub mod assets;
pub mod classify;
pub mod input;
pub mod placement;
pub mod postprocess;
pub mod registry;
pub mod sanitize;
pub mod validate;
