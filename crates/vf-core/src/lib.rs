//! vf-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other vf-* crates,
//! providing type-safe identifiers, a unified error type, the video
//! lifecycle model and quality ladder, storage key layout, application
//! configuration, and a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod ladder;
pub mod layout;
pub mod video;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use ladder::{QualityRung, QUALITY_LADDER};
pub use layout::StorageLayout;
pub use video::*;
