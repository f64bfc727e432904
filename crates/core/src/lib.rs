//! # Llamart Core
//!
//! Shared vocabulary of the Llamart inference client: the [`Backend`] contract
//! and its [`BackendFactory`], model routing ([`BackendKind`]), knowledge
//! entries, planar images, domain events and the error taxonomy.
//!
//! Only `serde`, `thiserror`, `chrono` and the `tokio` broadcast channel are
//! used here; engines, configuration and the session live in other crates.

pub mod backend;
pub mod error;
pub mod event;
pub mod image;
pub mod knowledge;

pub use backend::{Backend, BackendFactory, BackendKind, EndOfSequencePolicy, ModelSelection};
pub use error::{Error, ErrorCategory, Result};
pub use event::{DomainEvent, EventBus};
pub use image::PlanarRgbImage;
pub use knowledge::KnowledgeEntry;
