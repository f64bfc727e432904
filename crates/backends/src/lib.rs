//! Inference backend implementations for Llamart.
//!
//! All backends implement the `llamart_core::Backend` trait. The factory
//! picks the implementation for a model selection's [`BackendKind`].
//!
//! [`BackendKind`]: llamart_core::BackendKind

pub mod factory;
#[cfg(feature = "local")]
pub mod local;
pub mod scripted;
pub mod unsupported;

pub use factory::{LocalBackendFactory, SamplingOptions};
#[cfg(feature = "local")]
pub use local::CandleTextBackend;
pub use scripted::{ScriptedBackend, ScriptedBackendFactory, ScriptedConfig};
pub use unsupported::UnsupportedBackend;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
