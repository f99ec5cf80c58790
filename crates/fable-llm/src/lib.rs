//! Generation service interface for the Fable workflow engine.
//!
//! The engine never talks to a model API directly: it builds a
//! [`GenerationSpec`] (role preset + instructions + prior artifacts) and hands
//! it to a [`GenerationService`]. Retry, backoff, and provider fallback are
//! composed around the trait by the engine, never baked into an adapter.

pub mod counter;
pub mod openai_compat;
pub mod service;
pub mod spec;

pub use counter::CallCounter;
pub use openai_compat::OpenAiCompatService;
pub use service::{DynService, GenerationService, ScriptedService};
pub use spec::{GenerationSpec, Generated, RolePreset, Usage};
