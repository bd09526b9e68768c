//! Strand Engines Library
//!
//! This crate provides the capability registry and the concrete provider
//! adapters for the Strand orchestration system. Each adapter wraps one
//! provider API behind the common `ProviderAdapter` trait, declaring its
//! capabilities with cost and quality metadata and returning the universal
//! `OperationResult` envelope.
//!
//! # Supported Providers
//!
//! - **OpenAI** - chat completions (generation, structured output,
//!   summarization, sentiment) and Whisper transcription
//! - **Anthropic** - Claude messages API with tool-based structured output
//!   and the specialized analysis capabilities
//! - **Deepgram** - transcription with diarization and dual-channel support
//! - **Redaction** - internal PII detection/redaction service, zero cost
//!
//! # Examples
//!
//! ```rust,no_run
//! use strand_engines::builtin::{register_builtin_providers, ProviderSettings};
//! use strand_engines::registry::CapabilityRegistry;
//! use strand_core::Capability;
//!
//! # fn example() -> anyhow::Result<()> {
//! let registry = CapabilityRegistry::new();
//! let settings = ProviderSettings::default();
//! register_builtin_providers(&registry, &settings)?;
//!
//! let chain = registry.build_fallback_chain(
//!     Capability::Transcription,
//!     Some("deepgram"),
//!     2,
//!     &[],
//!     true,
//! );
//! println!("fallback chain: {chain:?}");
//! # Ok(())
//! # }
//! ```

pub mod anthropic;
mod base;
pub mod builtin;
pub mod deepgram;
pub mod openai;
pub mod redaction;
pub mod registry;

pub use registry::{AdapterConfig, AdapterFactory, CapabilityRegistry, RegistryError};
