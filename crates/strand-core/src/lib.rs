//! Core types for the Strand AI orchestration system
//!
//! This crate defines the vocabulary shared by every other Strand crate:
//! the closed set of AI capabilities, the cost and quality metadata a
//! provider publishes for each capability, the universal `OperationResult`
//! envelope that every adapter returns, and the `ProviderAdapter` trait
//! that concrete provider integrations implement.

pub mod error;
pub mod traits;
pub mod types;

pub use traits::ProviderAdapter;
pub use types::{
    Capability, CapabilityMetadata, CostInputs, CostUnit, OperationResult, ProviderRegistration,
    ProviderType, QualityTier,
};
