//! # Attestation TDX
//!
//! Verification stack for Intel TDX confidential workloads. Three
//! independent proofs are combined per registration:
//!
//! - **DCAP**: the quote's signature chain verifies against Intel's
//!   certification hierarchy (native QVL over FFI, with an explicitly marked
//!   mock fallback for hosts without the library).
//! - **Build provenance**: a Sigstore-recorded forge attestation binds the
//!   running container image digest to the expected source repository.
//! - **Measurements**: the registers carried in the quote match the baseline
//!   recorded for the registration.
//!
//! The [`chain::ChainVerifier`] orchestrates the three, and the
//! [`cache::AttestationCache`] amortizes verification across concurrent
//! requests with TTL reuse and single-flight coalescing.

pub mod cache;
pub mod chain;
pub mod dcap;
pub mod measurement;
pub mod provenance;
pub mod provider;
pub mod quote;
pub mod qvl;
pub mod types;

pub use cache::{AttestationCache, CacheError, CacheStats, CachedAttestation};
pub use chain::{ChainConfig, ChainVerifier, MeasurementSettings};
pub use dcap::{DcapConfig, DcapVerifier};
pub use measurement::MeasurementVerifier;
pub use provenance::{ProvenanceConfig, ProvenanceVerifier};
pub use provider::QuoteProviderClient;
pub use types::*;
