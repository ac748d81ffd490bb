//! # TDX Trust Gateway
//!
//! Attestation-verified reverse proxy for Intel TDX confidential workloads.
//! Before any client bytes reach a registered application, the gateway
//! proves that the workload runs the exact binary built by the expected
//! source repository inside a cryptographically verified trust domain:
//! DCAP quote verification, Sigstore build provenance, and measurement
//! baseline comparison must all pass.
//!
//! Verification verdicts are cached with a TTL and coalesced across
//! concurrent requests; see the `attestation-tdx` crate for the
//! verification stack itself.

pub mod config;
pub mod gate;
pub mod proxy;
pub mod registry;
pub mod routes;
pub mod server;

pub use config::Settings;
pub use registry::{MemoryRegistry, RegistrationStore};
pub use routes::router;
pub use server::{shutdown_signal, AppState};
