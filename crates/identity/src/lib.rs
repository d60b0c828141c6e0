//! Passwordless ceremonies bound to transaction intents.
//!
//! This crate runs WebAuthn-style registration and authentication
//! ceremonies whose challenges carry a transaction hash and nonce, and can
//! require a zero-knowledge proof that the caller knows a MiMC preimage of
//! that hash.
//!
//! # Components
//!
//! - **CeremonyEngine**: the four ceremony operations plus revocation
//! - **CeremonySessionStore**: typed, single-shot session storage
//! - **CredentialLedger**: credential persistence over a repository
//! - **CloneDetector**: monotonic signature-counter policy
//! - **SignatureVerifier**: WebAuthn response verification (`Es256Verifier`)
//!
//! # Security Model
//!
//! - A session is consumed before its response is verified; a challenge
//!   can be answered at most once.
//! - Credentials are written only after every verification step passes.
//! - Counter regressions raise a sticky clone warning but do not fail the
//!   ceremony on their own.
//! - Errors carry detail for logs; callers facing an authenticator should
//!   use [`CeremonyError::public_message`].

pub mod clone_detector;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod observability;
pub mod session;
pub mod state;
pub mod webauthn;

pub use clone_detector::{CloneDetector, CounterVerdict};
pub use engine::{
    proof_verifier_from_config, CeremonyEngine, CredentialDescriptor, LoginOptions, LoginOutcome,
    LoginRequest, RegistrationOptions, RegistrationOutcome, RegistrationRequest,
    CEREMONY_HINT_LENGTH,
};
pub use error::{CeremonyError, CeremonyResult};
pub use ledger::CredentialLedger;
pub use observability::{
    AuditEntry, AuditEventType, AuditSink, CeremonyMetrics, MemoryAuditSink, MetricsSnapshot,
    Observability, TracingAuditSink,
};
pub use session::{CeremonyKey, CeremonySession, CeremonySessionStore};
pub use state::{CeremonyKind, CeremonyState, CeremonyStateMachine};
pub use webauthn::{
    AssertionResponse, Es256Verifier, ExpectedCeremony, RegistrationResponse, SignatureVerifier,
    VerificationError, VerifiedAssertion, VerifiedRegistration,
};

pub use zkpass_crypto::{PreimageProof, TransactionIntent};
