//! Passkey ceremony orchestration.
//!
//! Every ceremony is two calls. `start` resolves the relying party, asks the
//! [`CeremonyVerifier`] for options and parks the verifier state in the
//! [`CorrelationCache`] under an opaque request id. `finish` consumes that
//! entry, has the verifier check the client response against it, and writes
//! the outcome through the [`CredentialRepository`].
//!
//! Security boundaries:
//! - Request ids are single-use and expire after the configured TTL.
//! - The relying party is fixed at start and rebuilt from the cached entry.
//! - Raw client responses and verifier state are never logged.

pub mod assertion;
pub mod cache;
pub mod ceremony;
pub mod credentials;
pub mod error;
pub mod registration;
pub mod relying_party;
pub mod verifier;
pub mod webauthn;

pub use assertion::{AssertionFinish, AssertionFlow, AssertionStart, UnknownAccountPolicy};
pub use cache::CorrelationCache;
pub use ceremony::{
    normalize_username, CeremonyContext, CeremonyKind, ChallengeCache, PendingCeremony,
};
pub use credentials::{
    CredentialDescriptor, CredentialLookup, CredentialRepository, RegisteredKey,
};
pub use error::CeremonyError;
pub use registration::{RegistrationFinish, RegistrationFlow, RegistrationStart};
pub use relying_party::{
    RelyingPartyDefaults, RelyingPartyHint, RelyingPartyIdentity, RelyingPartyResolver,
};
pub use verifier::{
    AssertedCredential, CeremonyVerifier, Challenge, RegisteredCredential, RegistrationOptions,
    ResidentKeyPreference, UserIdentity, VerificationError,
};
pub use webauthn::WebauthnVerifier;
