use super::verifier::VerificationError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CeremonyError {
    #[error("request not found or expired")]
    RequestNotFoundOrExpired,
    #[error("username already registered")]
    UsernameAlreadyRegistered,
    #[error("invalid username")]
    InvalidUsername,
    #[error("user not found")]
    UserNotFound,
    #[error("invalid relying party: {0}")]
    InvalidRelyingParty(String),
    #[error("malformed client response: {0}")]
    MalformedClientResponse(String),
    #[error("registration ceremony failed")]
    RegistrationCeremonyFailed(#[source] VerificationError),
    #[error("assertion ceremony failed")]
    AssertionCeremonyFailed(#[source] VerificationError),
    #[error("could not create challenge")]
    ChallengeFailed(#[source] VerificationError),
    #[error("storage failure")]
    StorageFailure(#[from] StoreError),
}

impl CeremonyError {
    /// Map a failure to produce a challenge.
    #[must_use]
    pub fn challenge(err: VerificationError) -> Self {
        match err {
            VerificationError::Lookup(err) => Self::StorageFailure(err),
            err => Self::ChallengeFailed(err),
        }
    }

    /// Map a failed registration verification.
    #[must_use]
    pub fn registration(err: VerificationError) -> Self {
        match err {
            VerificationError::MalformedResponse(message) => Self::MalformedClientResponse(message),
            VerificationError::Lookup(err) => Self::StorageFailure(err),
            err => Self::RegistrationCeremonyFailed(err),
        }
    }

    /// Map a failed assertion verification.
    #[must_use]
    pub fn assertion(err: VerificationError) -> Self {
        match err {
            VerificationError::MalformedResponse(message) => Self::MalformedClientResponse(message),
            VerificationError::Lookup(err) => Self::StorageFailure(err),
            err => Self::AssertionCeremonyFailed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_failures_surface_as_storage_failures() {
        let lookup = || VerificationError::Lookup(StoreError::UniqueViolation("x".to_string()));
        assert!(matches!(
            CeremonyError::challenge(lookup()),
            CeremonyError::StorageFailure(_)
        ));
        assert!(matches!(
            CeremonyError::registration(lookup()),
            CeremonyError::StorageFailure(_)
        ));
        assert!(matches!(
            CeremonyError::assertion(lookup()),
            CeremonyError::StorageFailure(_)
        ));
    }

    #[test]
    fn verifier_rejections_keep_their_ceremony() {
        let rejected = || VerificationError::Rejected("bad signature".to_string());
        assert!(matches!(
            CeremonyError::registration(rejected()),
            CeremonyError::RegistrationCeremonyFailed(_)
        ));
        assert!(matches!(
            CeremonyError::assertion(rejected()),
            CeremonyError::AssertionCeremonyFailed(_)
        ));
        assert!(matches!(
            CeremonyError::assertion(VerificationError::MalformedResponse("x".to_string())),
            CeremonyError::MalformedClientResponse(_)
        ));
    }
}
