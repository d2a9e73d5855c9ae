//! # Passkeys
//!
//! Multi-tenant passkey registration and sign-in. Client applications
//! (tenants) authenticate with an API key and drive two-phase WebAuthn
//! ceremonies on behalf of their users. No passwords are stored.
//!
//! ## Ceremonies
//!
//! Each ceremony is a `start` call that returns options for the browser and
//! an opaque request id, followed by a `finish` call that carries the
//! authenticator response and the same request id. Request ids are single-use
//! and expire after a fixed TTL.
//!
//! ## Relying parties
//!
//! The relying party (hostname and display name) is resolved per request:
//! explicit request parameters first, then the tenant's override, then the
//! server defaults. A ceremony always finishes against the relying party it
//! was started with.

pub mod api;
pub mod cli;
pub mod passkeys;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
