//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{ceremony, relying_party, store, ARG_DSN, ARG_PORT};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let rp_opts = relying_party::Options::parse(matches)?;
    let ceremony_opts = ceremony::Options::parse(matches)?;
    let store_opts = store::Options::parse(matches);

    Ok(Action::Server(Args {
        port,
        dsn,
        memory_api_key: store_opts.memory_api_key,
        rp_hostname: rp_opts.hostname,
        rp_display_name: rp_opts.display_name,
        rp_allow_origin_port: rp_opts.allow_origin_port,
        challenge_ttl_seconds: ceremony_opts.challenge_ttl_seconds,
        challenge_cache_max_entries: ceremony_opts.challenge_cache_max_entries,
        unknown_account_policy: ceremony_opts.unknown_account_policy,
    }))
}
