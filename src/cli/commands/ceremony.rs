use crate::passkeys::UnknownAccountPolicy;
use clap::{builder::PossibleValuesParser, Arg, ArgMatches, Command};

pub const ARG_CHALLENGE_TTL_SECONDS: &str = "challenge-ttl-seconds";
pub const ARG_CHALLENGE_CACHE_MAX_ENTRIES: &str = "challenge-cache-max-entries";
pub const ARG_UNKNOWN_ACCOUNT_POLICY: &str = "unknown-account-policy";

#[derive(Debug, Clone)]
pub struct Options {
    pub challenge_ttl_seconds: u64,
    pub challenge_cache_max_entries: usize,
    pub unknown_account_policy: UnknownAccountPolicy,
}

impl Options {
    /// Parse ceremony arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the unknown account policy is not recognized.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let unknown_account_policy = matches
            .get_one::<String>(ARG_UNKNOWN_ACCOUNT_POLICY)
            .map_or(Ok(UnknownAccountPolicy::default()), |policy| {
                policy.parse::<UnknownAccountPolicy>()
            })?;

        Ok(Self {
            challenge_ttl_seconds: matches
                .get_one::<u64>(ARG_CHALLENGE_TTL_SECONDS)
                .copied()
                .unwrap_or(300),
            challenge_cache_max_entries: matches
                .get_one::<usize>(ARG_CHALLENGE_CACHE_MAX_ENTRIES)
                .copied()
                .unwrap_or(10_000),
            unknown_account_policy,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CHALLENGE_TTL_SECONDS)
                .long(ARG_CHALLENGE_TTL_SECONDS)
                .help("Seconds a started ceremony may wait for its finish call")
                .env("PASSKEYS_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CHALLENGE_CACHE_MAX_ENTRIES)
                .long(ARG_CHALLENGE_CACHE_MAX_ENTRIES)
                .help("Maximum number of pending ceremonies kept in memory")
                .env("PASSKEYS_CHALLENGE_CACHE_MAX_ENTRIES")
                .default_value("10000")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_UNKNOWN_ACCOUNT_POLICY)
                .long(ARG_UNKNOWN_ACCOUNT_POLICY)
                .help("Sign-in for an unknown name: start a registration or a discoverable assertion")
                .env("PASSKEYS_UNKNOWN_ACCOUNT_POLICY")
                .default_value(UnknownAccountPolicy::Register.as_str())
                .value_parser(PossibleValuesParser::new(UnknownAccountPolicy::VARIANTS)),
        )
}
