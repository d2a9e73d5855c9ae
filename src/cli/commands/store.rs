use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_MEMORY_API_KEY: &str = "memory-api-key";

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// API key of the single tenant seeded into a `memory://` store.
    pub memory_api_key: Option<SecretString>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            memory_api_key: matches
                .get_one::<String>(ARG_MEMORY_API_KEY)
                .map(|key| key.trim())
                .filter(|key| !key.is_empty())
                .map(|key| SecretString::from(key.to_string())),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_MEMORY_API_KEY)
            .long(ARG_MEMORY_API_KEY)
            .help("API key of the tenant created at startup when --dsn is memory://")
            .env("PASSKEYS_MEMORY_API_KEY")
            .hide_env_values(true),
    )
}
