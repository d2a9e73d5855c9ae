use crate::passkeys::relying_party::{DEFAULT_RP_DISPLAY_NAME, DEFAULT_RP_HOSTNAME};
use clap::{Arg, ArgMatches, Command};

pub const ARG_RP_HOSTNAME: &str = "rp-hostname";
pub const ARG_RP_DISPLAY_NAME: &str = "rp-display-name";
pub const ARG_RP_ALLOW_ORIGIN_PORT: &str = "rp-allow-origin-port";

#[derive(Debug, Clone)]
pub struct Options {
    pub hostname: String,
    pub display_name: String,
    pub allow_origin_port: bool,
}

impl Options {
    /// Parse relying party defaults from matches.
    ///
    /// # Errors
    /// Returns an error if the hostname is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let hostname = matches
            .get_one::<String>(ARG_RP_HOSTNAME)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_RP_HOSTNAME}"))?;

        Ok(Self {
            hostname,
            display_name: matches
                .get_one::<String>(ARG_RP_DISPLAY_NAME)
                .cloned()
                .unwrap_or_else(|| DEFAULT_RP_DISPLAY_NAME.to_string()),
            allow_origin_port: matches
                .get_one::<bool>(ARG_RP_ALLOW_ORIGIN_PORT)
                .copied()
                .unwrap_or(true),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RP_HOSTNAME)
                .long(ARG_RP_HOSTNAME)
                .help("Default relying party hostname, used when the tenant has no override")
                .env("PASSKEYS_RP_HOSTNAME")
                .default_value(DEFAULT_RP_HOSTNAME),
        )
        .arg(
            Arg::new(ARG_RP_DISPLAY_NAME)
                .long(ARG_RP_DISPLAY_NAME)
                .help("Default relying party display name")
                .env("PASSKEYS_RP_DISPLAY_NAME")
                .default_value(DEFAULT_RP_DISPLAY_NAME),
        )
        .arg(
            Arg::new(ARG_RP_ALLOW_ORIGIN_PORT)
                .long(ARG_RP_ALLOW_ORIGIN_PORT)
                .help("Accept origins on any port of the relying party host")
                .env("PASSKEYS_RP_ALLOW_ORIGIN_PORT")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
}
