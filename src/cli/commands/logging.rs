use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_LOG_LEVEL: &str = "log-level";
pub const ARG_VERBOSE: &str = "verbose";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    pub log_level: Option<Level>,
    pub verbose: u8,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            log_level: matches.get_one::<Level>(ARG_LOG_LEVEL).copied(),
            verbose: matches.get_one::<u8>(ARG_VERBOSE).copied().unwrap_or(0),
        }
    }

    /// `--log-level` wins. Otherwise each `-v` raises the level one step
    /// above ERROR; `None` leaves the choice to `RUST_LOG`.
    #[must_use]
    pub fn level(&self) -> Option<Level> {
        if let Some(level) = self.log_level {
            return Some(level);
        }
        match self.verbose {
            0 => None,
            1 => Some(Level::WARN),
            2 => Some(Level::INFO),
            3 => Some(Level::DEBUG),
            _ => Some(Level::TRACE),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOG_LEVEL)
                .long(ARG_LOG_LEVEL)
                .help("Log level: error, warn, info, debug or trace")
                .env("PASSKEYS_LOG_LEVEL")
                .global(true)
                .value_parser(|value: &str| {
                    value.parse::<Level>().map_err(|err| err.to_string())
                }),
        )
        .arg(
            Arg::new(ARG_VERBOSE)
                .short('v')
                .long(ARG_VERBOSE)
                .help("Raise the log level, repeat for more (-vv is INFO)")
                .global(true)
                .action(ArgAction::Count),
        )
}
