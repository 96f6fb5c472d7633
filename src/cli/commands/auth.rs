use crate::api::handlers::auth::{sessions::MAX_SESSION_TTL_SECONDS, Environment};
use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_ENVIRONMENT: &str = "environment";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_SESSION_REMEMBER_TTL_SECONDS: &str = "session-remember-ttl-seconds";
pub const ARG_SESSION_SWEEP_SECONDS: &str = "session-sweep-seconds";
pub const ARG_ALLOWED_ORIGIN: &str = "allowed-origin";

#[derive(Debug, Clone)]
pub struct Options {
    pub environment: Environment,
    pub session_ttl_seconds: i64,
    pub remember_ttl_seconds: i64,
    pub sweep_seconds: u64,
    pub allowed_origin: Option<String>,
}

impl Options {
    /// Parse session and cookie arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a TTL is not positive or the environment is unknown.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let environment = matches
            .get_one::<String>(ARG_ENVIRONMENT)
            .map_or(Ok(Environment::default()), |value| value.parse())
            .map_err(|err| anyhow!(err))?;

        let ttl = |id: &str| -> Result<i64> {
            let value = matches.get_one::<i64>(id).copied().unwrap_or_default();
            if value <= 0 {
                anyhow::bail!("--{id} must be greater than 0");
            }
            Ok(value)
        };

        Ok(Self {
            environment,
            session_ttl_seconds: ttl(ARG_SESSION_TTL_SECONDS)?,
            remember_ttl_seconds: ttl(ARG_SESSION_REMEMBER_TTL_SECONDS)?,
            sweep_seconds: matches
                .get_one::<u64>(ARG_SESSION_SWEEP_SECONDS)
                .copied()
                .unwrap_or_default(),
            allowed_origin: matches
                .get_one::<String>(ARG_ALLOWED_ORIGIN)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ENVIRONMENT)
                .long(ARG_ENVIRONMENT)
                .help("Runtime environment: development or production")
                .long_help(
                    "Runtime environment. `production` adds the `Secure` attribute to the session cookie.",
                )
                .env("STREAMAUTH_ENV")
                .default_value("development")
                .value_parser(["development", "dev", "production", "prod"]),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session lifetime in seconds")
                .env("STREAMAUTH_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_SESSION_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_SESSION_REMEMBER_TTL_SECONDS)
                .long(ARG_SESSION_REMEMBER_TTL_SECONDS)
                .help("Session lifetime in seconds when remember-me is requested")
                .env("STREAMAUTH_SESSION_REMEMBER_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_SESSION_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_SESSION_SWEEP_SECONDS)
                .long(ARG_SESSION_SWEEP_SECONDS)
                .help("Expired session sweep interval in seconds (0 disables)")
                .env("STREAMAUTH_SESSION_SWEEP_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_ALLOWED_ORIGIN)
                .long(ARG_ALLOWED_ORIGIN)
                .help("Browser origin allowed to call the API with credentials")
                .env("STREAMAUTH_ALLOWED_ORIGIN"),
        )
}
