use crate::api::handlers::auth::RateLimitConfig;
use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_AUTH_RATE_LIMIT: &str = "auth-rate-limit";
pub const ARG_LOGOUT_RATE_LIMIT: &str = "logout-rate-limit";
pub const ARG_SESSION_RATE_LIMIT: &str = "session-rate-limit";
pub const ARG_RATE_LIMIT_WINDOW_SECONDS: &str = "rate-limit-window-seconds";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub config: RateLimitConfig,
}

impl Options {
    /// Parse rate limit arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the window is zero.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let defaults = RateLimitConfig::default();
        let limit = |id: &str, default: u32| matches.get_one::<u32>(id).copied().unwrap_or(default);

        let window = matches
            .get_one::<u64>(ARG_RATE_LIMIT_WINDOW_SECONDS)
            .copied()
            .unwrap_or(defaults.window.as_secs());
        if window == 0 {
            anyhow::bail!("--{ARG_RATE_LIMIT_WINDOW_SECONDS} must be greater than 0");
        }

        Ok(Self {
            config: RateLimitConfig {
                auth_limit: limit(ARG_AUTH_RATE_LIMIT, defaults.auth_limit),
                logout_limit: limit(ARG_LOGOUT_RATE_LIMIT, defaults.logout_limit),
                session_limit: limit(ARG_SESSION_RATE_LIMIT, defaults.session_limit),
                window: Duration::from_secs(window),
            },
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_AUTH_RATE_LIMIT)
                .long(ARG_AUTH_RATE_LIMIT)
                .help("Login and signup requests allowed per client per window")
                .env("STREAMAUTH_AUTH_RATE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LOGOUT_RATE_LIMIT)
                .long(ARG_LOGOUT_RATE_LIMIT)
                .help("Logout requests allowed per client per window")
                .env("STREAMAUTH_LOGOUT_RATE_LIMIT")
                .default_value("20")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_SESSION_RATE_LIMIT)
                .long(ARG_SESSION_RATE_LIMIT)
                .help("Session lookups allowed per client per window")
                .env("STREAMAUTH_SESSION_RATE_LIMIT")
                .default_value("100")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .long(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .help("Rate limit window in seconds")
                .env("STREAMAUTH_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn command() -> Command {
        with_args(Command::new("streamauth"))
    }

    #[test]
    fn defaults_match_limiter_defaults() {
        temp_env::with_vars_unset(
            [
                "STREAMAUTH_AUTH_RATE_LIMIT",
                "STREAMAUTH_LOGOUT_RATE_LIMIT",
                "STREAMAUTH_SESSION_RATE_LIMIT",
                "STREAMAUTH_RATE_LIMIT_WINDOW_SECONDS",
            ],
            || {
                let matches = command().get_matches_from(vec!["streamauth"]);
                let options = Options::parse(&matches).unwrap();
                assert_eq!(options.config, RateLimitConfig::default());
            },
        );
    }

    #[test]
    fn flags_override() {
        temp_env::with_vars_unset(["STREAMAUTH_AUTH_RATE_LIMIT"], || {
            let matches = command().get_matches_from(vec![
                "streamauth",
                "--auth-rate-limit",
                "2",
                "--rate-limit-window-seconds",
                "10",
            ]);
            let options = Options::parse(&matches).unwrap();
            assert_eq!(options.config.auth_limit, 2);
            assert_eq!(options.config.window, Duration::from_secs(10));
        });
    }

    #[test]
    fn zero_window_rejected() {
        temp_env::with_vars([("STREAMAUTH_RATE_LIMIT_WINDOW_SECONDS", Some("0"))], || {
            let matches = command().get_matches_from(vec!["streamauth"]);
            assert!(Options::parse(&matches).is_err());
        });
    }
}
