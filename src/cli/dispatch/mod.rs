//! Map validated CLI matches to an [`Action`].

use crate::cli::actions::{server, sweep, Action};
use crate::cli::commands::{auth, rate_limit, ARG_DSN, ARG_PORT, CMD_SWEEP};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    if let Some(sub_m) = matches.subcommand_matches(CMD_SWEEP) {
        let dsn = non_empty_dsn(sub_m).context("missing required argument: --dsn")?;
        return Ok(Action::Sweep(sweep::Args { dsn }));
    }

    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let auth_opts = auth::Options::parse(matches)?;
    let rate_limit_opts = rate_limit::Options::parse(matches)?;

    Ok(Action::Server(server::Args {
        port,
        dsn: non_empty_dsn(matches),
        environment: auth_opts.environment,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        remember_ttl_seconds: auth_opts.remember_ttl_seconds,
        sweep_seconds: auth_opts.sweep_seconds,
        allowed_origin: auth_opts.allowed_origin,
        rate_limits: rate_limit_opts.config,
    }))
}

fn non_empty_dsn(matches: &clap::ArgMatches) -> Option<SecretString> {
    matches
        .get_one::<String>(ARG_DSN)
        .filter(|v| !v.trim().is_empty())
        .map(|v| SecretString::from(v.clone()))
}
