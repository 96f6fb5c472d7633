pub mod auth;
pub mod logging;
pub mod rate_limit;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const CMD_SWEEP: &str = "sweep";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("streamauth")
        .about("Session authentication for streaming apps")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("STREAMAUTH_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("PostgreSQL connection string")
                .long_help(
                    "PostgreSQL connection string. When omitted the server keeps users and sessions in memory and loses them on restart.",
                )
                .env("STREAMAUTH_DSN")
                .hide_env_values(true)
                .global(true),
        )
        .subcommand(
            Command::new(CMD_SWEEP)
                .about("Delete expired sessions once and exit")
                .long_about(
                    "Delete expired sessions once and exit. Meant for external schedulers; requires --dsn.",
                ),
        );

    let command = auth::with_args(command);
    let command = rate_limit::with_args(command);
    logging::with_args(command)
}
