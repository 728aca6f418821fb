//! Stout CLI entry point.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stout::cli::Cli;

#[tokio::main]
async fn main() {
    // Argument errors exit with code 1, not clap's default 2.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    if let Err(err) = color_eyre::install() {
        eprintln!("stout: {err}");
        std::process::exit(1);
    }

    let directive = if cli.debug { "stout=debug" } else { "stout=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive(directive.parse().expect("valid static directive")),
        )
        .init();

    // On success the parent's exit code is the child's; any failure is one
    // diagnostic line and exit code 1.
    match cli.execute().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("stout: {err}");
            std::process::exit(1);
        }
    }
}
