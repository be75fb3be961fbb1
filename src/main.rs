use clap::Parser;
use crateindex::cli::{Cli, Commands};
use miette::Result;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter, e.g. `crateindex=debug`
const LOG_ENV: &str = "CRATE_INDEX_LOG";

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "crateindex=info,warn",
        2 => "crateindex=debug,info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries results; diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .init();
}

fn main() -> Result<()> {
    // Reset SIGPIPE to default behavior (terminate silently) for proper Unix piping.
    // Without this, piping to `head` causes a panic on broken pipe.
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;
    init_logging(global.verbose);

    match cli.command {
        Commands::Index(cmd) => crateindex::cli::commands::index::run(cmd, &global),
        Commands::Search(args) => crateindex::cli::commands::search::run(args, &global),
        Commands::Fields(args) => crateindex::cli::commands::fields::run(args, &global),
        Commands::Completions(args) => crateindex::cli::commands::completions::run(args),
    }
}
