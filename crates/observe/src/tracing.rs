use tracing_subscriber::{EnvFilter, fmt};

/// Initializes the global tracing subscriber.
///
/// `env_filter` follows the `tracing_subscriber::EnvFilter` syntax, e.g.
/// `"debug,sqlx=warn,hyper=warn"`. Calling this twice is a programming error
/// and panics.
pub fn initialize(env_filter: &str) {
    fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_ansi(atty_stdout())
        .init();
}

fn atty_stdout() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}
