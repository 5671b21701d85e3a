// ABOUTME: Shared logging setup for the relay binaries
// ABOUTME: init_for() installs crate-filtered stderr logging, level_for() maps --verbose

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Crate-filtered logging to stderr.
///
/// The named crates log at `level`, everything else at WARN. RUST_LOG
/// directives are applied first and the defaults are added on top.
pub fn init_for(crate_names: &[&str], level: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(crate_names, level))
        .init();
}

fn build_filter(crate_names: &[&str], level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(Level::WARN.into());
    for name in crate_names {
        match format!("{name}={level}").parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Warning: ignoring log directive for '{name}': {e}"),
        }
    }
    filter
}

/// Pick the level for the relay's own crates from a `--verbose` flag.
pub fn level_for(verbose: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}
