//! Entry points for the `git-integrity` subcommands.

pub mod multi_repo;
pub mod single_repo;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. The provided level sets the default
/// filter; the `RUST_LOG` environment variable overrides it.
pub fn install_tracing(log_level: &str) -> eyre::Result<()> {
    let level: LevelFilter = log_level
        .parse()
        .map_err(|_| eyre::eyre!("Invalid log level: {log_level}"))?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()?;
    Ok(())
}

/// Split an `owner/repo` argument into its two components.
pub fn parse_owner_and_repo(owner_and_repo: &str) -> eyre::Result<(String, String)> {
    match owner_and_repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => eyre::bail!("Expected a repository of the form owner/repo, got: {owner_and_repo}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_owner_and_repo() {
        assert_eq!(
            parse_owner_and_repo("octocat/example").unwrap(),
            ("octocat".to_string(), "example".to_string())
        );
        assert!(parse_owner_and_repo("octocat").is_err());
        assert!(parse_owner_and_repo("octocat/").is_err());
        assert!(parse_owner_and_repo("/example").is_err());
        assert!(parse_owner_and_repo("a/b/c").is_err());
    }
}
