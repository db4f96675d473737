//! Cache command - inspect the disk cache

use crate::cache::{self, CacheKeyBuilder, CacheLocation, DiskCacheStore};
use crate::cli::args::{CacheAction, CacheArgs};
use crate::config::Config;
use crate::error::{IpxError, IpxResult};
use crate::identity::{SourceIdentity, SourceResolver};
use console::style;
use tracing::debug;

/// State of a single cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Hit,
    Stale(&'static str),
    Missing,
}

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> IpxResult<()> {
    match args.action {
        CacheAction::Inspect { modifiers, source } => inspect(config, &modifiers, &source).await,
    }
}

async fn inspect(config: &Config, modifiers: &str, source: &str) -> IpxResult<()> {
    match locate(config, modifiers, source) {
        Ok((identity, location)) => {
            let state = entry_state(config, &identity, &location).await?;
            println!("{:<10} {}", style("Source:").bold(), identity);
            println!("{:<10} {}", style("Modifiers:").bold(), modifiers);
            println!("{:<10} {}", style("Digest:").bold(), location.digest);
            println!(
                "{:<10} {}",
                style("Artifact:").bold(),
                location.artifact_path.display()
            );
            let state = match state {
                EntryState::Hit => style("hit".to_string()).green(),
                EntryState::Stale(reason) => style(format!("stale ({})", reason)).yellow(),
                EntryState::Missing => style("missing".to_string()).dim(),
            };
            println!("{:<10} {}", style("State:").bold(), state);
        }
        Err(e) => {
            println!(
                "{:<10} {}",
                style("State:").bold(),
                style(format!("rejected ({}) {}", e.status_code(), e)).red()
            );
        }
    }
    Ok(())
}

fn locate(
    config: &Config,
    modifiers: &str,
    source: &str,
) -> IpxResult<(SourceIdentity, CacheLocation)> {
    if modifiers.is_empty() {
        return Err(IpxError::InvalidRequestShape(
            "missing modifiers segment".to_string(),
        ));
    }
    let settings = &config.ipx_settings;
    let resolver = SourceResolver::new(&settings.fs_dir, &settings.http_storage.domains)?;
    let identity = resolver.resolve(source)?;
    let location = CacheKeyBuilder::new(&settings.disk_cache_dir)?.build(modifiers, &identity)?;
    Ok((identity, location))
}

/// Classify an entry without invoking any transform
pub async fn entry_state(
    config: &Config,
    identity: &SourceIdentity,
    location: &CacheLocation,
) -> IpxResult<EntryState> {
    let store = DiskCacheStore::new(&config.ipx_settings.disk_cache_dir)?;
    let Some(entry) = store.lookup(location).await else {
        return Ok(EntryState::Missing);
    };

    let current = cache::fingerprint(identity).await;
    debug!(
        stored = ?entry.fingerprint,
        current = ?current,
        "Comparing fingerprints"
    );
    let state = match (&entry.fingerprint, &current) {
        _ if DiskCacheStore::is_valid(entry.fingerprint.as_ref(), current.as_ref()) => {
            EntryState::Hit
        }
        (None, _) => EntryState::Stale("no valid fingerprint record"),
        (_, None) => EntryState::Stale("source unreadable"),
        _ => EntryState::Stale("source changed"),
    };
    Ok(state)
}
