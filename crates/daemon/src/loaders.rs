//! Thin glue for the external collaborators named in the daemon's
//! interface contract: the credentials file, word-list files, and
//! per-list exception files.

use std::collections::HashSet;
use std::path::Path;

use lk_api::Credentials;
use lk_domain::Did;

/// Load the YAML credentials file (`id`/`pass` keys).
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading credentials file {}: {e}", path.display()))?;
    let creds: Credentials = serde_yaml::from_str(&raw)?;
    Ok(creds)
}

/// Load a plain-text word list: one term per line, leading/trailing
/// whitespace stripped, blank lines skipped. A missing file yields an
/// empty list rather than an error.
pub fn load_word_file(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(raw) => raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "loaders: word list file unreadable, using empty list");
            Vec::new()
        }
    }
}

/// Load a per-list exception file: one DID per line. A missing file
/// yields an empty exception set.
pub fn load_exceptions(path: &Path) -> HashSet<Did> {
    match std::fs::read_to_string(path) {
        Ok(raw) => raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Did::from)
            .collect(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "loaders: exception file unreadable, using empty set");
            HashSet::new()
        }
    }
}
