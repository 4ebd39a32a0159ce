//! `lk-cache` — the Profile Cache: a durable, concurrency-safe
//! DID -> profile snapshot store backed by `sled`.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use lk_domain::{Did, Error, Profile, Result};

/// The literal sentinel value the source guards against: a row whose
/// raw value equals this string is treated as if it were absent, and
/// writing it is a fatal data-integrity bug.
const NULL_SENTINEL: &str = "null";

pub struct Cache {
    tree: sled::Db,
}

impl Cache {
    /// Open (creating if absent) the cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let tree = sled::open(path).map_err(|e| Error::Cache(e.to_string()))?;
        Ok(Self { tree })
    }

    /// Look up a profile by DID. A stored value equal to the literal
    /// string `"null"` is treated as absent (guards against a prior
    /// nil-write bug corrupting reads).
    pub fn get(&self, did: &Did) -> Result<Option<Profile>> {
        match self.tree.get(did.as_str().as_bytes()).map_err(|e| Error::Cache(e.to_string()))? {
            None => Ok(None),
            Some(raw) => {
                if raw.as_ref() == NULL_SENTINEL.as_bytes() {
                    return Ok(None);
                }
                let profile: Profile =
                    serde_json::from_slice(&raw).map_err(Error::Json)?;
                Ok(Some(profile))
            }
        }
    }

    /// Upsert a profile. Rejects a would-be write of the literal
    /// sentinel value with a fatal data-integrity error.
    pub fn put(&self, profile: &Profile) -> Result<()> {
        let encoded = serde_json::to_vec(profile).map_err(Error::Json)?;
        if encoded == NULL_SENTINEL.as_bytes() {
            return Err(Error::DataIntegrity(format!(
                "refusing to write literal null for {}",
                profile.did
            )));
        }
        self.tree
            .insert(profile.did.as_str().as_bytes(), encoded)
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }

    /// Remove a row entirely.
    pub fn delete(&self, did: &Did) -> Result<()> {
        self.tree
            .remove(did.as_str().as_bytes())
            .map_err(|e| Error::Cache(e.to_string()))?;
        tracing::info!(did = %did, "cache: deleted profile");
        Ok(())
    }

    /// Iterate every stored DID. Finite, restartable (re-scans the
    /// tree from the start on each call).
    pub fn scan(&self) -> impl Iterator<Item = Did> + '_ {
        self.tree.iter().keys().filter_map(|k| {
            k.ok()
                .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
                .map(Did::from)
        })
    }

    /// True iff `expire_enabled` is false, or the profile's `cached_at`
    /// is within `cache_life` of `now`.
    pub fn fresh(
        profile: &Profile,
        now: DateTime<Utc>,
        cache_life: Duration,
        expire_enabled: bool,
    ) -> bool {
        if !expire_enabled {
            return true;
        }
        let age = now.signed_duration_since(profile.cached_at);
        match chrono::Duration::from_std(cache_life) {
            Ok(life) => age < life,
            Err(_) => true,
        }
    }

    /// Returns the cached profile iff it exists and is fresh under the
    /// given policy, else `None`.
    pub fn skip_fetch(
        &self,
        did: &Did,
        now: DateTime<Utc>,
        cache_life: Duration,
        expire_enabled: bool,
    ) -> Result<Option<Profile>> {
        let Some(profile) = self.get(did)? else {
            return Ok(None);
        };
        if Self::fresh(&profile, now, cache_life, expire_enabled) {
            Ok(Some(profile))
        } else {
            Ok(None)
        }
    }

    /// Import an optional gzipped-JSON bootstrap dump of `DID -> Profile`,
    /// upserting each entry once. A missing file is not an error.
    pub fn import_gzipped_json(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(0);
        }
        let file = std::fs::File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut contents = String::new();
        decoder.read_to_string(&mut contents)?;
        let entries: std::collections::HashMap<String, Profile> =
            serde_json::from_str(&contents).map_err(Error::Json)?;
        let count = entries.len();
        for (_did, profile) in entries {
            self.put(&profile)?;
        }
        tracing::info!(count, path = %path.display(), "cache: imported bootstrap dump");
        Ok(count)
    }

    /// Flush pending writes and drop the handle cleanly (used on shutdown).
    pub fn close(self) -> Result<()> {
        self.tree.flush().map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn profile(did: &str, cached_at: DateTime<Utc>) -> Profile {
        Profile {
            did: did.into(),
            handle: Some("someone.bsky.social".into()),
            display_name: None,
            description: None,
            follows_count: 0,
            followers_count: 0,
            cached_at,
        }
    }

    #[test]
    fn round_trip_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        let p = profile("did:plc:a", Utc::now());
        cache.put(&p).unwrap();
        let got = cache.get(&"did:plc:a".into()).unwrap().unwrap();
        assert_eq!(got, p);
    }

    #[test]
    fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        assert!(cache.get(&"did:plc:missing".into()).unwrap().is_none());
    }

    #[test]
    fn delete_removes_row() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        let p = profile("did:plc:a", Utc::now());
        cache.put(&p).unwrap();
        cache.delete(&p.did).unwrap();
        assert!(cache.get(&p.did).unwrap().is_none());
    }

    #[test]
    fn scan_yields_all_dids() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        cache.put(&profile("did:plc:a", Utc::now())).unwrap();
        cache.put(&profile("did:plc:b", Utc::now())).unwrap();
        let mut dids: Vec<String> = cache.scan().map(|d| d.to_string()).collect();
        dids.sort();
        assert_eq!(dids, vec!["did:plc:a".to_string(), "did:plc:b".to_string()]);
    }

    #[test]
    fn fresh_when_expiry_disabled_regardless_of_age() {
        let old = Utc::now() - ChronoDuration::days(365);
        let p = profile("did:plc:a", old);
        assert!(Cache::fresh(&p, Utc::now(), Duration::from_secs(60), false));
    }

    #[test]
    fn stale_past_cache_life() {
        let old = Utc::now() - ChronoDuration::hours(2);
        let p = profile("did:plc:a", old);
        assert!(!Cache::fresh(&p, Utc::now(), Duration::from_secs(3600), true));
    }

    #[test]
    fn skip_fetch_returns_none_for_stale() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        let old = Utc::now() - ChronoDuration::hours(2);
        cache.put(&profile("did:plc:a", old)).unwrap();
        let got = cache
            .skip_fetch(&"did:plc:a".into(), Utc::now(), Duration::from_secs(3600), true)
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn put_rejects_literal_null_encoding() {
        // Profile always serializes to a JSON object, never the bare
        // string "null", so this exercises the guard path defensively
        // via a manually constructed raw write instead.
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache.db")).unwrap();
        cache
            .tree
            .insert(b"did:plc:corrupt", NULL_SENTINEL.as_bytes())
            .unwrap();
        assert!(cache.get(&"did:plc:corrupt".into()).unwrap().is_none());
    }
}
