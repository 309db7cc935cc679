use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use lru::LruCache;
use std::fs;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bundle::{self, BundleModel, ModelBundle, ModelKind};
use crate::error::{Result, TriageError};

const CACHE_CAPACITY: usize = 8;
const PUBLISH_ATTEMPTS: usize = 64;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temp name unique per process, thread and attempt; never parsed as a bundle.
fn temp_name(name: &str) -> String {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(".{name}.{}-{nonce}-{seq}.tmp", std::process::id())
}

/// On-disk location and version key of one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    pub name: String,
    pub kind: ModelKind,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Directory of immutable bundles named `<kind>_<%Y%m%d%H%M%S%6f>.json`.
pub struct ModelRegistry {
    dir: PathBuf,
    cache: Mutex<LruCache<String, Arc<ModelBundle>>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry").field("dir", &self.dir).finish()
    }
}

fn version_key(at: DateTime<Utc>) -> String {
    format!("{}{:06}", at.format("%Y%m%d%H%M%S"), at.timestamp_subsec_micros())
}

fn parse_version_key(key: &str) -> Option<DateTime<Utc>> {
    if key.len() != 20 || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (secs, micros) = key.split_at(14);
    let base = NaiveDateTime::parse_from_str(secs, "%Y%m%d%H%M%S").ok()?;
    let micros: i64 = micros.parse().ok()?;
    Some(Utc.from_utc_datetime(&(base + Duration::microseconds(micros))))
}

fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    at - Duration::nanoseconds(i64::from(at.timestamp_subsec_nanos() % 1_000))
}

/// Splits `anomaly_20240101120000000000.json` into kind and timestamp.
fn parse_bundle_name(file_name: &str) -> Option<(String, ModelKind, DateTime<Utc>)> {
    let stem = file_name.strip_suffix(".json")?;
    let (prefix, key) = stem.split_once('_')?;
    let kind = ModelKind::from_prefix(prefix)?;
    let created_at = parse_version_key(key)?;
    Some((stem.to_string(), kind, created_at))
}

impl ModelRegistry {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self { dir, cache: Mutex::new(LruCache::new(capacity)) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All recognised bundles, sorted by name. Temp files and foreign names are skipped.
    pub fn list(&self) -> Result<Vec<BundleInfo>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            if let Some((name, kind, created_at)) = parse_bundle_name(file_name) {
                out.push(BundleInfo { name, kind, created_at, path: entry.path() });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    pub fn latest_info(&self, kind: ModelKind) -> Result<Option<BundleInfo>> {
        Ok(self.list()?.into_iter().filter(|b| b.kind == kind).last())
    }

    /// Most recent bundle of `kind`. A broken newest bundle is an error, older ones are not tried.
    pub fn latest(&self, kind: ModelKind) -> Result<Arc<ModelBundle>> {
        match self.latest_info(kind)? {
            Some(info) => self.load(&info),
            None => Err(TriageError::NoTrainedModel(kind)),
        }
    }

    pub fn load(&self, info: &BundleInfo) -> Result<Arc<ModelBundle>> {
        if let Some(hit) = self.lock_cache().get(&info.name) {
            return Ok(Arc::clone(hit));
        }
        let bytes = fs::read(&info.path).map_err(|e| TriageError::ModelLoad {
            name: info.name.clone(),
            reason: e.to_string(),
        })?;
        let loaded = match bundle::decode(&info.name, &bytes) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(bundle = %info.name, error = %e, "rejected model bundle");
                return Err(e);
            }
        };
        if loaded.kind() != info.kind {
            return Err(TriageError::ModelLoad {
                name: info.name.clone(),
                reason: format!("file name says {} but payload is {}", info.kind, loaded.kind()),
            });
        }
        let loaded = Arc::new(loaded);
        self.lock_cache().put(info.name.clone(), Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Writes a new bundle whose version is strictly greater than every existing one of its kind.
    pub fn publish(&self, model: BundleModel) -> Result<BundleInfo> {
        let kind = model.kind();
        let mut created_at = truncate_to_micros(Utc::now());
        if let Some(latest) = self.latest_info(kind)? {
            if created_at <= latest.created_at {
                created_at = latest.created_at + Duration::microseconds(1);
            }
        }

        for _ in 0..PUBLISH_ATTEMPTS {
            let name = format!("{}_{}", kind.prefix(), version_key(created_at));
            let path = self.dir.join(format!("{name}.json"));
            let tmp = self.dir.join(temp_name(&name));
            let bytes = bundle::encode(&model, created_at)?;
            write_synced(&tmp, &bytes)?;

            // hard_link refuses to replace an existing name, so a concurrent
            // publisher of the same version loses and retries one tick later.
            let linked = fs::hard_link(&tmp, &path);
            let _ = fs::remove_file(&tmp);
            match linked {
                Ok(()) => {
                    tracing::info!(bundle = %name, kind = %kind, path = %path.display(), "published model bundle");
                    return Ok(BundleInfo { name, kind, created_at, path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    created_at = created_at + Duration::microseconds(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TriageError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("could not allocate a fresh {kind} bundle name"),
        )))
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<String, Arc<ModelBundle>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}
