use std::sync::Arc;

use tessera_shared::{
    log::{error, info, trace, warn},
    parking_lot::Mutex,
};

use crate::{
    cache::{Cache, CacheLookup},
    common::LoadError,
    dispatch::Dispatch,
    package_loader::{ObjectRecord, PackageLoader, RecordSource, SubRequestId},
    path_table::{Handle, PathTable},
    Result,
};

/// Sub-index under which the [`ObjectRecord`] of an object is cached.
pub const RECORD_SUB_INDEX: u32 = 0;

struct CachedRecords {
    cache: Arc<Mutex<Cache>>,
    source: Option<Arc<dyn RecordSource>>,
    path_table: Arc<PathTable>,
}

impl CachedRecords {
    fn cache_error(path: &str, err: impl ToString) -> LoadError {
        LoadError::Cache {
            path: path.to_owned(),
            message: err.to_string(),
        }
    }

    /// Returns the cached record or regenerates it from the source when the entry is
    /// missing or stale.
    fn load(&self, path: Handle) -> std::result::Result<(ObjectRecord, bool), LoadError> {
        let path_string = self.path_table.to_string(path);
        let current_timestamp = self.source.as_ref().and_then(|source| source.source_timestamp(path));

        let mut cache = self.cache.lock();
        let lookup = cache
            .lookup(&path_string, RECORD_SUB_INDEX, current_timestamp)
            .map_err(|err| Self::cache_error(&path_string, err))?;
        let entry = match lookup {
            CacheLookup::Hit(entry) => entry,
            CacheLookup::Miss | CacheLookup::Stale(_) => {
                drop(cache);
                return self.regenerate(path, &path_string).map(|record| (record, true));
            }
        };
        let decoded = cache
            .read_entry(&entry)
            .map_err(|err| Self::cache_error(&path_string, err))
            .and_then(|bytes| bincode::deserialize::<ObjectRecord>(&bytes).map_err(|err| Self::cache_error(&path_string, err)));
        drop(cache);
        match decoded {
            Ok(record) => Ok((record, false)),
            Err(err) if self.source.is_some() => {
                warn!("Regenerating '{path_string}' because the cached data can't be used: {err}");
                self.regenerate(path, &path_string).map(|record| (record, true))
            }
            Err(err) => Err(err),
        }
    }

    fn regenerate(&self, path: Handle, path_string: &str) -> std::result::Result<ObjectRecord, LoadError> {
        let Some(source) = &self.source else {
            return Err(LoadError::NotFound(path_string.to_owned()));
        };
        let record = source.read_record(path)?;
        let timestamp = source.source_timestamp(path).unwrap_or(record.timestamp);
        let bytes = bincode::serialize(&record).map_err(|err| Self::cache_error(path_string, err))?;
        self.cache
            .lock()
            .cache_entry(path_string, RECORD_SUB_INDEX, &bytes, timestamp)
            .map_err(|err| Self::cache_error(path_string, err))?;
        trace!("Cached '{path_string}' with timestamp {timestamp}");
        Ok(record)
    }

    fn enumerate_children(&self, path: Handle) -> Result<Vec<Handle>> {
        if let Some(source) = &self.source {
            return source.enumerate_children(path);
        }
        let mut children = Vec::new();
        let mut cache = self.cache.lock();
        for entry in cache.entries()? {
            if entry.sub_index != RECORD_SUB_INDEX {
                continue;
            }
            let Ok(handle) = self.path_table.intern_path(&entry.path) else {
                warn!("Cache contains the invalid path '{}'", entry.path);
                continue;
            };
            // Packages that only contain packages have no entry of their own.
            let mut current = handle;
            while let Some(parent) = self.path_table.parent(current) {
                if parent == path {
                    if !children.contains(&current) {
                        children.push(current);
                    }
                    break;
                }
                current = parent;
            }
        }
        drop(cache);
        children.sort_by_key(|child| self.path_table.to_string(*child));
        Ok(children)
    }
}

/// [`PackageLoader`] that reads objects from a [`Cache`]. With a [`RecordSource`] missing and
/// stale entries are regenerated from it; without one the cache is the only copy.
pub struct CachedPackageLoader {
    records: Arc<CachedRecords>,
    dispatch: Dispatch,
}

impl CachedPackageLoader {
    pub fn new(
        cache: Arc<Mutex<Cache>>,
        source: Option<Arc<dyn RecordSource>>,
        path_table: Arc<PathTable>,
        thread_count: usize,
    ) -> Result<Self> {
        let name = format!("CachedPackageLoader({})", cache.lock().name());
        info!("Creating {name}");
        let dispatch = Dispatch::new(name, thread_count)?;
        Ok(Self {
            records: Arc::new(CachedRecords {
                cache,
                source,
                path_table,
            }),
            dispatch,
        })
    }

    pub fn cache(&self) -> &Arc<Mutex<Cache>> {
        &self.records.cache
    }
}

impl PackageLoader for CachedPackageLoader {
    fn name(&self) -> String {
        format!("CachedPackageLoader({})", self.records.cache.lock().name())
    }

    fn begin_load_object(&self, path: Handle) -> SubRequestId {
        let records = self.records.clone();
        self.dispatch
            .submit(Box::new(move || records.load(path).map(|(record, _)| record)))
    }

    fn try_finish_load_object(&self, id: SubRequestId) -> Option<std::result::Result<ObjectRecord, LoadError>> {
        self.dispatch.try_take(id)
    }

    fn cancel_load_object(&self, id: SubRequestId) {
        self.dispatch.cancel(id);
    }

    fn enumerate_children(&self, path: Handle) -> Result<Vec<Handle>> {
        self.records.enumerate_children(path)
    }

    fn tick(&self) {
        self.dispatch.tick();
    }
}

impl Drop for CachedPackageLoader {
    fn drop(&mut self) {
        if let Err(err) = self.records.cache.lock().flush() {
            error!("Failed to flush cache on drop: {err}");
        }
    }
}

/// Outcome of [`cook_package`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CookReport {
    /// Objects whose cache entry was missing or stale.
    pub cooked: Vec<String>,
    /// Objects whose cache entry was up to date.
    pub up_to_date: Vec<String>,
    pub failed: Vec<(String, LoadError)>,
}

/// Brings the cache entries of every object below `package` up to date and flushes the cache.
pub fn cook_package(
    cache: &Arc<Mutex<Cache>>,
    source: Arc<dyn RecordSource>,
    path_table: &Arc<PathTable>,
    package: Handle,
) -> Result<CookReport> {
    let records = CachedRecords {
        cache: cache.clone(),
        source: Some(source.clone()),
        path_table: path_table.clone(),
    };
    let mut report = CookReport::default();
    let mut pending = source.enumerate_children(package)?;
    pending.reverse();
    while let Some(path) = pending.pop() {
        let mut children = source.enumerate_children(path)?;
        children.reverse();
        pending.extend(children);
        if path_table.is_package(path) {
            continue;
        }
        let path_string = path_table.to_string(path);
        match records.load(path) {
            Ok((_, true)) => report.cooked.push(path_string),
            Ok((_, false)) => report.up_to_date.push(path_string),
            Err(err) => {
                error!("Failed to cook '{path_string}': {err}");
                report.failed.push((path_string, err));
            }
        }
    }
    cache.lock().flush()?;
    info!(
        "Cooked '{}': {} cooked, {} up to date, {} failed",
        path_table.to_string(package),
        report.cooked.len(),
        report.up_to_date.len(),
        report.failed.len()
    );
    Ok(report)
}
