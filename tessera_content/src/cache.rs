//! Binary store of preprocessed object data.
//!
//! A cache consists of two files per (name, platform) pair:
//!
//! ```text
//! cache/
//! ├─ packages.linux.toc   table of contents
//! ├─ packages.linux.dat   concatenated byte ranges
//! ```
//!
//! The data file is never interpreted without the table of contents. Every [`TocEntry`]
//! addresses one byte range by `(path, sub_index)` and remembers the source timestamp the data
//! was generated from. Entries whose timestamp differs from the current source timestamp are
//! stale and have to be regenerated.

use std::{
    collections::HashMap,
    fmt,
    fs::{self, File, OpenOptions},
    io::{BufReader, BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tessera_shared::{
    log::{info, trace, warn},
    parking_lot::Mutex,
};

use crate::{
    cache_file::{CacheFileRead, CacheFileWrite},
    Error, Result,
};

/// Target platform of the cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
    Web,
}

impl Platform {
    /// Platform the process is running on.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_family = "wasm") {
            Platform::Web
        } else {
            Platform::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Web => "web",
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub path: String,
    pub sub_index: u32,
    pub offset: u64,
    pub length: u64,
    pub timestamp: u64,
}

/// Outcome of [`Cache::lookup`]. Neither a miss nor a stale entry is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(TocEntry),
    Miss,
    Stale(TocEntry),
}

#[derive(Default)]
struct Toc {
    entries: Vec<TocEntry>,
    index: HashMap<(String, u32), usize>,
}

impl Toc {
    fn from_entries(entries: Vec<TocEntry>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| ((entry.path.clone(), entry.sub_index), position))
            .collect();
        Self { entries, index }
    }

    fn find(&self, path: &str, sub_index: u32) -> Option<&TocEntry> {
        self.index
            .get(&(path.to_owned(), sub_index))
            .map(|position| &self.entries[*position])
    }

    /// Returns whether an existing entry was replaced.
    fn upsert(&mut self, entry: TocEntry) -> bool {
        match self.index.get(&(entry.path.clone(), entry.sub_index)) {
            Some(position) => {
                self.entries[*position] = entry;
                true
            }
            None => {
                self.index.insert((entry.path.clone(), entry.sub_index), self.entries.len());
                self.entries.push(entry);
                false
            }
        }
    }
}

pub struct Cache {
    name: String,
    platform: Platform,
    toc_path: PathBuf,
    data_path: PathBuf,
    toc: Option<Toc>,
    dirty: bool,
}

impl Cache {
    /// Creates the cache `name` for `platform` in `directory`. No file is touched before the
    /// table of contents is needed.
    pub fn new(directory: impl AsRef<Path>, name: impl Into<String>, platform: Platform) -> Self {
        let name = name.into();
        let directory = directory.as_ref();
        Self {
            toc_path: directory.join(format!("{name}.{platform}.toc")),
            data_path: directory.join(format!("{name}.{platform}.dat")),
            name,
            platform,
            toc: None,
            dirty: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn toc_path(&self) -> &Path {
        &self.toc_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    fn toc_file_type(&self) -> String {
        format!("toc/{}", self.platform)
    }

    fn data_file_type(&self) -> String {
        format!("dat/{}", self.platform)
    }

    /// Loads the table of contents. Only the first call reads the file.
    pub fn enforce_toc_load(&mut self) -> Result<()> {
        if self.toc.is_some() {
            return Ok(());
        }
        if !self.toc_path.exists() {
            info!("Cache '{}' has no table of contents yet at {:?}", self.name, self.toc_path);
            self.toc = Some(Toc::default());
            return Ok(());
        }
        let file = BufReader::new(File::open(&self.toc_path)?);
        let mut reader =
            CacheFileRead::open(file, &self.toc_file_type()).map_err(|_| Error::InvalidCacheFile(self.toc_path.clone()))?;
        let entries: Vec<TocEntry> = bincode::deserialize_from(reader.content()).map_err(Error::FailedDeserialization)?;
        info!("Loaded {} entries of cache '{}' from {:?}", entries.len(), self.name, self.toc_path);
        self.toc = Some(Toc::from_entries(entries));
        Ok(())
    }

    fn toc(&mut self) -> Result<&mut Toc> {
        self.enforce_toc_load()?;
        Ok(self.toc.get_or_insert_with(Toc::default))
    }

    pub fn find_entry(&mut self, path: &str, sub_index: u32) -> Result<Option<&TocEntry>> {
        Ok(self.toc()?.find(path, sub_index))
    }

    /// Finds the entry and compares it against `current_timestamp`. Without a current
    /// timestamp every entry counts as a hit.
    pub fn lookup(&mut self, path: &str, sub_index: u32, current_timestamp: Option<u64>) -> Result<CacheLookup> {
        let lookup = match self.find_entry(path, sub_index)? {
            None => CacheLookup::Miss,
            Some(entry) if current_timestamp.is_some_and(|timestamp| timestamp != entry.timestamp) => {
                CacheLookup::Stale(entry.clone())
            }
            Some(entry) => CacheLookup::Hit(entry.clone()),
        };
        match &lookup {
            CacheLookup::Hit(_) => trace!("Cache hit for '{path}' ({sub_index})"),
            CacheLookup::Miss => trace!("Cache miss for '{path}' ({sub_index})"),
            CacheLookup::Stale(entry) => warn!(
                "Cache entry for '{path}' ({sub_index}) is stale: cached {} but source is {:?}",
                entry.timestamp, current_timestamp
            ),
        }
        Ok(lookup)
    }

    /// Reads the byte range of `entry` from the data file.
    pub fn read_entry(&self, entry: &TocEntry) -> Result<Vec<u8>> {
        let file = BufReader::new(File::open(&self.data_path)?);
        let mut reader =
            CacheFileRead::open(file, &self.data_file_type()).map_err(|_| Error::InvalidCacheFile(self.data_path.clone()))?;
        Ok(reader.read_range(entry.offset, entry.length)?)
    }

    /// Appends `bytes` to the data file and records them under `(path, sub_index)`. An
    /// existing entry is overwritten, in which case `true` is returned.
    pub fn cache_entry(&mut self, path: &str, sub_index: u32, bytes: &[u8], timestamp: u64) -> Result<bool> {
        self.enforce_toc_load()?;
        let offset = self.append_data(bytes)?;
        let replaced = self.toc()?.upsert(TocEntry {
            path: path.to_owned(),
            sub_index,
            offset,
            length: bytes.len() as u64,
            timestamp,
        });
        self.dirty = true;
        trace!("Cached {} bytes for '{path}' ({sub_index}) at offset {offset}", bytes.len());
        Ok(replaced)
    }

    fn append_data(&self, bytes: &[u8]) -> Result<u64> {
        if let Some(parent) = self.data_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&self.data_path)?;
        let mut writer = if file.metadata()?.len() == 0 {
            CacheFileWrite::create(file, &self.data_file_type())?
        } else {
            CacheFileWrite::open(file, &self.data_file_type()).map_err(|_| Error::InvalidCacheFile(self.data_path.clone()))?
        };
        let mut content = writer.content();
        let offset = content.seek(SeekFrom::End(0))?;
        content.write_all(bytes)?;
        content.flush()?;
        Ok(offset)
    }

    /// All entries in insertion order.
    pub fn entries(&mut self) -> Result<&[TocEntry]> {
        Ok(&self.toc()?.entries)
    }

    /// Writes the table of contents when it changed.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(toc) = &self.toc else {
            return Ok(());
        };
        if let Some(parent) = self.toc_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = BufWriter::new(File::create(&self.toc_path)?);
        let mut writer = CacheFileWrite::create(file, &self.toc_file_type())?;
        bincode::serialize_into(writer.content(), &toc.entries).map_err(Error::FailedSerialization)?;
        writer.into_inner().flush()?;
        info!("Flushed {} entries of cache '{}' to {:?}", toc.entries.len(), self.name, self.toc_path);
        self.dirty = false;
        Ok(())
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("Failed to flush cache '{}': {err}", self.name);
        }
    }
}

/// Hands out one [`Cache`] per (name, platform) pair.
pub struct CacheRegistry {
    directory: PathBuf,
    caches: Mutex<HashMap<(String, Platform), Arc<Mutex<Cache>>>>,
}

impl CacheRegistry {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            caches: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn cache(&self, name: &str, platform: Platform) -> Arc<Mutex<Cache>> {
        self.caches
            .lock()
            .entry((name.to_owned(), platform))
            .or_insert_with(|| {
                info!("Opening cache '{name}' for platform '{platform}'");
                Arc::new(Mutex::new(Cache::new(&self.directory, name, platform)))
            })
            .clone()
    }

    pub fn flush_all(&self) -> Result<()> {
        for cache in self.caches.lock().values() {
            cache.lock().flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;
    use tessera_test::setup_logger;

    use super::*;

    #[test]
    fn empty_cache_misses() {
        // Given
        setup_logger();
        let directory = TempDir::new("cache").unwrap();
        let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);

        // Then
        assert_eq!(cache.find_entry("/P:A", 0).unwrap(), None);
        assert_eq!(cache.lookup("/P:A", 0, Some(1)).unwrap(), CacheLookup::Miss);
        assert!(!cache.toc_path().exists());
    }

    #[test]
    fn cache_entry_and_read_back() {
        // Given
        setup_logger();
        let directory = TempDir::new("cache").unwrap();
        let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);

        // When
        assert!(!cache.cache_entry("/P:A", 0, b"first", 10).unwrap());
        assert!(!cache.cache_entry("/P:B", 0, b"second", 20).unwrap());

        // Then
        let entry = cache.find_entry("/P:B", 0).unwrap().unwrap().clone();
        assert_eq!(entry.offset, 5);
        assert_eq!(entry.length, 6);
        assert_eq!(cache.read_entry(&entry).unwrap(), b"second");
    }

    #[test]
    fn corrupt_entry_range_is_an_error() {
        // Given
        setup_logger();
        let directory = TempDir::new("cache").unwrap();
        let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);
        cache.cache_entry("/P:A", 0, b"first", 10).unwrap();
        let mut entry = cache.find_entry("/P:A", 0).unwrap().unwrap().clone();

        // When
        entry.length = u64::MAX;
        let too_long = cache.read_entry(&entry);
        entry.length = 5;
        entry.offset = 1;
        let shifted = cache.read_entry(&entry);

        // Then
        match too_long {
            Err(Error::IoError(err)) => assert_eq!(err.kind(), std::io::ErrorKind::InvalidData),
            other => panic!("expected an InvalidData error, got {other:?}"),
        }
        assert!(matches!(shifted, Err(Error::IoError(_))));
    }

    #[test]
    fn staleness() {
        // Given
        setup_logger();
        let directory = TempDir::new("cache").unwrap();
        let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);
        cache.cache_entry("/P:A", 0, b"data", 10).unwrap();

        // Then
        assert!(matches!(cache.lookup("/P:A", 0, Some(10)).unwrap(), CacheLookup::Hit(_)));
        assert!(matches!(cache.lookup("/P:A", 0, Some(11)).unwrap(), CacheLookup::Stale(_)));
        assert!(matches!(cache.lookup("/P:A", 0, None).unwrap(), CacheLookup::Hit(_)));
        assert_eq!(cache.lookup("/P:A", 1, Some(10)).unwrap(), CacheLookup::Miss);
    }

    #[test]
    fn overwrite_entry() {
        // Given
        setup_logger();
        let directory = TempDir::new("cache").unwrap();
        let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);
        cache.cache_entry("/P:A", 0, b"old", 1).unwrap();

        // When
        let replaced = cache.cache_entry("/P:A", 0, b"newer", 2).unwrap();

        // Then
        assert!(replaced);
        assert_eq!(cache.entries().unwrap().len(), 1);
        let entry = cache.find_entry("/P:A", 0).unwrap().unwrap().clone();
        assert_eq!(entry.timestamp, 2);
        assert_eq!(cache.read_entry(&entry).unwrap(), b"newer");
    }

    #[test]
    fn persists_across_instances() {
        // Given
        setup_logger();
        let directory = TempDir::new("cache").unwrap();
        {
            let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);
            cache.cache_entry("/P:A", 0, b"alpha", 7).unwrap();
            cache.cache_entry("/P:A", 1, b"beta", 7).unwrap();
            cache.flush().unwrap();
        }

        // When
        let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);

        // Then
        let entry = cache.find_entry("/P:A", 1).unwrap().unwrap().clone();
        assert_eq!(entry.timestamp, 7);
        assert_eq!(cache.read_entry(&entry).unwrap(), b"beta");
    }

    #[test]
    fn drop_flushes() {
        setup_logger();
        let directory = TempDir::new("cache").unwrap();
        {
            let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);
            cache.cache_entry("/P:A", 0, b"alpha", 7).unwrap();
        }
        let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);
        assert!(cache.find_entry("/P:A", 0).unwrap().is_some());
    }

    #[test]
    fn platforms_are_independent() {
        // Given
        setup_logger();
        let directory = TempDir::new("cache").unwrap();
        let registry = CacheRegistry::new(directory.path());
        let linux = registry.cache("packages", Platform::Linux);
        let windows = registry.cache("packages", Platform::Windows);

        // When
        linux.lock().cache_entry("/P:A", 0, b"linux", 1).unwrap();
        registry.flush_all().unwrap();

        // Then
        assert!(Arc::ptr_eq(&linux, &registry.cache("packages", Platform::Linux)));
        assert!(windows.lock().find_entry("/P:A", 0).unwrap().is_none());
        assert!(directory.path().join("packages.linux.toc").exists());
        assert!(!directory.path().join("packages.windows.toc").exists());
    }

    #[test]
    fn corrupt_toc_is_reported() {
        setup_logger();
        let directory = TempDir::new("cache").unwrap();
        fs::write(directory.path().join("packages.linux.toc"), b"garbage").unwrap();
        let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);
        assert!(matches!(cache.enforce_toc_load(), Err(Error::InvalidCacheFile(_))));
    }

    #[test]
    fn toc_of_other_platform_is_rejected() {
        setup_logger();
        let directory = TempDir::new("cache").unwrap();
        {
            let mut cache = Cache::new(directory.path(), "packages", Platform::Windows);
            cache.cache_entry("/P:A", 0, b"alpha", 7).unwrap();
        }
        fs::rename(
            directory.path().join("packages.windows.toc"),
            directory.path().join("packages.linux.toc"),
        )
        .unwrap();
        let mut cache = Cache::new(directory.path(), "packages", Platform::Linux);
        assert!(cache.enforce_toc_load().is_err());
    }
}
