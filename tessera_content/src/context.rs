use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tessera_shared::log::{error, info};

use crate::{
    asset_loader::{AssetLoader, Ticker},
    cache::{CacheRegistry, Platform},
    cached_loader::{cook_package, CachedPackageLoader, CookReport},
    loose_loader::{LooseFileLoader, LooseFiles},
    object::{ObjectHandle, TypeRegistry},
    package_loader::{PackageLoader, RecordSource},
    path_table::{PathTable, DEFAULT_BUCKET_COUNT},
    Error, Result,
};

/// Settings of a [`Context`]. Every field has a default so that partial YAML documents
/// are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub path_table_buckets: usize,
    pub platform: Platform,
    pub cache_directory: PathBuf,
    /// I/O worker threads per package loader. With 0 the I/O runs inline in `tick`.
    pub loader_threads: usize,
    pub poll_interval_us: u64,
    pub load_timeout_ms: Option<u64>,
    /// Starts a background thread ticking the loader when set.
    pub tick_interval_ms: Option<u64>,
    pub mounts: Vec<MountConfig>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            path_table_buckets: DEFAULT_BUCKET_COUNT,
            platform: Platform::current(),
            cache_directory: PathBuf::from("cache"),
            loader_threads: 1,
            poll_interval_us: 500,
            load_timeout_ms: None,
            tick_interval_ms: None,
            mounts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loose: Option<LooseMountConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMountConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LooseMountConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMountConfig {
    pub name: String,
    /// Loose files the cache is generated from. Without it the cache is never considered stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl ContentConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reads the config at `path`. Relative directories in it are relative to the directory
    /// of the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    pub fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.cache_directory);
        for mount in &mut self.mounts {
            if let Some(loose) = &mut mount.loose {
                resolve(&mut loose.root);
            }
            if let Some(source) = mount.cache.as_mut().and_then(|cache| cache.source.as_mut()) {
                resolve(source);
            }
        }
    }
}

/// Everything needed to load objects: the path table, the type registry, the caches and
/// the asset loader with all configured mounts.
pub struct Context {
    ticker: Option<Ticker>,
    asset_loader: Arc<AssetLoader>,
    caches: CacheRegistry,
    registry: Arc<TypeRegistry>,
    path_table: Arc<PathTable>,
    config: ContentConfig,
}

impl Context {
    pub fn new(config: ContentConfig, registry: TypeRegistry) -> Result<Self> {
        if config.path_table_buckets == 0 {
            return Err(Error::Other("path_table_buckets must not be 0".into()));
        }
        let path_table = Arc::new(PathTable::new(config.path_table_buckets));
        let registry = Arc::new(registry);
        let caches = CacheRegistry::new(&config.cache_directory);
        let asset_loader = AssetLoader::new(path_table.clone(), registry.clone())
            .with_poll_interval(Duration::from_micros(config.poll_interval_us))
            .with_load_timeout(config.load_timeout_ms.map(Duration::from_millis));

        for mount in &config.mounts {
            let package = path_table.intern_path(&mount.package)?;
            if !path_table.is_package(package) {
                return Err(Error::InvalidMount(mount.package.clone(), "not a package path".to_owned()));
            }
            let loader = Self::create_package_loader(&config, &caches, &path_table, mount)?;
            asset_loader.mount(package, loader);
        }

        let asset_loader = Arc::new(asset_loader);
        let ticker = config
            .tick_interval_ms
            .map(|interval| asset_loader.spawn_ticker(Duration::from_millis(interval)))
            .transpose()?;

        info!("Created content context with {} mounts", config.mounts.len());
        Ok(Self {
            ticker,
            asset_loader,
            caches,
            registry,
            path_table,
            config,
        })
    }

    fn create_package_loader(
        config: &ContentConfig,
        caches: &CacheRegistry,
        path_table: &Arc<PathTable>,
        mount: &MountConfig,
    ) -> Result<Arc<dyn PackageLoader>> {
        match (&mount.loose, &mount.cache) {
            (Some(loose), None) => Ok(Arc::new(LooseFileLoader::new(
                &loose.root,
                path_table.clone(),
                config.loader_threads,
            )?)),
            (None, Some(cache)) => {
                let source = cache
                    .source
                    .as_ref()
                    .map(|root| Arc::new(LooseFiles::new(root, path_table.clone())) as Arc<dyn RecordSource>);
                Ok(Arc::new(CachedPackageLoader::new(
                    caches.cache(&cache.name, config.platform),
                    source,
                    path_table.clone(),
                    config.loader_threads,
                )?))
            }
            _ => Err(Error::InvalidMount(
                mount.package.clone(),
                "exactly one of 'loose' and 'cache' must be set".to_owned(),
            )),
        }
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    pub fn path_table(&self) -> &Arc<PathTable> {
        &self.path_table
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn asset_loader(&self) -> &Arc<AssetLoader> {
        &self.asset_loader
    }

    pub fn caches(&self) -> &CacheRegistry {
        &self.caches
    }

    pub fn has_ticker(&self) -> bool {
        self.ticker.is_some()
    }

    /// Blocking load. See [`AssetLoader::load_object`].
    pub fn load_object(&self, path: &str) -> Result<ObjectHandle> {
        self.asset_loader.load_object(path, false)
    }

    /// Writes the objects of every cache mount that has a source into its cache.
    pub fn cook(&self) -> Result<Vec<(String, CookReport)>> {
        let mut reports = Vec::new();
        for mount in &self.config.mounts {
            let Some(cache_mount) = &mount.cache else {
                continue;
            };
            let Some(source) = &cache_mount.source else {
                info!("Skipping '{}' because the cache has no source", mount.package);
                continue;
            };
            let package = self.path_table.intern_path(&mount.package)?;
            let cache = self.caches.cache(&cache_mount.name, self.config.platform);
            let source = Arc::new(LooseFiles::new(source, self.path_table.clone()));
            let report = cook_package(&cache, source, &self.path_table, package)?;
            reports.push((mount.package.clone(), report));
        }
        Ok(reports)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.ticker.take();
        self.asset_loader.shutdown();
        if let Err(err) = self.caches.flush_all() {
            error!("Failed to flush caches: {err}");
        }
    }
}
