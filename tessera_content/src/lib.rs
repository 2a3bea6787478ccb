//! # Overview
//!
//! Crate for identifying and loading the objects of a game's content.
//!
//! Every object is addressed by a hierarchical path like `/Packages/Weapons:Rifle#2`. `/`
//! descends into a package, `:` descends into an object and `#N` selects an instance. Paths
//! are interned in the [`PathTable`], which hands out cheap [`Handle`]s that compare equal
//! exactly when the paths are equal.
//!
//! # Loading
//!
//! The [`AssetLoader`] loads objects asynchronously. Packages are served by
//! [`PackageLoader`]s that are mounted at package paths:
//!
//! - [`LooseFileLoader`] reads one YAML document per object from a directory tree.
//! - [`CachedPackageLoader`] reads bincode records from a [`Cache`] file pair and
//!   regenerates stale entries from their loose source.
//!
//! ```text
//! begin_load ─► New ─► Preloading ─► Preloaded ─► Linking ─► Linked ─► Precaching ─► Precached ─► Finalizing ─► Loaded
//!                                                                                                        └─► Error
//! ```
//!
//! References between objects become fixups in a [`Resolver`] and are written into the
//! objects once the referenced objects exist, so objects may reference each other in cycles.
//!
//! # Components
//!
//! A [`Context`] wires everything up from a [`ContentConfig`]:
//!
//! ```yaml
//! cache_directory: cache
//! mounts:
//!   - package: /Weapons
//!     loose: { root: assets }
//!   - package: /Packages
//!     cache: { name: packages, source: assets }
//! ```

mod common;
mod dispatch;

pub mod asset_loader;
pub mod cache;
pub mod cache_file;
pub mod cached_loader;
pub mod context;
pub mod loose_loader;
pub mod object;
pub mod package_loader;
pub mod path_parse;
pub mod path_table;
pub mod resolver;

pub use asset_loader::{AssetLoader, LoadStatus, ReloadEvent, RequestFlags, RequestId, RequestState, Ticker};
pub use cache::{Cache, CacheLookup, CacheRegistry, Platform};
pub use cached_loader::{cook_package, CachedPackageLoader, CookReport};
pub use common::{modified_timestamp, timestamp_millis, Error, LoadError, Result};
pub use context::{ContentConfig, Context, MountConfig};
pub use loose_loader::{LooseFileLoader, LooseFiles};
pub use object::{GenericObject, Object, ObjectHandle, ObjectIdentifier, ObjectResolver, Properties, TypeRegistry};
pub use package_loader::{ObjectRecord, PackageLoader, RecordSource};
pub use path_table::{Handle, PathError, PathTable};
pub use resolver::Resolver;
