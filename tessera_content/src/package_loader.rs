use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{common::LoadError, object::Properties, path_table::Handle, Result};

/// Identifies one load of a [`PackageLoader`]. Only meaningful for the loader that returned it.
pub type SubRequestId = u64;

/// Serialized form of one object as it is stored by a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub type_name: String,
    pub template: Option<String>,
    pub owner: Option<String>,
    /// Revision of the object metadata in milliseconds since the UNIX epoch.
    pub timestamp: u64,
    /// Source art file of resource types, relative to the package root.
    pub source: Option<PathBuf>,
    pub references: Vec<ReferenceRecord>,
    pub properties: Properties,
}

/// Named reference field of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub field: String,
    pub path: String,
    pub expected_type: Option<String>,
}

/// Supplies the objects of the packages it is mounted at.
///
/// Loads are asynchronous: [`PackageLoader::begin_load_object`] returns immediately and
/// [`PackageLoader::try_finish_load_object`] is polled until it yields the result. Loaders
/// that do their I/O inline do so in [`PackageLoader::tick`].
pub trait PackageLoader: Send + Sync {
    /// Short description used in log messages.
    fn name(&self) -> String;

    fn begin_load_object(&self, path: Handle) -> SubRequestId;

    /// Returns `None` while the load is in flight. The result is handed out once.
    fn try_finish_load_object(&self, id: SubRequestId) -> Option<std::result::Result<ObjectRecord, LoadError>>;

    /// Called for a load whose result won't be taken anymore. Loaders that keep results until
    /// they are taken drop them here.
    fn cancel_load_object(&self, id: SubRequestId);

    /// Paths of the packages and objects directly contained in `path`.
    fn enumerate_children(&self, path: Handle) -> Result<Vec<Handle>>;

    fn tick(&self) {}
}

/// Synchronous access to the authoritative copy of objects, e.g. the loose files a cache
/// is generated from.
pub trait RecordSource: Send + Sync {
    fn read_record(&self, path: Handle) -> std::result::Result<ObjectRecord, LoadError>;

    /// Current timestamp of the object. Changes whenever the object or its source art changes.
    fn source_timestamp(&self, path: Handle) -> Option<u64>;

    fn enumerate_children(&self, path: Handle) -> Result<Vec<Handle>>;
}
