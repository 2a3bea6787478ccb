//! Package loader that reads one YAML document per object.
//!
//! The directory layout mirrors the package hierarchy. Objects nested in objects share the
//! file name of their outer object, separated by a dot:
//!
//! ```text
//! assets/
//! ├─ Weapons/
//! │  ├─ Rifle.yaml          /Weapons:Rifle
//! │  ├─ Rifle.Scope.yaml    /Weapons:Rifle:Scope
//! │  ├─ Pistol#2.yaml       /Weapons:Pistol#2
//! ├─ Weapons.yaml           descriptor of the package /Weapons
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tessera_shared::{
    log::{info, trace, warn},
    walkdir::WalkDir,
};

use crate::{
    common::{modified_timestamp, LoadError},
    dispatch::Dispatch,
    object::{ObjectHandle, ObjectIdentifier, Properties},
    package_loader::{ObjectRecord, PackageLoader, RecordSource, ReferenceRecord, SubRequestId},
    path_parse,
    path_table::{Handle, PathTable},
    Error, Result,
};

pub const LOOSE_FILE_EXTENSION: &str = "yaml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct LooseDocument {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "serde_yaml::Mapping::is_empty")]
    references: serde_yaml::Mapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    properties: Option<serde_yaml::Value>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum LooseReference {
    Path(String),
    Typed {
        path: String,
        #[serde(rename = "type")]
        type_name: String,
    },
}

/// The files below one root directory.
pub struct LooseFiles {
    root: PathBuf,
    path_table: Arc<PathTable>,
}

impl LooseFiles {
    pub fn new(root: impl Into<PathBuf>, path_table: Arc<PathTable>) -> Self {
        Self {
            root: root.into(),
            path_table,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that stores the object at `path`.
    pub fn file_path(&self, path: Handle) -> PathBuf {
        let mut file_name = self.path_table.to_file_path_string(path);
        file_name.push('.');
        file_name.push_str(LOOSE_FILE_EXTENSION);
        self.root.join(file_name)
    }

    /// Writes `object` to its file. References are written by name as returned by `identifier`.
    pub fn save_object(&self, identifier: &dyn ObjectIdentifier, object: &ObjectHandle) -> Result<PathBuf> {
        let file_path = self.file_path(object.path());
        let identify = |other: &ObjectHandle| {
            let name = identifier.identify(other);
            if name.is_none() {
                warn!("Reference from '{}' to {other:?} can't be identified", object.path_string());
            }
            name
        };

        let (references, properties) = {
            let data = object.read();
            (data.references(), data.properties())
        };
        let mut document = LooseDocument {
            type_name: object.type_name().to_string(),
            template: object.template().and_then(|template| identify(&template)),
            owner: object.owner().and_then(|owner| identify(&owner)),
            ..Default::default()
        };
        for (field, target) in references {
            if let Some(name) = identify(&target) {
                document
                    .references
                    .insert(serde_yaml::Value::String(field), serde_yaml::Value::String(name));
            }
        }
        let properties: serde_yaml::Value = properties.deserialize()?;
        if !is_empty_value(&properties) {
            document.properties = Some(properties);
        }

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file_path, serde_yaml::to_string(&document)?)?;
        info!("Saved '{}' to {file_path:?}", object.path_string());
        Ok(file_path)
    }

    fn parse_document(&self, path_string: &str, text: &str) -> std::result::Result<ObjectRecord, LoadError> {
        let deserialization = |message: String| LoadError::Deserialization {
            path: path_string.to_owned(),
            message,
        };
        let document: LooseDocument = serde_yaml::from_str(text).map_err(|err| deserialization(err.to_string()))?;

        let mut references = Vec::with_capacity(document.references.len());
        for (field, value) in document.references {
            let Some(field) = field.as_str().map(str::to_owned) else {
                return Err(deserialization(format!("reference field {field:?} is not a string")));
            };
            let reference: LooseReference =
                serde_yaml::from_value(value).map_err(|err| deserialization(format!("reference '{field}': {err}")))?;
            references.push(match reference {
                LooseReference::Path(path) => ReferenceRecord {
                    field,
                    path,
                    expected_type: None,
                },
                LooseReference::Typed { path, type_name } => ReferenceRecord {
                    field,
                    path,
                    expected_type: Some(type_name),
                },
            });
        }

        let properties = match document.properties {
            Some(value) if !is_empty_value(&value) => {
                Properties::from_yaml(serde_yaml::to_string(&value).map_err(|err| deserialization(err.to_string()))?)
            }
            _ => Properties::default(),
        };

        Ok(ObjectRecord {
            type_name: document.type_name,
            template: document.template,
            owner: document.owner,
            timestamp: document.timestamp,
            source: document.source,
            references,
            properties,
        })
    }

    /// Interns the child described by a directory or file name below `parent`.
    fn child(&self, parent: Handle, name: &str, is_package: bool) -> Option<Handle> {
        let separator = if is_package {
            path_parse::PACKAGE_SEPARATOR
        } else {
            path_parse::OBJECT_SEPARATOR
        };
        match path_parse::parse(&format!("{separator}{name}")).as_deref() {
            Ok([element]) if path_parse::is_valid_name(&element.name) => self
                .path_table
                .intern(Some(parent), &element.name, element.instance_index, is_package)
                .ok(),
            _ => {
                warn!("Ignoring '{name}' in {:?} because it is not a valid path element", self.root);
                None
            }
        }
    }
}

fn is_empty_value(value: &serde_yaml::Value) -> bool {
    match value {
        serde_yaml::Value::Null => true,
        serde_yaml::Value::Mapping(mapping) => mapping.is_empty(),
        _ => false,
    }
}

impl RecordSource for LooseFiles {
    fn read_record(&self, path: Handle) -> std::result::Result<ObjectRecord, LoadError> {
        let path_string = self.path_table.to_string(path);
        let file_path = self.file_path(path);
        trace!("Reading '{path_string}' from {file_path:?}");
        let text = match fs::read_to_string(&file_path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(LoadError::NotFound(path_string)),
            Err(err) => {
                return Err(LoadError::Io {
                    path: path_string,
                    message: err.to_string(),
                })
            }
        };
        self.parse_document(&path_string, &text)
    }

    fn source_timestamp(&self, path: Handle) -> Option<u64> {
        let file_path = self.file_path(path);
        let file_timestamp = modified_timestamp(&file_path)?;
        // The document has to be parsed for the timestamp field and the source file.
        let record = fs::read_to_string(&file_path)
            .ok()
            .and_then(|text| self.parse_document(&self.path_table.to_string(path), &text).ok());
        let Some(record) = record else {
            return Some(file_timestamp);
        };
        let source_timestamp = record
            .source
            .as_ref()
            .and_then(|source| modified_timestamp(&self.root.join(source)))
            .unwrap_or(0);
        Some(file_timestamp.max(record.timestamp).max(source_timestamp))
    }

    fn enumerate_children(&self, path: Handle) -> Result<Vec<Handle>> {
        let mut children = Vec::new();
        if self.path_table.is_package(path) {
            let directory = self.root.join(self.path_table.to_file_path_string(path));
            if !directory.is_dir() {
                return Ok(children);
            }
            for entry in WalkDir::new(&directory).min_depth(1).max_depth(1).sort_by_file_name() {
                let entry = entry.map_err(|err| Error::Other(Box::new(err)))?;
                let Some(name) = entry.file_name().to_str() else {
                    continue;
                };
                if entry.file_type().is_dir() {
                    children.extend(self.child(path, name, true));
                    continue;
                }
                let Some(stem) = name.strip_suffix(&format!(".{LOOSE_FILE_EXTENSION}")) else {
                    continue;
                };
                // A document next to a directory of the same name describes the package.
                if stem.contains('.') || directory.join(stem).is_dir() {
                    continue;
                }
                children.extend(self.child(path, stem, false));
            }
        } else {
            let file_path = self.file_path(path);
            let (Some(directory), Some(stem)) = (file_path.parent(), file_path.file_stem().and_then(|stem| stem.to_str())) else {
                return Ok(children);
            };
            if !directory.is_dir() {
                return Ok(children);
            }
            let prefix = format!("{stem}.");
            for entry in WalkDir::new(directory).min_depth(1).max_depth(1).sort_by_file_name() {
                let entry = entry.map_err(|err| Error::Other(Box::new(err)))?;
                let Some(name) = entry.file_name().to_str() else {
                    continue;
                };
                let nested = name
                    .strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(&format!(".{LOOSE_FILE_EXTENSION}")));
                match nested {
                    Some(child) if entry.file_type().is_file() && !child.contains('.') => {
                        children.extend(self.child(path, child, false));
                    }
                    _ => {}
                }
            }
        }
        Ok(children)
    }
}

/// [`PackageLoader`] for a directory of loose documents.
pub struct LooseFileLoader {
    files: Arc<LooseFiles>,
    dispatch: Dispatch,
}

impl LooseFileLoader {
    /// Creates a loader for the documents below `root`. `thread_count` worker threads read
    /// the files; with zero threads the files are read in [`PackageLoader::tick`].
    pub fn new(root: impl Into<PathBuf>, path_table: Arc<PathTable>, thread_count: usize) -> Result<Self> {
        let files = Arc::new(LooseFiles::new(root, path_table));
        info!("Creating LooseFileLoader for {:?}", files.root());
        let dispatch = Dispatch::new(format!("LooseFileLoader({})", files.root().display()), thread_count)?;
        Ok(Self { files, dispatch })
    }

    pub fn files(&self) -> &Arc<LooseFiles> {
        &self.files
    }

    pub fn save_object(&self, identifier: &dyn ObjectIdentifier, object: &ObjectHandle) -> Result<PathBuf> {
        self.files.save_object(identifier, object)
    }
}

impl PackageLoader for LooseFileLoader {
    fn name(&self) -> String {
        format!("LooseFileLoader({})", self.files.root().display())
    }

    fn begin_load_object(&self, path: Handle) -> SubRequestId {
        let files = self.files.clone();
        self.dispatch.submit(Box::new(move || files.read_record(path)))
    }

    fn try_finish_load_object(&self, id: SubRequestId) -> Option<std::result::Result<ObjectRecord, LoadError>> {
        self.dispatch.try_take(id)
    }

    fn cancel_load_object(&self, id: SubRequestId) {
        self.dispatch.cancel(id);
    }

    fn enumerate_children(&self, path: Handle) -> Result<Vec<Handle>> {
        self.files.enumerate_children(path)
    }

    fn tick(&self) {
        self.dispatch.tick();
    }
}
