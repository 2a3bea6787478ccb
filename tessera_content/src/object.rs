//! Live objects produced by the [`AssetLoader`](crate::asset_loader::AssetLoader) and the
//! registry that knows how to construct them.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
    task::Poll,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tessera_shared::{
    log::trace,
    parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::path_table::Handle;

/// Name under which a type is registered in the [`TypeRegistry`].
pub type TypeName = Arc<str>;

/// Gives access to the concrete type behind a `dyn Object`.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Behaviour that the loader needs from every loadable type. All hooks have defaults so
/// that plain data types only have to implement the trait.
pub trait Object: AsAny + Send + Sync {
    /// Stores the resolved object of the reference field `field`. `None` when the referenced
    /// object failed to load.
    fn set_reference(&mut self, field: &str, value: Option<ObjectHandle>) {
        trace!("Ignoring reference field '{field}' ({value:?})");
    }

    /// Returns the reference fields that are written when the object is saved.
    fn references(&self) -> Vec<(String, ObjectHandle)> {
        Vec::new()
    }

    /// Returns the properties that are written when the object is saved.
    fn properties(&self) -> Properties {
        Properties::default()
    }

    /// Streaming resources go through the precache phase.
    fn is_streaming_resource(&self) -> bool {
        false
    }

    fn begin_precache(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Polled until the resource creation started by [`Object::begin_precache`] completes.
    fn poll_precache(&mut self) -> Poll<Result<(), String>> {
        Poll::Ready(Ok(()))
    }

    /// Called once all references have been resolved.
    fn post_load(&mut self) {}
}

/// Serialized, type specific data of an object. The registry hands it to the factory of the
/// object's type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties {
    yaml: String,
}

impl Default for Properties {
    fn default() -> Self {
        Self { yaml: "{}".to_owned() }
    }
}

impl Properties {
    pub fn from_yaml(yaml: impl Into<String>) -> Self {
        let yaml = yaml.into();
        if yaml.trim().is_empty() {
            return Self::default();
        }
        Self { yaml }
    }

    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, serde_yaml::Error> {
        serde_yaml::to_string(value).map(Self::from_yaml)
    }

    pub fn as_yaml(&self) -> &str {
        &self.yaml
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_yaml::Error> {
        serde_yaml::from_str(&self.yaml)
    }
}

struct ObjectCell {
    path: Handle,
    path_string: String,
    type_name: TypeName,
    template: RwLock<Option<ObjectHandle>>,
    owner: RwLock<Option<ObjectHandle>>,
    data: RwLock<Box<dyn Object>>,
}

/// Shared handle to a live object. Two handles are equal when they refer to the same object.
#[derive(Clone)]
pub struct ObjectHandle(Arc<ObjectCell>);

impl ObjectHandle {
    pub fn new(path: Handle, path_string: impl Into<String>, type_name: TypeName, data: Box<dyn Object>) -> Self {
        Self(Arc::new(ObjectCell {
            path,
            path_string: path_string.into(),
            type_name,
            template: RwLock::new(None),
            owner: RwLock::new(None),
            data: RwLock::new(data),
        }))
    }

    pub fn path(&self) -> Handle {
        self.0.path
    }

    pub fn path_string(&self) -> &str {
        &self.0.path_string
    }

    pub fn type_name(&self) -> &TypeName {
        &self.0.type_name
    }

    pub fn template(&self) -> Option<ObjectHandle> {
        self.0.template.read().clone()
    }

    pub fn owner(&self) -> Option<ObjectHandle> {
        self.0.owner.read().clone()
    }

    pub(crate) fn set_template(&self, template: Option<ObjectHandle>) {
        *self.0.template.write() = template;
    }

    pub(crate) fn set_owner(&self, owner: Option<ObjectHandle>) {
        *self.0.owner.write() = owner;
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<dyn Object>> {
        self.0.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Box<dyn Object>> {
        self.0.data.write()
    }

    /// Returns the object as `T` or `None` if it has another type.
    pub fn read_as<T: Object + 'static>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.0.data.read(), |data| {
            let object: &dyn Object = &**data;
            object.as_any().downcast_ref::<T>()
        })
        .ok()
    }

    /// Returns the object as `T` or `None` if it has another type.
    pub fn write_as<T: Object + 'static>(&self) -> Option<MappedRwLockWriteGuard<'_, T>> {
        RwLockWriteGuard::try_map(self.0.data.write(), |data| {
            let object: &mut dyn Object = &mut **data;
            object.as_any_mut().downcast_mut::<T>()
        })
        .ok()
    }

    pub fn ptr_eq(&self, other: &ObjectHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectHandle {}

impl Hash for ObjectHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({}: {})", self.0.path_string, self.0.type_name)
    }
}

/// Binds the named reference fields of an object to other objects.
pub trait ObjectResolver {
    /// Requests that `field` is set to the object at `path` once it is addressable. Returns
    /// `false` when the reference can't be resolved at all.
    fn resolve(&mut self, path: &str, field: &str, expected_type: Option<&str>) -> bool;
}

/// Maps live objects back to their names so that references can be written out.
pub trait ObjectIdentifier {
    fn identify(&self, object: &ObjectHandle) -> Option<String>;
}

/// Object used for types without a registered factory. It keeps the properties and
/// references so that saving it reproduces the input.
#[derive(Debug, Default)]
pub struct GenericObject {
    pub properties: Properties,
    pub references: BTreeMap<String, Option<ObjectHandle>>,
}

impl Object for GenericObject {
    fn set_reference(&mut self, field: &str, value: Option<ObjectHandle>) {
        self.references.insert(field.to_owned(), value);
    }

    fn references(&self) -> Vec<(String, ObjectHandle)> {
        self.references
            .iter()
            .filter_map(|(field, value)| value.clone().map(|value| (field.clone(), value)))
            .collect()
    }

    fn properties(&self) -> Properties {
        self.properties.clone()
    }
}

pub type Factory = dyn Fn(&Properties) -> Result<Box<dyn Object>, String> + Send + Sync;

struct TypeInfo {
    base: Option<TypeName>,
    factory: Box<Factory>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateError {
    UnknownType(String),
    InvalidProperties(String),
}

/// Registered types and how to construct them from [`Properties`].
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<TypeName, TypeInfo>,
    fallback: bool,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the type `name` with a custom factory.
    ///
    /// # Panics
    ///
    /// If a type with the same name is already registered.
    ///
    /// # Example
    ///
    /// ```
    /// use tessera_content::object::{GenericObject, Object, Properties, TypeRegistry};
    /// fn folder(_properties: &Properties) -> Result<Box<dyn Object>, String> {
    ///     Ok(Box::new(GenericObject::default()))
    /// }
    /// let registry = TypeRegistry::new().register("Folder", Box::new(folder));
    /// assert!(registry.contains("Folder"));
    /// ```
    pub fn register(mut self, name: impl Into<TypeName>, factory: Box<Factory>) -> Self {
        let name = name.into();
        if self.types.contains_key(&name) {
            panic!("type '{name}' already registered");
        }
        self.types.insert(name, TypeInfo { base: None, factory });
        self
    }

    /// Registers `T` under `name`. Objects are created by deserializing the properties into `T`.
    pub fn register_type<T>(self, name: impl Into<TypeName>) -> Self
    where
        T: Object + DeserializeOwned + 'static,
    {
        self.register(
            name,
            Box::new(|properties| {
                properties
                    .deserialize::<T>()
                    .map(|value| Box::new(value) as Box<dyn Object>)
                    .map_err(|err| err.to_string())
            }),
        )
    }

    /// Declares `base` as the base type of the already registered type `name`.
    ///
    /// # Panics
    ///
    /// If `name` is not registered.
    pub fn with_base(mut self, name: &str, base: impl Into<TypeName>) -> Self {
        let Some(info) = self.types.get_mut(name) else {
            panic!("type '{name}' is not registered");
        };
        info.base = Some(base.into());
        self
    }

    /// Creates a [`GenericObject`] for types that are not registered instead of failing.
    pub fn with_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Returns the canonical shared name of the type or `None` if it is unknown.
    pub fn type_name(&self, name: &str) -> Option<TypeName> {
        self.types.get_key_value(name).map(|(name, _)| name.clone())
    }

    /// Returns whether `name` is `expected` or derives from it.
    pub fn is_a(&self, name: &str, expected: &str) -> bool {
        let mut current = Some(name);
        // A base chain longer than the number of types must contain a cycle.
        for _ in 0..=self.types.len() {
            let Some(name) = current else {
                return false;
            };
            if name == expected {
                return true;
            }
            current = self.types.get(name).and_then(|info| info.base.as_deref());
        }
        false
    }

    pub fn create(&self, type_name: &str, properties: &Properties) -> Result<Box<dyn Object>, CreateError> {
        match self.types.get(type_name) {
            Some(info) => (info.factory)(properties).map_err(CreateError::InvalidProperties),
            None if self.fallback => Ok(Box::new(GenericObject {
                properties: properties.clone(),
                references: BTreeMap::new(),
            })),
            None => Err(CreateError::UnknownType(type_name.to_owned())),
        }
    }
}
