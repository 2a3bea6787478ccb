//! Deferred reference fixups of a single load request.
//!
//! While an object is linked, its reference fields name other objects that may not exist
//! yet. Every such field is recorded as a fixup against the request loading the referenced
//! object. The fixups are applied in recording order once all of those requests reached
//! [`RequestState::Preloaded`](crate::asset_loader::RequestState::Preloaded) or failed.

use std::{collections::HashMap, fmt};

use tessera_shared::log::{trace, warn};

use crate::{
    asset_loader::RequestId,
    common::LoadError,
    object::{Object, ObjectHandle, TypeName, TypeRegistry},
};

/// Writes a resolved reference into the object that is being loaded.
pub type FieldSetter = Box<dyn FnOnce(&mut dyn Object, Option<ObjectHandle>) + Send>;

struct Fixup {
    field: String,
    expected_type: Option<TypeName>,
    dependency: RequestId,
    /// Taken when the fixup is applied.
    setter: Option<FieldSetter>,
    applied: bool,
}

/// What a dependency resolved to when the fixups are applied.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The dependency is addressable.
    Object(ObjectHandle),
    /// The dependency failed to load.
    Failed,
}

#[derive(Default)]
pub struct Resolver {
    fixups: Vec<Fixup>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `field` has to be set through [`Object::set_reference`] to the object
    /// of the request `dependency`.
    pub fn record_fixup(&mut self, field: impl Into<String>, expected_type: Option<TypeName>, dependency: RequestId) {
        let field = field.into();
        let reference_field = field.clone();
        let setter: FieldSetter =
            Box::new(move |object: &mut dyn Object, value: Option<ObjectHandle>| object.set_reference(&reference_field, value));
        self.record_fixup_with(field, expected_type, dependency, setter);
    }

    /// Records that `setter` writes the object of the request `dependency` into the object
    /// being loaded. `field` names the fixup in log messages and errors.
    pub fn record_fixup_with(
        &mut self,
        field: impl Into<String>,
        expected_type: Option<TypeName>,
        dependency: RequestId,
        setter: FieldSetter,
    ) {
        let field = field.into();
        trace!("Recording fixup for field '{field}' on request {dependency:?}");
        self.fixups.push(Fixup {
            field,
            expected_type,
            dependency,
            setter: Some(setter),
            applied: false,
        });
    }

    /// Requests whose objects are referenced by pending fixups.
    pub fn dependencies(&self) -> impl Iterator<Item = RequestId> + '_ {
        self.fixups.iter().filter(|fixup| !fixup.applied).map(|fixup| fixup.dependency)
    }

    /// Returns whether every dependency is addressable or failed. `is_ready` answers that
    /// question for a single request.
    pub fn ready_to_apply_fixups(&self, mut is_ready: impl FnMut(RequestId) -> bool) -> bool {
        self.dependencies().all(|dependency| is_ready(dependency))
    }

    /// Writes the resolved objects into `target` in recording order. Every fixup is applied
    /// at most once, so calling this again only applies fixups recorded in between.
    ///
    /// Returns the type mismatches. The affected fields are left untouched.
    pub fn apply_fixups(
        &mut self,
        target: &ObjectHandle,
        resolutions: &HashMap<RequestId, Resolution>,
        registry: &TypeRegistry,
    ) -> Vec<LoadError> {
        let mut mismatches = Vec::new();
        let mut object = target.write();
        for fixup in self.fixups.iter_mut().filter(|fixup| !fixup.applied) {
            fixup.applied = true;
            let value = match resolutions.get(&fixup.dependency) {
                Some(Resolution::Object(object)) => Some(object.clone()),
                Some(Resolution::Failed) => None,
                None => {
                    warn!(
                        "Fixup for field '{}' of '{}' has no resolution for request {:?}",
                        fixup.field,
                        target.path_string(),
                        fixup.dependency
                    );
                    None
                }
            };
            if let (Some(value), Some(expected)) = (&value, &fixup.expected_type) {
                if !registry.is_a(value.type_name(), expected) {
                    let mismatch = LoadError::TypeMismatch {
                        path: target.path_string().to_owned(),
                        field: fixup.field.clone(),
                        expected: expected.to_string(),
                        actual: value.type_name().to_string(),
                    };
                    warn!("{mismatch}");
                    mismatches.push(mismatch);
                    continue;
                }
            }
            trace!("Applying fixup for field '{}' of '{}'", fixup.field, target.path_string());
            if let Some(setter) = fixup.setter.take() {
                setter(&mut **object, value);
            }
        }
        mismatches
    }

    /// Drops all fixups without applying them.
    pub fn clear(&mut self) {
        self.fixups.clear();
    }

    pub fn len(&self) -> usize {
        self.fixups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixups.is_empty()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fixups.iter().map(|fixup| (&fixup.field, fixup.dependency, fixup.applied)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use tessera_shared::IndexingContainer;

    use super::*;
    use crate::{
        asset_loader::Request,
        object::{GenericObject, Properties},
        path_table::PathTable,
    };

    fn generic(_properties: &Properties) -> Result<Box<dyn Object>, String> {
        Ok(Box::<GenericObject>::default())
    }

    struct Fixture {
        table: PathTable,
        registry: TypeRegistry,
        ids: IndexingContainer<Request>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                table: PathTable::default(),
                registry: TypeRegistry::new()
                    .with_fallback()
                    .register("Weapon", Box::new(generic))
                    .register("Rifle", Box::new(generic))
                    .with_base("Rifle", "Weapon")
                    .register("Ammo", Box::new(generic)),
                ids: IndexingContainer::new(),
            }
        }

        fn object(&self, path: &str, type_name: &str) -> ObjectHandle {
            ObjectHandle::new(
                self.table.intern_path(path).unwrap(),
                path,
                Arc::from(type_name),
                Box::<GenericObject>::default(),
            )
        }

        fn request_id(&mut self, path: &str) -> RequestId {
            let handle = self.table.intern_path(path).unwrap();
            self.ids.insert(Request::new(handle, path.to_owned(), false))
        }
    }

    fn reference(object: &ObjectHandle, field: &str) -> Option<Option<ObjectHandle>> {
        object.read_as::<GenericObject>().unwrap().references.get(field).cloned()
    }

    #[test]
    fn ready_only_when_all_dependencies_are_ready() {
        // Given
        let mut fixture = Fixture::new();
        let a = fixture.request_id("/P:A");
        let b = fixture.request_id("/P:B");
        let mut resolver = Resolver::new();
        resolver.record_fixup("a", None, a);
        resolver.record_fixup("b", None, b);

        // Then
        assert!(!resolver.ready_to_apply_fixups(|id| id == a));
        assert!(resolver.ready_to_apply_fixups(|_| true));
        assert!(Resolver::new().ready_to_apply_fixups(|_| false));
    }

    #[test]
    fn apply_sets_references() {
        // Given
        let mut fixture = Fixture::new();
        let target = fixture.object("/P:Target", "Weapon");
        let ammo = fixture.object("/P:Ammo", "Ammo");
        let ammo_id = fixture.request_id("/P:Ammo");
        let missing_id = fixture.request_id("/P:Missing");
        let mut resolver = Resolver::new();
        resolver.record_fixup("ammo", Some(Arc::from("Ammo")), ammo_id);
        resolver.record_fixup("missing", None, missing_id);
        let resolutions = HashMap::from([(ammo_id, Resolution::Object(ammo.clone())), (missing_id, Resolution::Failed)]);

        // When
        let mismatches = resolver.apply_fixups(&target, &resolutions, &fixture.registry);

        // Then
        assert!(mismatches.is_empty());
        assert_eq!(reference(&target, "ammo"), Some(Some(ammo)));
        assert_eq!(reference(&target, "missing"), Some(None));
    }

    #[test]
    fn type_mismatch_leaves_field_untouched() {
        // Given
        let mut fixture = Fixture::new();
        let target = fixture.object("/P:Target", "Weapon");
        let ammo = fixture.object("/P:Ammo", "Ammo");
        let rifle = fixture.object("/P:Rifle", "Rifle");
        let ammo_id = fixture.request_id("/P:Ammo");
        let rifle_id = fixture.request_id("/P:Rifle");
        let mut resolver = Resolver::new();
        resolver.record_fixup("sidearm", Some(Arc::from("Weapon")), ammo_id);
        resolver.record_fixup("primary", Some(Arc::from("Weapon")), rifle_id);
        let resolutions = HashMap::from([(ammo_id, Resolution::Object(ammo)), (rifle_id, Resolution::Object(rifle.clone()))]);

        // When
        let mismatches = resolver.apply_fixups(&target, &resolutions, &fixture.registry);

        // Then
        assert_eq!(mismatches.len(), 1);
        assert!(matches!(&mismatches[0], LoadError::TypeMismatch { field, .. } if field == "sidearm"));
        assert_eq!(reference(&target, "sidearm"), None);
        assert_eq!(reference(&target, "primary"), Some(Some(rifle)));
    }

    #[test]
    fn apply_twice_is_a_noop() {
        // Given
        let mut fixture = Fixture::new();
        let target = fixture.object("/P:Target", "Weapon");
        let first = fixture.object("/P:First", "Ammo");
        let stale = fixture.object("/P:Stale", "Ammo");
        let id = fixture.request_id("/P:First");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut resolver = Resolver::new();
        resolver.record_fixup("ammo", None, id);
        resolver.record_fixup_with(
            "counted",
            None,
            id,
            Box::new(move |_: &mut dyn Object, _: Option<ObjectHandle>| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // When
        resolver.apply_fixups(&target, &HashMap::from([(id, Resolution::Object(first.clone()))]), &fixture.registry);
        resolver.apply_fixups(&target, &HashMap::from([(id, Resolution::Object(stale))]), &fixture.registry);

        // Then
        assert_eq!(reference(&target, "ammo"), Some(Some(first)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.dependencies().count(), 0);
    }

    #[test]
    fn fixups_are_applied_in_recording_order() {
        // Given
        let mut fixture = Fixture::new();
        let target = fixture.object("/P:Target", "Weapon");
        let a = fixture.object("/P:A", "Ammo");
        let b = fixture.object("/P:B", "Ammo");
        let a_id = fixture.request_id("/P:A");
        let b_id = fixture.request_id("/P:B");
        let mut resolver = Resolver::new();
        resolver.record_fixup("slot", None, a_id);
        resolver.record_fixup("slot", None, b_id);
        let resolutions = HashMap::from([(a_id, Resolution::Object(a)), (b_id, Resolution::Object(b.clone()))]);

        // When
        resolver.apply_fixups(&target, &resolutions, &fixture.registry);

        // Then
        assert_eq!(reference(&target, "slot"), Some(Some(b)));
    }

    #[test]
    fn clear_drops_fixups() {
        let mut fixture = Fixture::new();
        let id = fixture.request_id("/P:A");
        let mut resolver = Resolver::new();
        resolver.record_fixup("a", None, id);
        assert_eq!(resolver.len(), 1);
        resolver.clear();
        assert!(resolver.is_empty());
        assert_eq!(resolver.dependencies().count(), 0);
    }
}
