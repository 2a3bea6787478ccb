//! Interning of hierarchical asset paths.
//!
//! Every distinct path is backed by exactly one [`Entry`] in a [`PathTable`]. The entry
//! refers to its parent by [`Handle`], so two paths are equal if and only if their handles
//! are equal, which makes comparing and hashing paths O(1).
//!
//! Entries live in an append-only arena owned by the table and are only released when the
//! whole table is dropped. Lookups go through a fixed number of buckets, each guarded by its
//! own reader/writer lock, so that threads interning unrelated paths rarely contend.

use std::{
    fmt,
    hash::{BuildHasher, Hash, Hasher},
    path::MAIN_SEPARATOR,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, OnceLock,
    },
};

use tessera_shared::{
    ahash::{HashSet, HashSetExt, RandomState},
    parking_lot::RwLock,
    thiserror,
};

use crate::path_parse::{self, ParseError, PathElement, INVALID_INSTANCE, OBJECT_SEPARATOR, PACKAGE_SEPARATOR};

pub const DEFAULT_BUCKET_COUNT: usize = 1024;

static NEXT_TABLE_ID: AtomicU32 = AtomicU32::new(0);

/// Identifies one interned path of one [`PathTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    table: u32,
    index: u32,
}

impl Handle {
    /// Position of the entry in the arena of its table.
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Canonical record behind a [`Handle`].
#[derive(Debug)]
pub struct Entry {
    parent: Option<Handle>,
    name: Arc<str>,
    instance_index: Option<u32>,
    is_package: bool,
    content_hash: u64,
    depth: u32,
}

impl Entry {
    pub fn parent(&self) -> Option<Handle> {
        self.parent
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn instance_index(&self) -> Option<u32> {
        self.instance_index
    }

    pub fn is_package(&self) -> bool {
        self.is_package
    }

    /// Hash over the fields of this entry and, transitively, over all of its ancestors.
    pub fn content_hash(&self) -> u64 {
        self.content_hash
    }

    /// Number of ancestors of this entry.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn matches(&self, content_hash: u64, parent: Option<Handle>, name: &str, instance_index: Option<u32>, is_package: bool) -> bool {
        self.content_hash == content_hash
            && self.parent == parent
            && self.instance_index == instance_index
            && self.is_package == is_package
            && &*self.name == name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Cannot join '{sub}' onto '{root}': packages cannot be placed inside of objects")]
    PackageUnderObject { root: String, sub: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error("'{0}' is not a valid path element name")]
    InvalidName(String),
    #[error("Instance index {0} is reserved")]
    ReservedInstance(u32),
    #[error("Package '{name}' cannot be placed inside of object '{parent}'")]
    PackageUnderObject { parent: String, name: String },
}

/// Number of slots in the first chunk of an [`EntryArena`]. Every further chunk doubles.
const FIRST_CHUNK_LEN: u64 = 64;

/// Enough chunks to address every `u32` index.
const CHUNK_COUNT: usize = 27;

/// Append-only storage of the entries. Indices are reserved atomically and chunks are
/// allocated on first use, so pushing and reading never block each other.
struct EntryArena {
    len: AtomicU32,
    chunks: [OnceLock<Box<[OnceLock<Arc<Entry>>]>>; CHUNK_COUNT],
}

impl EntryArena {
    fn new() -> Self {
        Self {
            len: AtomicU32::new(0),
            chunks: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    /// Chunk and offset within the chunk of `index`.
    fn locate(index: u32) -> (usize, usize) {
        let n = index as u64 / FIRST_CHUNK_LEN + 1;
        let chunk = (63 - n.leading_zeros()) as usize;
        let offset = index as u64 + FIRST_CHUNK_LEN - (FIRST_CHUNK_LEN << chunk);
        (chunk, offset as usize)
    }

    /// Returns `None` when every index is taken.
    fn push(&self, entry: Arc<Entry>) -> Option<u32> {
        let index = self
            .len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| len.checked_add(1))
            .ok()?;
        let (chunk, offset) = Self::locate(index);
        let slots = self.chunks[chunk].get_or_init(|| {
            let len = (FIRST_CHUNK_LEN << chunk) as usize;
            (0..len).map(|_| OnceLock::new()).collect()
        });
        if slots[offset].set(entry).is_err() {
            unreachable!("index {index} was handed out twice");
        }
        Some(index)
    }

    fn get(&self, index: u32) -> Option<&Arc<Entry>> {
        let (chunk, offset) = Self::locate(index);
        self.chunks[chunk].get()?.get(offset)?.get()
    }

    /// Number of reserved indices.
    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire) as usize
    }
}

/// Hash-consing table of hierarchical paths.
pub struct PathTable {
    id: u32,
    hash_builder: RandomState,
    buckets: Box<[RwLock<Vec<u32>>]>,
    entries: EntryArena,
    names: RwLock<HashSet<Arc<str>>>,
}

impl Default for PathTable {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_COUNT)
    }
}

impl PathTable {
    /// Creates an empty table with `bucket_count` lookup buckets.
    ///
    /// # Panics
    ///
    /// If `bucket_count` is zero.
    pub fn new(bucket_count: usize) -> Self {
        assert!(bucket_count > 0, "a PathTable needs at least one bucket");
        let buckets = (0..bucket_count).map(|_| RwLock::new(Vec::new())).collect::<Vec<_>>();
        Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            hash_builder: RandomState::new(),
            buckets: buckets.into_boxed_slice(),
            entries: EntryArena::new(),
            names: RwLock::new(HashSet::new()),
        }
    }

    /// Returns the unique handle for the given fields, creating the entry if necessary.
    ///
    /// # Example
    ///
    /// ```
    /// use tessera_content::path_table::PathTable;
    /// let table = PathTable::default();
    /// let weapons = table.intern(None, "Weapons", None, true).unwrap();
    /// let rifle = table.intern(Some(weapons), "Rifle", Some(2), false).unwrap();
    /// assert_eq!(rifle, table.intern(Some(weapons), "Rifle", Some(2), false).unwrap());
    /// assert_eq!(table.to_string(rifle), "/Weapons:Rifle#2");
    /// ```
    pub fn intern(&self, parent: Option<Handle>, name: &str, instance_index: Option<u32>, is_package: bool) -> Result<Handle, PathError> {
        if !path_parse::is_valid_name(name) {
            return Err(PathError::InvalidName(name.to_owned()));
        }
        if instance_index == Some(INVALID_INSTANCE) {
            return Err(PathError::ReservedInstance(INVALID_INSTANCE));
        }
        if let Some(parent) = parent {
            if is_package && !self.entry(parent).is_package() {
                return Err(PathError::PackageUnderObject {
                    parent: self.to_string(parent),
                    name: name.to_owned(),
                });
            }
        }
        Ok(self.intern_checked(parent, name, instance_index, is_package))
    }

    /// Parses `text` and interns every element of it.
    ///
    /// # Example
    ///
    /// ```
    /// use tessera_content::path_table::PathTable;
    /// let table = PathTable::default();
    /// let handle = table.intern_path("/Packages/Weapons:Rifle#2").unwrap();
    /// assert_eq!(table.to_string(handle), "/Packages/Weapons:Rifle#2");
    /// assert!(table.intern_path("Weapons:Rifle#2").is_err());
    /// ```
    pub fn intern_path(&self, text: &str) -> Result<Handle, PathError> {
        let elements = path_parse::parse(text)?;
        Ok(self.intern_elements(None, &elements))
    }

    /// Interns parsed elements below `parent`. The elements must stem from [`path_parse::parse`]
    /// or be otherwise known to form a valid chain.
    fn intern_elements(&self, parent: Option<Handle>, elements: &[PathElement]) -> Handle {
        let mut current = parent;
        for element in elements {
            current = Some(self.intern_checked(current, &element.name, element.instance_index, element.is_package));
        }
        current.expect("parsed paths contain at least one element")
    }

    /// Returns the handle for the given fields when it has been interned before.
    pub fn find(&self, parent: Option<Handle>, name: &str, instance_index: Option<u32>, is_package: bool) -> Option<Handle> {
        let content_hash = self.content_hash(parent, name, instance_index, is_package);
        let bucket = self.buckets[self.bucket_index(content_hash)].read();
        self.find_in_bucket(&bucket, content_hash, parent, name, instance_index, is_package)
    }

    fn intern_checked(&self, parent: Option<Handle>, name: &str, instance_index: Option<u32>, is_package: bool) -> Handle {
        let content_hash = self.content_hash(parent, name, instance_index, is_package);
        let bucket_index = self.bucket_index(content_hash);

        let bucket = self.buckets[bucket_index].read();
        if let Some(handle) = self.find_in_bucket(&bucket, content_hash, parent, name, instance_index, is_package) {
            return handle;
        }
        drop(bucket);

        // Another thread might have inserted the same entry between releasing the read lock
        // and acquiring the write lock.
        let mut bucket = self.buckets[bucket_index].write();
        if let Some(handle) = self.find_in_bucket(&bucket, content_hash, parent, name, instance_index, is_package) {
            return handle;
        }

        let depth = parent.map(|parent| self.entry(parent).depth() + 1).unwrap_or(0);
        let entry = Arc::new(Entry {
            parent,
            name: self.intern_name(name),
            instance_index,
            is_package,
            content_hash,
            depth,
        });

        // The entry is fully built before it becomes reachable through the arena and the bucket.
        let Some(index) = self.entries.push(entry) else {
            panic!("the PathTable is full");
        };
        bucket.push(index);

        Handle { table: self.id, index }
    }

    fn find_in_bucket(
        &self,
        bucket: &[u32],
        content_hash: u64,
        parent: Option<Handle>,
        name: &str,
        instance_index: Option<u32>,
        is_package: bool,
    ) -> Option<Handle> {
        bucket
            .iter()
            .find(|index| {
                self.entries
                    .get(**index)
                    .is_some_and(|entry| entry.matches(content_hash, parent, name, instance_index, is_package))
            })
            .map(|index| Handle {
                table: self.id,
                index: *index,
            })
    }

    fn intern_name(&self, name: &str) -> Arc<str> {
        if let Some(name) = self.names.read().get(name) {
            return name.clone();
        }
        let mut names = self.names.write();
        if let Some(name) = names.get(name) {
            return name.clone();
        }
        let name: Arc<str> = Arc::from(name);
        names.insert(name.clone());
        name
    }

    fn content_hash(&self, parent: Option<Handle>, name: &str, instance_index: Option<u32>, is_package: bool) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        parent.map(|parent| self.entry(parent).content_hash()).hash(&mut hasher);
        name.hash(&mut hasher);
        instance_index.hash(&mut hasher);
        is_package.hash(&mut hasher);
        hasher.finish()
    }

    fn bucket_index(&self, content_hash: u64) -> usize {
        (content_hash % self.buckets.len() as u64) as usize
    }

    /// Returns the entry behind `handle`.
    ///
    /// # Panics
    ///
    /// If `handle` was created by another table.
    pub fn entry(&self, handle: Handle) -> Arc<Entry> {
        assert_eq!(handle.table, self.id, "handle {handle:?} belongs to another PathTable");
        match self.entries.get(handle.index) {
            Some(entry) => entry.clone(),
            None => panic!("handle {handle:?} has no entry"),
        }
    }

    pub fn parent(&self, handle: Handle) -> Option<Handle> {
        self.entry(handle).parent()
    }

    pub fn name(&self, handle: Handle) -> Arc<str> {
        self.entry(handle).name().clone()
    }

    pub fn instance_index(&self, handle: Handle) -> Option<u32> {
        self.entry(handle).instance_index()
    }

    pub fn is_package(&self, handle: Handle) -> bool {
        self.entry(handle).is_package()
    }

    /// Returns whether `handle` was created by this table.
    pub fn owns(&self, handle: Handle) -> bool {
        handle.table == self.id
    }

    /// Returns the entries from the root down to and including `handle`.
    pub fn chain(&self, handle: Handle) -> Vec<Arc<Entry>> {
        let mut chain = Vec::new();
        let mut current = Some(handle);
        while let Some(handle) = current {
            let entry = self.entry(handle);
            current = entry.parent();
            chain.push(entry);
        }
        chain.reverse();
        chain
    }

    /// Returns `handle` itself or its closest ancestor that is a package.
    pub fn package_of(&self, handle: Handle) -> Option<Handle> {
        let mut current = Some(handle);
        while let Some(handle) = current {
            let entry = self.entry(handle);
            if entry.is_package() {
                return Some(handle);
            }
            current = entry.parent();
        }
        None
    }

    /// Returns whether `ancestor` is `handle` or one of its ancestors.
    pub fn is_within(&self, handle: Handle, ancestor: Handle) -> bool {
        let mut current = Some(handle);
        while let Some(handle) = current {
            if handle == ancestor {
                return true;
            }
            current = self.parent(handle);
        }
        false
    }

    /// Reconstructs the textual path.
    pub fn to_string(&self, handle: Handle) -> String {
        let mut text = String::new();
        for entry in self.chain(handle) {
            text.push(if entry.is_package() { PACKAGE_SEPARATOR } else { OBJECT_SEPARATOR });
            push_name(&mut text, &entry);
        }
        text
    }

    /// Reconstructs the path as a relative file path. Package boundaries become directory
    /// separators and object boundaries become dots.
    ///
    /// # Example
    ///
    /// ```
    /// use tessera_content::path_table::PathTable;
    /// let table = PathTable::default();
    /// let handle = table.intern_path("/Packages/Weapons:Rifle:Scope#2").unwrap();
    /// let expected = format!("Packages{0}Weapons{0}Rifle.Scope#2", std::path::MAIN_SEPARATOR);
    /// assert_eq!(table.to_file_path_string(handle), expected);
    /// ```
    pub fn to_file_path_string(&self, handle: Handle) -> String {
        let mut text = String::new();
        let mut parent_is_package = None;
        for entry in self.chain(handle) {
            match parent_is_package {
                Some(true) => text.push(MAIN_SEPARATOR),
                Some(false) => text.push('.'),
                None => {}
            }
            push_name(&mut text, &entry);
            parent_is_package = Some(entry.is_package());
        }
        text
    }

    /// Appends the elements of `sub` below `root`.
    ///
    /// # Example
    ///
    /// ```
    /// use tessera_content::path_table::PathTable;
    /// let table = PathTable::default();
    /// let root = table.intern_path("/Packages").unwrap();
    /// let sub = table.intern_path("/Weapons:Rifle").unwrap();
    /// let joined = table.join(root, sub).unwrap();
    /// assert_eq!(joined, table.intern_path("/Packages/Weapons:Rifle").unwrap());
    /// ```
    pub fn join(&self, root: Handle, sub: Handle) -> Result<Handle, JoinError> {
        let chain = self.chain(sub);
        let root_is_object = !self.is_package(root);
        if root_is_object && chain.first().is_some_and(|entry| entry.is_package()) {
            return Err(JoinError::PackageUnderObject {
                root: self.to_string(root),
                sub: self.to_string(sub),
            });
        }
        let mut current = root;
        for entry in chain {
            current = self.intern_checked(Some(current), entry.name(), entry.instance_index(), entry.is_package());
        }
        Ok(current)
    }

    /// Number of interned entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a value that formats `handle` like [`PathTable::to_string`].
    pub fn display(&self, handle: Handle) -> PathDisplay<'_> {
        PathDisplay { table: self, handle }
    }
}

fn push_name(text: &mut String, entry: &Entry) {
    text.push_str(entry.name());
    if let Some(instance_index) = entry.instance_index() {
        text.push(path_parse::INSTANCE_SEPARATOR);
        text.push_str(&instance_index.to_string());
    }
}

pub struct PathDisplay<'a> {
    table: &'a PathTable,
    handle: Handle,
}

impl fmt::Display for PathDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.table.to_string(self.handle))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use super::*;

    #[test]
    fn interning_is_unique() {
        let table = PathTable::new(4);
        let a = table.intern_path("/Packages/Weapons:Rifle#2").unwrap();
        let b = table.intern_path("/Packages/Weapons:Rifle#2").unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 3);

        let packages = table.intern(None, "Packages", None, true).unwrap();
        let weapons = table.intern(Some(packages), "Weapons", None, true).unwrap();
        let c = table.intern(Some(weapons), "Rifle", Some(2), false).unwrap();
        assert_eq!(a, c);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn different_fields_give_different_handles() {
        let table = PathTable::new(1);
        let package = table.intern_path("/Weapons/Rifle").unwrap();
        let object = table.intern_path("/Weapons:Rifle").unwrap();
        let instance = table.intern_path("/Weapons:Rifle#0").unwrap();
        assert_ne!(package, object);
        assert_ne!(object, instance);
        assert_eq!(table.parent(package), table.parent(object));
    }

    #[test]
    fn concurrent_interning() {
        const THREADS: usize = 8;
        let table = Arc::new(PathTable::new(16));
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles = (0..THREADS)
            .map(|_| {
                let table = table.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    (0..64)
                        .map(|i| table.intern_path(&format!("/Packages/P{}:Object#{i}", i % 4)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        let results = handles.into_iter().map(|handle| handle.join().unwrap()).collect::<Vec<_>>();
        for result in &results[1..] {
            assert_eq!(result, &results[0]);
        }
        // "Packages" + 4 packages + 64 objects
        assert_eq!(table.len(), 1 + 4 + 64);
    }

    #[test]
    fn arena_chunks_cover_all_indices() {
        assert_eq!(EntryArena::locate(0), (0, 0));
        assert_eq!(EntryArena::locate(63), (0, 63));
        assert_eq!(EntryArena::locate(64), (1, 0));
        assert_eq!(EntryArena::locate(191), (1, 127));
        assert_eq!(EntryArena::locate(192), (2, 0));
        assert_eq!(EntryArena::locate(u32::MAX), (CHUNK_COUNT - 1, 63));
    }

    #[test]
    fn concurrent_interning_across_chunks() {
        // Given
        const THREADS: usize = 8;
        let table = Arc::new(PathTable::new(64));
        let barrier = Arc::new(Barrier::new(THREADS));

        // When
        let handles = (0..THREADS)
            .map(|thread_index| {
                let table = table.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    (0..200)
                        .map(|i| {
                            let path = format!("/T{thread_index}:Object#{i}");
                            (table.intern_path(&path).unwrap(), path)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        let results = handles.into_iter().flat_map(|handle| handle.join().unwrap()).collect::<Vec<_>>();

        // Then
        assert_eq!(table.len(), THREADS + THREADS * 200);
        for (handle, path) in results {
            assert_eq!(table.to_string(handle), path);
            assert_eq!(table.intern_path(&path).unwrap(), handle);
        }
    }

    #[test]
    fn round_trip() {
        let table = PathTable::default();
        for text in [
            "/Packages/Weapons:Rifle#2",
            ":Settings",
            "/Types:Render::Mesh",
            "/A:::B",
            "/A#3:B:C#0",
            "/Weapons/Rifle",
        ] {
            let handle = table.intern_path(text).unwrap();
            let printed = table.to_string(handle);
            assert_eq!(printed, text);
            assert_eq!(table.intern_path(&printed).unwrap(), handle);
            assert_eq!(format!("{}", table.display(handle)), text);
        }
    }

    #[test]
    fn file_path_string() {
        let table = PathTable::default();
        let handle = table.intern_path("/Packages/Weapons:Rifle#2").unwrap();
        assert_eq!(
            table.to_file_path_string(handle),
            format!("Packages{MAIN_SEPARATOR}Weapons{MAIN_SEPARATOR}Rifle#2")
        );
        let handle = table.intern_path(":A:B").unwrap();
        assert_eq!(table.to_file_path_string(handle), "A.B");
    }

    #[test]
    fn package_under_object_is_rejected() {
        let table = PathTable::default();
        let object = table.intern_path("/Weapons:Rifle").unwrap();
        assert!(matches!(
            table.intern(Some(object), "Scopes", None, true),
            Err(PathError::PackageUnderObject { .. })
        ));
        assert!(table.intern(Some(object), "Scope", None, false).is_ok());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let table = PathTable::default();
        assert_eq!(table.intern(None, "", None, true), Err(PathError::InvalidName(String::new())));
        assert!(table.intern(None, "A/B", None, true).is_err());
        assert!(table.intern(None, "A:B", None, true).is_err());
        assert!(table.intern(None, "A", Some(INVALID_INSTANCE), true).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn join() {
        let table = PathTable::default();
        let root = table.intern_path("/Packages").unwrap();
        let sub = table.intern_path("/Weapons:Rifle#2").unwrap();
        let joined = table.join(root, sub).unwrap();
        assert_eq!(table.to_string(joined), "/Packages/Weapons:Rifle#2");

        let object_root = table.intern_path("/Packages:Manifest").unwrap();
        let sub_object = table.intern_path(":Entry").unwrap();
        let joined = table.join(object_root, sub_object).unwrap();
        assert_eq!(table.to_string(joined), "/Packages:Manifest:Entry");
    }

    #[test]
    fn join_package_under_object() {
        let table = PathTable::default();
        let root = table.intern_path("/Packages:Manifest").unwrap();
        let sub = table.intern_path("/Weapons").unwrap();
        assert_eq!(
            table.join(root, sub),
            Err(JoinError::PackageUnderObject {
                root: "/Packages:Manifest".to_owned(),
                sub: "/Weapons".to_owned()
            })
        );
    }

    #[test]
    fn package_of_and_is_within() {
        let table = PathTable::default();
        let rifle = table.intern_path("/Packages/Weapons:Rifle:Scope").unwrap();
        let weapons = table.intern_path("/Packages/Weapons").unwrap();
        let packages = table.intern_path("/Packages").unwrap();
        assert_eq!(table.package_of(rifle), Some(weapons));
        assert_eq!(table.package_of(weapons), Some(weapons));
        assert!(table.is_within(rifle, packages));
        assert!(!table.is_within(packages, rifle));
        assert_eq!(table.package_of(table.intern_path(":Loose").unwrap()), None);
        assert_eq!(table.entry(rifle).depth(), 3);
    }

    #[test]
    fn content_hash_includes_parent() {
        let table = PathTable::default();
        let a = table.intern_path("/A:Same").unwrap();
        let b = table.intern_path("/B:Same").unwrap();
        assert_ne!(table.entry(a).content_hash(), table.entry(b).content_hash());
        assert!(Arc::ptr_eq(table.entry(a).name(), table.entry(b).name()));
    }

    #[test]
    fn find() {
        let table = PathTable::default();
        assert_eq!(table.find(None, "Weapons", None, true), None);
        let weapons = table.intern_path("/Weapons").unwrap();
        assert_eq!(table.find(None, "Weapons", None, true), Some(weapons));
    }

    #[test]
    #[should_panic]
    fn foreign_handle() {
        let table1 = PathTable::default();
        let table2 = PathTable::default();
        let handle = table1.intern_path("/A").unwrap();
        table2.entry(handle);
    }
}
