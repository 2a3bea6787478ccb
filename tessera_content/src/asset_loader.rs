//! Asynchronous loading of objects by path.
//!
//! Every path that is being loaded has one [`Request`]. Requests move strictly forward through
//! the phases
//!
//! ```text
//! New → Preloading → Preloaded → Linking → Linked → Precaching → Precached → Finalizing → Loaded
//! ```
//!
//! or end in [`RequestState::Error`]. Progress only happens in [`AssetLoader::tick`], which
//! advances every request by at most one step. [`AssetLoader::begin_load`] and
//! [`AssetLoader::try_finish_load`] never block.
//!
//! Objects become addressable in `Preloaded`. References between objects are recorded as
//! fixups in the [`Resolver`] of the request and are applied in `Finalizing` once every
//! referenced request is addressable, so cyclic references don't dead-lock.

use std::{
    collections::HashMap,
    fmt, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::Poll,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tessera_shared::{
    bitflags::bitflags,
    crossbeam_channel::{self, Receiver, Sender},
    log::{error, info, trace, warn},
    parking_lot::{Mutex, MutexGuard, RwLock},
    spin_sleep, IndexingContainer,
};

use crate::{
    common::LoadError,
    object::{CreateError, ObjectHandle, ObjectIdentifier, ObjectResolver, TypeName, TypeRegistry},
    package_loader::{ObjectRecord, PackageLoader, SubRequestId},
    path_table::{Handle, PathError, PathTable},
    resolver::{Resolution, Resolver},
    Error, Result,
};

pub type RequestId = tessera_shared::Handle<Request>;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    New,
    Preloading,
    Preloaded,
    Linking,
    Linked,
    Precaching,
    Precached,
    Finalizing,
    Loaded,
    Error(LoadError),
}

impl RequestState {
    /// Position in the phase order. `Error` comes after every other state.
    pub fn ordinal(&self) -> u8 {
        match self {
            RequestState::New => 0,
            RequestState::Preloading => 1,
            RequestState::Preloaded => 2,
            RequestState::Linking => 3,
            RequestState::Linked => 4,
            RequestState::Precaching => 5,
            RequestState::Precached => 6,
            RequestState::Finalizing => 7,
            RequestState::Loaded => 8,
            RequestState::Error(_) => u8::MAX,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Loaded | RequestState::Error(_))
    }

    /// Whether references to the request's object can be resolved, either to the object or,
    /// for failed requests, to nothing.
    pub fn is_addressable(&self) -> bool {
        self.ordinal() >= RequestState::Preloaded.ordinal()
    }

    pub fn name(&self) -> &'static str {
        match self {
            RequestState::New => "New",
            RequestState::Preloading => "Preloading",
            RequestState::Preloaded => "Preloaded",
            RequestState::Linking => "Linking",
            RequestState::Linked => "Linked",
            RequestState::Precaching => "Precaching",
            RequestState::Precached => "Precached",
            RequestState::Finalizing => "Finalizing",
            RequestState::Loaded => "Loaded",
            RequestState::Error(_) => "Error",
        }
    }

    fn reached_flags(&self) -> RequestFlags {
        match self.ordinal() {
            8 => RequestFlags::PRELOADED | RequestFlags::LINKED | RequestFlags::PRECACHED | RequestFlags::LOADED,
            6..=7 => RequestFlags::PRELOADED | RequestFlags::LINKED | RequestFlags::PRECACHED,
            4..=5 => RequestFlags::PRELOADED | RequestFlags::LINKED,
            2..=3 => RequestFlags::PRELOADED,
            u8::MAX => RequestFlags::ERROR,
            _ => RequestFlags::empty(),
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Phases a request went through. Apart from `IN_TICK` bits are never removed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestFlags: u32 {
        const PRELOADED = 1 << 0;
        const LINKED = 1 << 1;
        const PRECACHED = 1 << 2;
        const LOADED = 1 << 3;
        const ERROR = 1 << 4;
        const PRECACHE_STARTED = 1 << 5;
        const IN_TICK = 1 << 6;
    }
}

/// Bookkeeping of one load of one path.
pub struct Request {
    path: Handle,
    path_string: String,
    state: RequestState,
    flags: RequestFlags,
    ref_count: usize,
    force_reload: bool,
    package_loader: Option<Arc<dyn PackageLoader>>,
    sub_request: Option<SubRequestId>,
    record: Option<ObjectRecord>,
    object: Option<ObjectHandle>,
    template: Option<RequestId>,
    owner: Option<RequestId>,
    resolver: Resolver,
    /// Reference fields that couldn't be set because the referenced object has another type.
    fixup_errors: Vec<LoadError>,
    /// Requests this request holds a reference on until it is done.
    dependencies: Vec<RequestId>,
}

impl Request {
    pub(crate) fn new(path: Handle, path_string: String, force_reload: bool) -> Self {
        Self {
            path,
            path_string,
            state: RequestState::New,
            flags: RequestFlags::empty(),
            ref_count: 1,
            force_reload,
            package_loader: None,
            sub_request: None,
            record: None,
            object: None,
            template: None,
            owner: None,
            resolver: Resolver::new(),
            fixup_errors: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn path(&self) -> Handle {
        self.path
    }

    pub fn path_string(&self) -> &str {
        &self.path_string
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn flags(&self) -> RequestFlags {
        self.flags
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn is_force_reload(&self) -> bool {
        self.force_reload
    }

    pub fn fixup_errors(&self) -> &[LoadError] {
        &self.fixup_errors
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("path", &self.path_string)
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("ref_count", &self.ref_count)
            .finish()
    }
}

/// Result of [`AssetLoader::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Pending(RequestState),
    Loaded(ObjectHandle),
    Failed(LoadError),
}

/// Sent to observers when a forced reload replaced an object.
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    pub path: Handle,
    pub previous: ObjectHandle,
    pub current: ObjectHandle,
}

struct Mount {
    package: Handle,
    loader: Arc<dyn PackageLoader>,
}

#[derive(Default)]
struct LoaderState {
    requests: IndexingContainer<Request>,
    by_path: HashMap<Handle, RequestId>,
    loaded: HashMap<Handle, ObjectHandle>,
}

enum Step {
    Stay,
    Advance(RequestState),
    Fail(LoadError),
}

pub struct AssetLoader {
    path_table: Arc<PathTable>,
    registry: Arc<TypeRegistry>,
    mounts: RwLock<Vec<Mount>>,
    state: Mutex<LoaderState>,
    observers: Mutex<Vec<Sender<ReloadEvent>>>,
    poll_interval: Duration,
    load_timeout: Option<Duration>,
}

impl AssetLoader {
    pub fn new(path_table: Arc<PathTable>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            path_table,
            registry,
            mounts: RwLock::new(Vec::new()),
            state: Mutex::new(LoaderState::default()),
            observers: Mutex::new(Vec::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            load_timeout: None,
        }
    }

    /// Sleep between two polls of [`AssetLoader::load_object`].
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Upper bound for [`AssetLoader::load_object`].
    pub fn with_load_timeout(mut self, load_timeout: Option<Duration>) -> Self {
        self.load_timeout = load_timeout;
        self
    }

    pub fn path_table(&self) -> &Arc<PathTable> {
        &self.path_table
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Makes `loader` responsible for `package` and everything below it that is not covered
    /// by a more specific mount. Replaces a previous mount at the same package.
    pub fn mount(&self, package: Handle, loader: Arc<dyn PackageLoader>) {
        info!("Mounting {} at '{}'", loader.name(), self.path_table.display(package));
        let mut mounts = self.mounts.write();
        mounts.retain(|mount| mount.package != package);
        mounts.push(Mount { package, loader });
    }

    pub fn unmount(&self, package: Handle) -> bool {
        let mut mounts = self.mounts.write();
        let count = mounts.len();
        mounts.retain(|mount| mount.package != package);
        count != mounts.len()
    }

    /// The loader of the closest mount containing `path`.
    pub fn package_loader_for(&self, path: Handle) -> Option<Arc<dyn PackageLoader>> {
        self.mounts
            .read()
            .iter()
            .filter(|mount| self.path_table.is_within(path, mount.package))
            .max_by_key(|mount| self.path_table.entry(mount.package).depth())
            .map(|mount| mount.loader.clone())
    }

    /// Starts loading `path`. When a request for the path exists, its reference count is
    /// incremented and it is returned instead.
    ///
    /// With `force_reload` a path whose load has finished is read again. The previous object
    /// is replaced once the new one is loaded.
    pub fn begin_load(&self, path: &str, force_reload: bool) -> std::result::Result<RequestId, PathError> {
        let path = self.path_table.intern_path(path)?;
        Ok(self.begin_load_handle(path, force_reload))
    }

    pub fn begin_load_handle(&self, path: Handle, force_reload: bool) -> RequestId {
        let mut state = self.state.lock();
        self.begin_load_locked(&mut state, path, force_reload)
    }

    fn begin_load_locked(&self, state: &mut LoaderState, path: Handle, force_reload: bool) -> RequestId {
        if let Some(id) = state.by_path.get(&path).copied() {
            if let Some(request) = state.requests.get_mut(&id) {
                if !(force_reload && request.state.is_terminal()) {
                    request.ref_count += 1;
                    request.force_reload |= force_reload;
                    trace!("Joining request {id:?} for '{}' ({} refs)", request.path_string, request.ref_count);
                    return id;
                }
                // The finished request stays alive for its holders but the path gets a new one.
                trace!("Detaching finished request {id:?} for '{}'", request.path_string);
            }
            state.by_path.remove(&path);
        }
        let path_string = self.path_table.to_string(path);
        trace!("Creating request for '{path_string}'");
        let id = state.requests.insert(Request::new(path, path_string, force_reload));
        state.by_path.insert(path, id);
        id
    }

    /// Returns the object once the request is loaded. Doesn't release the request.
    pub fn try_finish_load(&self, id: RequestId) -> Option<ObjectHandle> {
        let state = self.state.lock();
        let request = state.requests.get(&id)?;
        match request.state {
            RequestState::Loaded => request.object.clone(),
            _ => None,
        }
    }

    /// Returns `None` for unknown requests.
    pub fn poll(&self, id: RequestId) -> Option<LoadStatus> {
        let state = self.state.lock();
        let request = state.requests.get(&id)?;
        Some(match (&request.state, &request.object) {
            (RequestState::Loaded, Some(object)) => LoadStatus::Loaded(object.clone()),
            (RequestState::Error(err), _) => LoadStatus::Failed(err.clone()),
            (state, _) => LoadStatus::Pending(state.clone()),
        })
    }

    /// Drops one reference to the request. The request is destroyed once it has no references
    /// and is done.
    pub fn release(&self, id: RequestId) {
        let mut state = self.state.lock();
        self.release_locked(&mut state, id);
    }

    /// Returns the result and releases the request once it is done. Returns `None` while the
    /// request is pending or when it is unknown.
    pub fn finish_load(&self, id: RequestId) -> Option<std::result::Result<ObjectHandle, LoadError>> {
        let mut state = self.state.lock();
        let request = state.requests.get(&id)?;
        let result = match (&request.state, &request.object) {
            (RequestState::Loaded, Some(object)) => Ok(object.clone()),
            (RequestState::Error(err), _) => Err(err.clone()),
            _ => return None,
        };
        self.release_locked(&mut state, id);
        Some(result)
    }

    /// Loads `path` on the calling thread by ticking until the request is done.
    pub fn load_object(&self, path: &str, force_reload: bool) -> Result<ObjectHandle> {
        let id = self.begin_load(path, force_reload)?;
        let start = Instant::now();
        loop {
            self.tick();
            if let Some(result) = self.finish_load(id) {
                return Ok(result?);
            }
            if let Some(timeout) = self.load_timeout {
                if start.elapsed() > timeout {
                    self.release(id);
                    return Err(Error::Timeout(timeout, path.to_owned()));
                }
            }
            spin_sleep::sleep(self.poll_interval);
        }
    }

    pub fn find_loaded(&self, path: Handle) -> Option<ObjectHandle> {
        self.state.lock().loaded.get(&path).cloned()
    }

    /// Forgets the loaded object of `path` so that the next load reads it again.
    pub fn unload(&self, path: Handle) -> Option<ObjectHandle> {
        self.state.lock().loaded.remove(&path)
    }

    pub fn find_request(&self, path: Handle) -> Option<RequestId> {
        self.state.lock().by_path.get(&path).copied()
    }

    pub fn request_state(&self, id: RequestId) -> Option<RequestState> {
        self.state.lock().requests.get(&id).map(|request| request.state.clone())
    }

    pub fn request_flags(&self, id: RequestId) -> Option<RequestFlags> {
        self.state.lock().requests.get(&id).map(|request| request.flags)
    }

    /// Reference fields of the request that were left empty because of a type mismatch.
    pub fn fixup_errors(&self, id: RequestId) -> Option<Vec<LoadError>> {
        self.state.lock().requests.get(&id).map(|request| request.fixup_errors.clone())
    }

    pub fn ref_count(&self, id: RequestId) -> Option<usize> {
        self.state.lock().requests.get(&id).map(|request| request.ref_count)
    }

    /// Number of live requests.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Number of requests that are not done yet.
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|(_, request)| !request.state.is_terminal())
            .count()
    }

    /// Children of `path` as reported by the package loader responsible for it.
    pub fn enumerate_children(&self, path: Handle) -> Result<Vec<Handle>> {
        let Some(loader) = self.package_loader_for(path) else {
            return Err(LoadError::MissingPackageLoader(self.path_table.to_string(path)).into());
        };
        loader.enumerate_children(path)
    }

    /// Returns a channel that receives a [`ReloadEvent`] whenever a forced reload replaced
    /// an object.
    pub fn observe(&self) -> Receiver<ReloadEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.observers.lock().push(sender);
        receiver
    }

    /// Advances every request by at most one step.
    pub fn tick(&self) {
        let loaders = self
            .mounts
            .read()
            .iter()
            .map(|mount| mount.loader.clone())
            .collect::<Vec<_>>();
        for loader in &loaders {
            loader.tick();
        }

        let ids = self.state.lock().requests.handles();
        for id in ids {
            self.step(id);
        }
    }

    fn step(&self, id: RequestId) {
        let mut guard = self.state.lock();
        let Some(request) = guard.requests.get(&id) else {
            return;
        };
        if request.flags.contains(RequestFlags::IN_TICK) {
            return;
        }
        let step = match request.state.clone() {
            RequestState::New => self.step_new(&mut guard, id),
            RequestState::Preloading => self.step_preloading(&mut guard, id),
            RequestState::Preloaded => self.step_preloaded(&mut guard, id),
            RequestState::Linking => self.step_linking(&guard, id),
            RequestState::Linked => self.step_linked(&mut guard, id),
            RequestState::Precaching => self.step_precaching(&mut guard, id),
            RequestState::Precached => self.step_precached(&guard, id),
            RequestState::Finalizing => self.step_finalizing(&mut guard, id),
            RequestState::Loaded | RequestState::Error(_) => Step::Stay,
        };
        match step {
            Step::Stay => {}
            Step::Advance(next) => self.transition(&mut guard, id, next),
            Step::Fail(err) => self.fail(&mut guard, id, err),
        }
        self.destroy_if_unused(&mut guard, id);
    }

    fn step_new(&self, state: &mut LoaderState, id: RequestId) -> Step {
        let Some(request) = state.requests.get_mut(&id) else {
            return Step::Stay;
        };
        if !request.force_reload {
            if let Some(object) = state.loaded.get(&request.path) {
                trace!("'{}' is already loaded", request.path_string);
                request.object = Some(object.clone());
                return Step::Advance(RequestState::Loaded);
            }
        }
        let Some(loader) = self.package_loader_for(request.path) else {
            return Step::Fail(LoadError::MissingPackageLoader(request.path_string.clone()));
        };
        request.sub_request = Some(loader.begin_load_object(request.path));
        request.package_loader = Some(loader);
        Step::Advance(RequestState::Preloading)
    }

    fn step_preloading(&self, state: &mut LoaderState, id: RequestId) -> Step {
        let Some(request) = state.requests.get_mut(&id) else {
            return Step::Stay;
        };
        let (Some(loader), Some(sub_request)) = (&request.package_loader, request.sub_request) else {
            return Step::Fail(LoadError::MissingPackageLoader(request.path_string.clone()));
        };
        let record = match loader.try_finish_load_object(sub_request) {
            None => return Step::Stay,
            Some(result) => result,
        };
        request.package_loader = None;
        request.sub_request = None;
        let record = match record {
            Ok(record) => record,
            Err(err) => return Step::Fail(err),
        };
        match self.instantiate(request.path, &request.path_string, &record) {
            Ok(object) => {
                request.object = Some(object);
                request.record = Some(record);
                Step::Advance(RequestState::Preloaded)
            }
            Err(err) => Step::Fail(err),
        }
    }

    fn instantiate(&self, path: Handle, path_string: &str, record: &ObjectRecord) -> std::result::Result<ObjectHandle, LoadError> {
        let data = self
            .registry
            .create(&record.type_name, &record.properties)
            .map_err(|err| match err {
                CreateError::UnknownType(type_name) => LoadError::UnknownType {
                    path: path_string.to_owned(),
                    type_name,
                },
                CreateError::InvalidProperties(message) => LoadError::Deserialization {
                    path: path_string.to_owned(),
                    message,
                },
            })?;
        let type_name = self
            .registry
            .type_name(&record.type_name)
            .unwrap_or_else(|| TypeName::from(record.type_name.as_str()));
        Ok(ObjectHandle::new(path, path_string, type_name, data))
    }

    fn step_preloaded(&self, state: &mut LoaderState, id: RequestId) -> Step {
        let Some(request) = state.requests.get_mut(&id) else {
            return Step::Stay;
        };
        let Some(record) = request.record.take() else {
            return Step::Advance(RequestState::Linking);
        };
        let path_string = request.path_string.clone();
        let mut resolver = mem::take(&mut request.resolver);
        let mut dependencies = mem::take(&mut request.dependencies);

        let mut link = |link_path: Option<&String>, role: &str, state: &mut LoaderState| -> std::result::Result<Option<RequestId>, LoadError> {
            let Some(link_path) = link_path else {
                return Ok(None);
            };
            let handle = self.path_table.intern_path(link_path).map_err(|err| LoadError::Deserialization {
                path: path_string.clone(),
                message: format!("invalid {role} path '{link_path}': {err}"),
            })?;
            let dependency = self.begin_load_locked(state, handle, false);
            dependencies.push(dependency);
            Ok(Some(dependency))
        };
        let linked = link(record.template.as_ref(), "template", state)
            .and_then(|template| link(record.owner.as_ref(), "owner", state).map(|owner| (template, owner)));

        let (template, owner) = match linked {
            Ok(linked) => linked,
            Err(err) => {
                if let Some(request) = state.requests.get_mut(&id) {
                    request.dependencies = dependencies;
                }
                return Step::Fail(err);
            }
        };

        let mut linker = RequestLinker {
            loader: self,
            state,
            resolver: &mut resolver,
            dependencies: &mut dependencies,
            requester: &path_string,
        };
        for reference in &record.references {
            linker.resolve(&reference.path, &reference.field, reference.expected_type.as_deref());
        }

        let Some(request) = state.requests.get_mut(&id) else {
            return Step::Stay;
        };
        request.template = template;
        request.owner = owner;
        request.resolver = resolver;
        request.dependencies = dependencies;
        Step::Advance(RequestState::Linking)
    }

    fn step_linking(&self, state: &LoaderState, id: RequestId) -> Step {
        let Some(request) = state.requests.get(&id) else {
            return Step::Stay;
        };
        let links = [request.template, request.owner];
        if !links.iter().flatten().all(|dependency| Self::is_addressable(state, *dependency)) {
            return Step::Stay;
        }
        let Some(object) = request.object.clone() else {
            return Step::Advance(RequestState::Linked);
        };
        let [template, owner] = links.map(|link| {
            link.and_then(|dependency| match Self::resolution(state, dependency) {
                Resolution::Object(object) => Some(object),
                Resolution::Failed => {
                    warn!("Link of '{}' failed to load", object.path_string());
                    None
                }
            })
        });
        object.set_template(template);
        object.set_owner(owner);
        Step::Advance(RequestState::Linked)
    }

    /// Starts the precache of streaming resources. Like all object hooks, `begin_precache`
    /// runs without holding the lock.
    fn step_linked(&self, guard: &mut MutexGuard<'_, LoaderState>, id: RequestId) -> Step {
        let Some(request) = guard.requests.get(&id) else {
            return Step::Stay;
        };
        let Some(object) = request.object.clone() else {
            return Step::Advance(RequestState::Precached);
        };
        if !object.read().is_streaming_resource() {
            return Step::Advance(RequestState::Precached);
        }
        trace!("Beginning precache of '{}'", request.path_string);
        let Some(started) = self.run_hook(guard, id, || object.write().begin_precache()) else {
            return Step::Stay;
        };
        let Some(request) = guard.requests.get_mut(&id) else {
            return Step::Stay;
        };
        if let Err(message) = started {
            return Step::Fail(LoadError::Precache {
                path: request.path_string.clone(),
                message,
            });
        }
        request.flags |= RequestFlags::PRECACHE_STARTED;
        Step::Advance(RequestState::Precaching)
    }

    fn step_precaching(&self, guard: &mut MutexGuard<'_, LoaderState>, id: RequestId) -> Step {
        let Some(request) = guard.requests.get(&id) else {
            return Step::Stay;
        };
        let Some(object) = request.object.clone() else {
            return Step::Advance(RequestState::Precached);
        };
        let Some(poll) = self.run_hook(guard, id, || object.write().poll_precache()) else {
            return Step::Stay;
        };
        match poll {
            Poll::Pending => Step::Stay,
            Poll::Ready(Ok(())) => Step::Advance(RequestState::Precached),
            Poll::Ready(Err(message)) => Step::Fail(LoadError::Precache {
                path: object.path_string().to_owned(),
                message,
            }),
        }
    }

    fn step_precached(&self, state: &LoaderState, id: RequestId) -> Step {
        let Some(request) = state.requests.get(&id) else {
            return Step::Stay;
        };
        if request
            .resolver
            .ready_to_apply_fixups(|dependency| Self::is_addressable(state, dependency))
        {
            Step::Advance(RequestState::Finalizing)
        } else {
            Step::Stay
        }
    }

    /// Applies the fixups and runs the post load hook without holding the lock, so that the
    /// object's hooks can use the loader.
    fn step_finalizing(&self, guard: &mut MutexGuard<'_, LoaderState>, id: RequestId) -> Step {
        let state: &LoaderState = guard;
        let resolutions = match state.requests.get(&id) {
            Some(request) => request
                .resolver
                .dependencies()
                .map(|dependency| (dependency, Self::resolution(state, dependency)))
                .collect::<HashMap<_, _>>(),
            None => return Step::Stay,
        };
        let Some(request) = guard.requests.get_mut(&id) else {
            return Step::Stay;
        };
        let Some(object) = request.object.clone() else {
            return Step::Fail(LoadError::NotFound(request.path_string.clone()));
        };
        let mut resolver = mem::take(&mut request.resolver);

        let hooks = self.run_hook(guard, id, || {
            let mismatches = resolver.apply_fixups(&object, &resolutions, &self.registry);
            object.write().post_load();
            mismatches
        });
        let Some(mismatches) = hooks else {
            return Step::Stay;
        };

        let state: &mut LoaderState = guard;
        let Some(request) = state.requests.get_mut(&id) else {
            return Step::Stay;
        };
        request.resolver = resolver;
        request.fixup_errors = mismatches;

        let path = request.path;
        if let Some(previous) = state.loaded.insert(path, object.clone()) {
            if !previous.ptr_eq(&object) {
                info!("Replaced '{}' after reload", object.path_string());
                self.notify(ReloadEvent {
                    path,
                    previous,
                    current: object,
                });
            }
        }
        Step::Advance(RequestState::Loaded)
    }

    /// Runs an object hook without holding the lock, so that the hook can use the loader.
    /// The request is skipped by other ticks meanwhile. Returns `None` when the request was
    /// discarded while the hook ran.
    fn run_hook<R>(&self, guard: &mut MutexGuard<'_, LoaderState>, id: RequestId, hook: impl FnOnce() -> R) -> Option<R> {
        let request = guard.requests.get_mut(&id)?;
        let phase = request.state.clone();
        request.flags |= RequestFlags::IN_TICK;

        let result = MutexGuard::unlocked(guard, hook);

        let request = guard.requests.get_mut(&id)?;
        request.flags.remove(RequestFlags::IN_TICK);
        if request.state != phase {
            trace!("'{}' was discarded while {phase}", request.path_string);
            return None;
        }
        Some(result)
    }

    fn notify(&self, event: ReloadEvent) {
        let mut observers = self.observers.lock();
        observers.retain(|sender| match sender.send(event.clone()) {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to send ReloadEvent: \"{err}\". Channel will be removed.");
                false
            }
        });
    }

    fn is_addressable(state: &LoaderState, id: RequestId) -> bool {
        state
            .requests
            .get(&id)
            .map(|request| request.state.is_addressable())
            .unwrap_or(true)
    }

    /// What references to the request `id` resolve to. A failed reload resolves to the
    /// previously loaded object.
    fn resolution(state: &LoaderState, id: RequestId) -> Resolution {
        let Some(request) = state.requests.get(&id) else {
            return Resolution::Failed;
        };
        match (&request.state, &request.object) {
            (RequestState::Error(_), _) => state
                .loaded
                .get(&request.path)
                .cloned()
                .map(Resolution::Object)
                .unwrap_or(Resolution::Failed),
            (_, Some(object)) => Resolution::Object(object.clone()),
            (_, None) => Resolution::Failed,
        }
    }

    fn transition(&self, state: &mut LoaderState, id: RequestId, next: RequestState) {
        let Some(request) = state.requests.get_mut(&id) else {
            return;
        };
        debug_assert!(next.ordinal() > request.state.ordinal(), "requests only move forward");
        trace!("'{}': {} -> {}", request.path_string, request.state, next);
        request.flags |= next.reached_flags();
        request.state = next;
        if request.state == RequestState::Loaded {
            request.record = None;
            let dependencies = mem::take(&mut request.dependencies);
            for dependency in dependencies {
                self.release_locked(state, dependency);
            }
        }
    }

    fn fail(&self, state: &mut LoaderState, id: RequestId, err: LoadError) {
        let Some(request) = state.requests.get_mut(&id) else {
            return;
        };
        error!("Failed to load '{}' in phase {}: {err}", request.path_string, request.state);
        request.flags |= RequestFlags::ERROR;
        request.state = RequestState::Error(err);
        request.resolver.clear();
        request.record = None;
        if let (Some(loader), Some(sub_request)) = (request.package_loader.take(), request.sub_request.take()) {
            trace!("Cancelling load {sub_request} of '{}' in '{}'", request.path_string, loader.name());
            loader.cancel_load_object(sub_request);
        }
        let dependencies = mem::take(&mut request.dependencies);
        for dependency in dependencies {
            self.release_locked(state, dependency);
        }
    }

    fn release_locked(&self, state: &mut LoaderState, id: RequestId) {
        let Some(request) = state.requests.get_mut(&id) else {
            warn!("Releasing unknown request {id:?}");
            return;
        };
        if request.ref_count == 0 {
            warn!("Request for '{}' was released more often than it was begun", request.path_string);
        }
        request.ref_count = request.ref_count.saturating_sub(1);
        self.destroy_if_unused(state, id);
    }

    fn destroy_if_unused(&self, state: &mut LoaderState, id: RequestId) {
        let unused = state
            .requests
            .get(&id)
            .is_some_and(|request| request.ref_count == 0 && request.state.is_terminal());
        if !unused {
            return;
        }
        if let Some(request) = state.requests.remove(&id) {
            trace!("Destroying request for '{}'", request.path_string);
            if state.by_path.get(&request.path) == Some(&id) {
                state.by_path.remove(&request.path);
            }
        }
    }

    /// Starts a thread that calls [`AssetLoader::tick`] every `interval` until the returned
    /// [`Ticker`] is dropped.
    pub fn spawn_ticker(self: &Arc<Self>, interval: Duration) -> Result<Ticker> {
        let wants_drop = Arc::new(AtomicBool::new(false));
        let wants_drop2 = wants_drop.clone();
        let loader = self.clone();
        let thread = thread::Builder::new()
            .name("AssetLoader ticker".to_owned())
            .spawn(move || {
                info!("Starting AssetLoader ticker");
                while !wants_drop2.load(Ordering::SeqCst) {
                    loader.tick();
                    spin_sleep::sleep(interval);
                }
                info!("AssetLoader ticker will stop now");
            })
            .map_err(|_| Error::FailedToStartThreadPool)?;
        Ok(Ticker {
            wants_drop,
            thread: Some(thread),
        })
    }

    /// Discards every pending request and forgets all loaded objects.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let ids = state.requests.handles();
        let mut discarded = 0;
        for id in ids {
            let Some(request) = state.requests.get(&id) else {
                continue;
            };
            if request.state.is_terminal() {
                continue;
            }
            let err = LoadError::Discarded(request.path_string.clone());
            self.fail(&mut state, id, err);
            self.destroy_if_unused(&mut state, id);
            discarded += 1;
        }
        let loaded = state.loaded.len();
        state.loaded.clear();
        if discarded > 0 || loaded > 0 {
            info!("AssetLoader shut down: discarded {discarded} pending requests and {loaded} loaded objects");
        }
    }
}

impl Drop for AssetLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ObjectIdentifier for AssetLoader {
    fn identify(&self, object: &ObjectHandle) -> Option<String> {
        self.path_table
            .owns(object.path())
            .then(|| self.path_table.to_string(object.path()))
    }
}

/// Link phase view of a request. Every resolved reference starts loading the referenced path
/// and becomes a fixup of the request.
struct RequestLinker<'a> {
    loader: &'a AssetLoader,
    state: &'a mut LoaderState,
    resolver: &'a mut Resolver,
    dependencies: &'a mut Vec<RequestId>,
    requester: &'a str,
}

impl ObjectResolver for RequestLinker<'_> {
    fn resolve(&mut self, path: &str, field: &str, expected_type: Option<&str>) -> bool {
        let handle = match self.loader.path_table.intern_path(path) {
            Ok(handle) => handle,
            Err(err) => {
                warn!("Reference '{field}' of '{}' is invalid: {err}", self.requester);
                return false;
            }
        };
        let dependency = self.loader.begin_load_locked(self.state, handle, false);
        self.dependencies.push(dependency);
        self.resolver.record_fixup(field, expected_type.map(TypeName::from), dependency);
        true
    }
}

/// Ticks an [`AssetLoader`] on a background thread. Dropping it stops the thread.
pub struct Ticker {
    wants_drop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.wants_drop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("AssetLoader ticker panicked");
            }
        }
    }
}
