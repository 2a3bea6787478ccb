use std::{
    any::Any,
    collections::{HashMap, HashSet},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
};

use tessera_shared::{
    crossbeam_channel::{self, Receiver, Sender},
    log::{error, info, trace},
    parking_lot::Mutex,
};

use crate::{
    common::LoadError,
    package_loader::{ObjectRecord, SubRequestId},
    Error, Result,
};

pub(crate) type JobResult = std::result::Result<ObjectRecord, LoadError>;

pub(crate) type Job = Box<dyn FnOnce() -> JobResult + Send>;

/// Finished jobs that wait to be taken and the jobs whose results nobody takes anymore.
#[derive(Default)]
struct Slots {
    results: HashMap<SubRequestId, JobResult>,
    cancelled: HashSet<SubRequestId>,
}

impl Slots {
    fn finish(&mut self, id: SubRequestId, result: JobResult) {
        if self.cancelled.remove(&id) {
            trace!("Dropping result of cancelled load {id}");
        } else {
            self.results.insert(id, result);
        }
    }
}

type SharedSlots = Arc<Mutex<Slots>>;

enum Item {
    Wakeup,
    Load(SubRequestId, Job),
}

/// Runs the I/O jobs of a package loader on its own worker threads. Without worker threads
/// the jobs run when [`Dispatch::tick`] is called.
pub(crate) struct Dispatch {
    name: String,
    thread_count: usize,
    next_id: AtomicU64,
    wants_drop: Arc<AtomicBool>,
    item_sender: Sender<Item>,
    item_receiver: Receiver<Item>,
    slots: SharedSlots,
}

impl Dispatch {
    pub fn new(name: impl Into<String>, thread_count: usize) -> Result<Self> {
        let name = name.into();
        let wants_drop = Arc::new(AtomicBool::new(false));
        let slots = SharedSlots::default();
        let (item_sender, item_receiver) = crossbeam_channel::unbounded();
        for thread_index in 0..thread_count {
            spawn_thread(&name, thread_index, &wants_drop, &item_receiver, &slots)?;
        }
        Ok(Self {
            name,
            thread_count,
            next_id: AtomicU64::new(0),
            wants_drop,
            item_sender,
            item_receiver,
            slots,
        })
    }

    pub fn submit(&self, job: Job) -> SubRequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.item_sender.send(Item::Load(id, job)) {
            // The receiver lives in `self`, so this only happens while dropping.
            error!("{} failed to queue load {id}: {err}", self.name);
        }
        id
    }

    pub fn try_take(&self, id: SubRequestId) -> Option<JobResult> {
        self.slots.lock().results.remove(&id)
    }

    /// Forgets the load `id`. Its result is dropped as soon as the job finishes. Must only be
    /// called for loads whose result hasn't been taken.
    pub fn cancel(&self, id: SubRequestId) {
        let mut slots = self.slots.lock();
        if slots.results.remove(&id).is_none() {
            slots.cancelled.insert(id);
        }
    }

    /// Number of results and cancellations that are kept for jobs.
    #[cfg(test)]
    pub fn retained_count(&self) -> usize {
        let slots = self.slots.lock();
        slots.results.len() + slots.cancelled.len()
    }

    /// Runs the queued jobs on the calling thread when there are no worker threads.
    pub fn tick(&self) {
        if self.thread_count > 0 {
            return;
        }
        while let Ok(item) = self.item_receiver.try_recv() {
            let Item::Load(id, job) = item else {
                continue;
            };
            if self.slots.lock().cancelled.remove(&id) {
                trace!("{} skips cancelled load {id}", self.name);
                continue;
            }
            let result = run_job(&self.name, id, job);
            self.slots.lock().finish(id, result);
        }
    }
}

/// Runs `job` and turns a panic into a [`LoadError::Panicked`].
fn run_job(name: &str, id: SubRequestId, job: Job) -> JobResult {
    panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!("Load {id} of '{name}' panicked: {message}");
        Err(LoadError::Panicked(message))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn spawn_thread(
    name: &str,
    thread_index: usize,
    wants_drop: &Arc<AtomicBool>,
    item_receiver: &Receiver<Item>,
    slots: &SharedSlots,
) -> Result<()> {
    let wants_drop = wants_drop.clone();
    let item_receiver = item_receiver.clone();
    let slots = slots.clone();
    let thread_name = format!("{name} thread {thread_index}");
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            info!("Starting '{thread_name}'");
            loop {
                let Ok(item) = item_receiver.recv() else {
                    error!("'{thread_name}' failed to receive item");
                    break;
                };
                if wants_drop.load(Ordering::SeqCst) {
                    break;
                }
                let (id, job) = match item {
                    Item::Wakeup => continue,
                    Item::Load(id, job) => (id, job),
                };
                if slots.lock().cancelled.remove(&id) {
                    trace!("'{thread_name}' skips cancelled load {id}");
                    continue;
                }
                trace!("'{thread_name}' starts load {id}");
                let result = run_job(&thread_name, id, job);
                slots.lock().finish(id, result);
            }
            info!("'{thread_name}' will stop now");
        })
        .map_err(|_| Error::FailedToStartThreadPool)?;
    Ok(())
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        self.wants_drop.store(true, Ordering::SeqCst);
        for _ in 0..self.thread_count {
            if let Err(err) = self.item_sender.send(Item::Wakeup) {
                error!("Failed to send wakeup item to '{}' in drop implementation: {err}", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tessera_test::{poll_until, setup_logger};

    use super::*;

    fn record(type_name: &str) -> Job {
        let type_name = type_name.to_owned();
        Box::new(move || {
            Ok(ObjectRecord {
                type_name,
                ..Default::default()
            })
        })
    }

    #[test]
    fn inline_jobs_run_on_tick() {
        // Given
        setup_logger();
        let dispatch = Dispatch::new("inline", 0).unwrap();
        let id = dispatch.submit(record("A"));

        // Then
        assert!(dispatch.try_take(id).is_none());
        dispatch.tick();
        assert_eq!(dispatch.try_take(id).unwrap().unwrap().type_name, "A");
        assert!(dispatch.try_take(id).is_none());
    }

    #[test]
    fn worker_threads_run_jobs() {
        // Given
        setup_logger();
        let dispatch = Dispatch::new("workers", 2).unwrap();

        // When
        let ids = (0..8).map(|i| dispatch.submit(record(&format!("T{i}")))).collect::<Vec<_>>();

        // Then
        for (i, id) in ids.into_iter().enumerate() {
            let result = poll_until(Duration::from_secs(5), || dispatch.try_take(id));
            assert_eq!(result.unwrap().type_name, format!("T{i}"));
        }
    }

    #[test]
    fn errors_are_passed_through() {
        setup_logger();
        let dispatch = Dispatch::new("inline", 0).unwrap();
        let id = dispatch.submit(Box::new(|| Err(LoadError::NotFound("/P:A".to_owned()))));
        dispatch.tick();
        assert_eq!(dispatch.try_take(id), Some(Err(LoadError::NotFound("/P:A".to_owned()))));
    }

    fn panicking() -> Job {
        Box::new(|| panic!("corrupt record"))
    }

    #[test]
    fn panicking_job_on_worker_becomes_error() {
        // Given
        setup_logger();
        let dispatch = Dispatch::new("workers", 1).unwrap();

        // When
        let failing = dispatch.submit(panicking());
        let succeeding = dispatch.submit(record("A"));

        // Then
        let result = poll_until(Duration::from_secs(5), || dispatch.try_take(failing));
        assert_eq!(result, Err(LoadError::Panicked("corrupt record".to_owned())));
        let result = poll_until(Duration::from_secs(5), || dispatch.try_take(succeeding));
        assert_eq!(result.unwrap().type_name, "A");
    }

    #[test]
    fn panicking_inline_job_becomes_error() {
        // Given
        setup_logger();
        let dispatch = Dispatch::new("inline", 0).unwrap();
        let failing = dispatch.submit(panicking());
        let succeeding = dispatch.submit(record("A"));

        // When
        dispatch.tick();

        // Then
        assert!(matches!(dispatch.try_take(failing), Some(Err(LoadError::Panicked(_)))));
        assert_eq!(dispatch.try_take(succeeding).unwrap().unwrap().type_name, "A");
    }

    #[test]
    fn cancelled_inline_job_is_skipped() {
        // Given
        setup_logger();
        let dispatch = Dispatch::new("inline", 0).unwrap();
        let id = dispatch.submit(panicking());

        // When
        dispatch.cancel(id);
        dispatch.tick();

        // Then
        assert_eq!(dispatch.try_take(id), None);
        assert_eq!(dispatch.retained_count(), 0);
    }

    #[test]
    fn result_of_cancelled_job_is_dropped() {
        // Given
        setup_logger();
        let dispatch = Dispatch::new("workers", 1).unwrap();
        let gate = Arc::new(AtomicBool::new(false));
        let gate2 = gate.clone();
        let id = dispatch.submit(Box::new(move || {
            while !gate2.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            Ok(ObjectRecord::default())
        }));

        // When
        dispatch.cancel(id);
        gate.store(true, Ordering::SeqCst);
        let marker = dispatch.submit(record("B"));
        poll_until(Duration::from_secs(5), || dispatch.try_take(marker)).unwrap();

        // Then
        assert_eq!(dispatch.try_take(id), None);
        assert_eq!(dispatch.retained_count(), 0);
    }

    #[test]
    fn cancelling_a_finished_job_drops_its_result() {
        setup_logger();
        let dispatch = Dispatch::new("inline", 0).unwrap();
        let id = dispatch.submit(record("A"));
        dispatch.tick();
        dispatch.cancel(id);
        assert_eq!(dispatch.retained_count(), 0);
    }
}
