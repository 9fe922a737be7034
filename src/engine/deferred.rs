//! Work that must not happen in the middle of a block.
//!
//! ```text
//!   control thread            audio thread                    loader thread
//!   ──────────────            ────────────                    ─────────────
//!   load_patch(id) ──► pending id
//!                             fade master out (20 blocks)
//!                             stop all voices, halt
//!                             request(id) ──────unpark──────► store.load(id)
//!                             (zero blocks while halted)       build routings
//!                                                              mailbox ◄─ result
//!                             try_lock mailbox, swap in ◄─────
//!                             clear halt
//! ```
//!
//! The audio thread never waits for the loader: it polls the mailbox with
//! `try_lock` once per halted block. Installing is a pointer swap, and the
//! replaced patch is left in the mailbox so it is dropped off the audio
//! thread by the next load.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::{debug, error};
use parking_lot::Mutex;

use crate::{
    error::{EngineError, PatchError},
    modulation::routing::RoutingMatrix,
    patch::{params::ParamId, store::PatchStore, Patch},
};

const NO_PATCH: usize = usize::MAX;

/// A patch plus its routing matrix, built off the audio thread.
#[derive(Debug, Clone)]
pub struct LoadedPatch {
    pub id: usize,
    pub patch: Patch,
    pub routing: RoutingMatrix,
}

impl LoadedPatch {
    pub fn build(store: &dyn PatchStore, id: usize) -> Result<Self, PatchError> {
        let patch = store.load(id)?;
        let routing = RoutingMatrix::from_specs(&patch.routings).map_err(|e| {
            PatchError::Malformed {
                id,
                reason: e.to_string(),
            }
        })?;
        Ok(Self { id, patch, routing })
    }
}

/// What the audio thread finds when it polls the loader.
#[derive(Debug)]
pub enum LoadOutcome {
    Ready(LoadedPatch),
    /// The error went to `SharedState::take_load_error`.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    Failed,
}

impl LoadState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => LoadState::Loading,
            2 => LoadState::Ready,
            3 => LoadState::Failed,
            _ => LoadState::Idle,
        }
    }
}

/// State visible to both the control context and the audio thread.
#[derive(Debug)]
pub struct SharedState {
    halted: AtomicBool,
    pending_patch: AtomicUsize,
    requested_patch: AtomicUsize,
    load_state: AtomicU8,
    shutdown: AtomicBool,
    voice_count: AtomicUsize,
    vu: [AtomicU32; 2],
    mailbox: Mutex<Option<LoadedPatch>>,
    load_error: Mutex<Option<PatchError>>,
    refresh: Mutex<RefreshQueue>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(REFRESH_CAPACITY)
    }
}

impl SharedState {
    pub fn new(refresh_capacity: usize) -> Self {
        Self {
            halted: AtomicBool::new(false),
            pending_patch: AtomicUsize::new(NO_PATCH),
            requested_patch: AtomicUsize::new(NO_PATCH),
            load_state: AtomicU8::new(0),
            shutdown: AtomicBool::new(false),
            voice_count: AtomicUsize::new(0),
            vu: [AtomicU32::new(0), AtomicU32::new(0)],
            mailbox: Mutex::new(None),
            load_error: Mutex::new(None),
            refresh: Mutex::new(RefreshQueue::with_capacity(refresh_capacity)),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub(crate) fn set_halted(&self, halted: bool) {
        self.halted.store(halted, Ordering::Release);
    }

    /// Queue a patch load. A newer request replaces one not yet started.
    pub fn request_patch(&self, id: usize) {
        self.pending_patch.store(id, Ordering::Release);
    }

    pub fn pending_patch(&self) -> Option<usize> {
        let id = self.pending_patch.load(Ordering::Acquire);
        (id != NO_PATCH).then_some(id)
    }

    pub(crate) fn take_pending_patch(&self) -> Option<usize> {
        let id = self.pending_patch.swap(NO_PATCH, Ordering::AcqRel);
        (id != NO_PATCH).then_some(id)
    }

    pub fn load_state(&self) -> LoadState {
        LoadState::from_raw(self.load_state.load(Ordering::Acquire))
    }

    fn set_load_state(&self, state: LoadState) {
        self.load_state.store(state as u8, Ordering::Release);
    }

    pub fn voice_count(&self) -> usize {
        self.voice_count.load(Ordering::Relaxed)
    }

    pub(crate) fn publish_voice_count(&self, count: usize) {
        self.voice_count.store(count, Ordering::Relaxed);
    }

    pub fn vu(&self) -> [f32; 2] {
        [
            f32::from_bits(self.vu[0].load(Ordering::Relaxed)),
            f32::from_bits(self.vu[1].load(Ordering::Relaxed)),
        ]
    }

    pub(crate) fn publish_vu(&self, peaks: [f32; 2]) {
        for (slot, peak) in self.vu.iter().zip(peaks) {
            slot.store(peak.to_bits(), Ordering::Relaxed);
        }
    }

    pub(crate) fn report_load_error(&self, err: PatchError) {
        *self.load_error.lock() = Some(err);
    }

    pub fn take_load_error(&self) -> Option<PatchError> {
        self.load_error.lock().take()
    }

    /// Hand parameters changed on the audio thread to the control side.
    /// Gives up instead of waiting when the control side holds the lock.
    pub(crate) fn try_publish_refresh(&self, local: &mut RefreshQueue) {
        if local.is_empty() {
            return;
        }
        if let Some(mut shared) = self.refresh.try_lock() {
            for (param, value) in local.iter() {
                shared.push(param, value);
            }
            local.clear();
        }
    }

    pub fn drain_refresh(&self, mut f: impl FnMut(ParamId, f32)) {
        let mut shared = self.refresh.lock();
        for (param, value) in shared.iter() {
            f(param, value);
        }
        shared.clear();
    }
}

/// Parameters whose value changed on the audio thread, paired with the plain
/// value they were set to, for the control side to redraw. Fixed capacity;
/// a parameter already queued has its value replaced, and when full the
/// last entry is overwritten.
#[derive(Debug, Clone, Copy)]
pub struct RefreshQueue {
    entries: [Option<(ParamId, f32)>; REFRESH_CAPACITY],
    capacity: usize,
}

/// Upper bound on the refresh queue capacity.
pub const REFRESH_CAPACITY: usize = 8;

impl Default for RefreshQueue {
    fn default() -> Self {
        Self::with_capacity(REFRESH_CAPACITY)
    }
}

impl RefreshQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: [None; REFRESH_CAPACITY],
            capacity: capacity.clamp(1, REFRESH_CAPACITY),
        }
    }

    pub fn push(&mut self, param: ParamId, value: f32) {
        let mut free = None;
        for (i, entry) in self.entries[..self.capacity].iter().enumerate() {
            match entry {
                Some((queued, _)) if *queued == param => {
                    free = Some(i);
                    break;
                }
                None if free.is_none() => free = Some(i),
                _ => {}
            }
        }
        let index = free.unwrap_or(self.capacity - 1);
        self.entries[index] = Some((param, value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, f32)> + '_ {
        self.entries.iter().flatten().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    pub fn clear(&mut self) {
        self.entries = [None; REFRESH_CAPACITY];
    }
}

/// Background thread that turns patch ids into `LoadedPatch`es.
///
/// The thread is started with the engine and sleeps until the audio thread
/// unparks it, so requesting a load never allocates or spawns on the audio
/// thread.
pub struct PatchLoader {
    shared: Arc<SharedState>,
    worker: Option<JoinHandle<()>>,
}

impl PatchLoader {
    pub fn spawn(shared: Arc<SharedState>, store: Arc<dyn PatchStore>) -> Result<Self, EngineError> {
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("polyscene-patch-loader".into())
            .spawn(move || loader_loop(&worker_shared, store.as_ref()))?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Ask the worker to load `id`. Returns immediately.
    pub fn request(&self, id: usize) {
        self.shared.requested_patch.store(id, Ordering::Release);
        self.shared.set_load_state(LoadState::Loading);
        if let Some(worker) = &self.worker {
            worker.thread().unpark();
        }
    }

    /// Take a finished load. `None` while the worker is busy, or when the
    /// mailbox is momentarily locked.
    pub fn poll(&self) -> Option<LoadOutcome> {
        match self.shared.load_state() {
            LoadState::Ready => {
                let mut mailbox = self.shared.mailbox.try_lock()?;
                let loaded = mailbox.take()?;
                self.shared.set_load_state(LoadState::Idle);
                Some(LoadOutcome::Ready(loaded))
            }
            LoadState::Failed => {
                self.shared.set_load_state(LoadState::Idle);
                Some(LoadOutcome::Failed)
            }
            LoadState::Idle | LoadState::Loading => None,
        }
    }

    /// Park the replaced patch in the mailbox so the loader drops it. If
    /// the mailbox is contended the patch is dropped here instead.
    pub fn retire(&self, old: LoadedPatch) {
        if let Some(mut mailbox) = self.shared.mailbox.try_lock() {
            *mailbox = Some(old);
        }
    }

    pub fn is_busy(&self) -> bool {
        self.shared.load_state() == LoadState::Loading
    }
}

impl Drop for PatchLoader {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
        }
    }
}

fn loader_loop(shared: &SharedState, store: &dyn PatchStore) {
    loop {
        thread::park();
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let id = shared.requested_patch.swap(NO_PATCH, Ordering::AcqRel);
        if id == NO_PATCH {
            continue;
        }
        debug!(target: "polyscene::deferred", "loading patch {id}");
        match LoadedPatch::build(store, id) {
            Ok(loaded) => {
                // drops whatever the audio thread retired here
                *shared.mailbox.lock() = Some(loaded);
                shared.set_load_state(LoadState::Ready);
            }
            Err(err) => {
                error!(target: "polyscene::deferred", "patch {id} failed to load: {err}");
                shared.report_load_error(err);
                shared.set_load_state(LoadState::Failed);
            }
        }
    }
    debug!(target: "polyscene::deferred", "patch loader stopped");
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::patch::{params::SceneParam, store::MemoryPatchStore};

    fn wait_for(loader: &PatchLoader) -> Option<LoadOutcome> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(result) = loader.poll() {
                return Some(result);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn refresh_queue_dedups_and_overwrites_last() {
        let mut queue = RefreshQueue::default();
        let id = |i: usize| ParamId::scene(0, SceneParam::from_index(i).unwrap_or(SceneParam::Pitch));
        queue.push(id(0), 0.25);
        queue.push(id(0), 0.75);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next(), Some((id(0), 0.75)));
        for i in 1..REFRESH_CAPACITY + 2 {
            queue.push(id(i), i as f32);
        }
        assert_eq!(queue.len(), REFRESH_CAPACITY);
        let last: Vec<(ParamId, f32)> = queue.iter().collect();
        assert_eq!(last[REFRESH_CAPACITY - 1], (id(REFRESH_CAPACITY + 1), (REFRESH_CAPACITY + 1) as f32));
    }

    #[test]
    fn loader_delivers_through_the_mailbox() {
        let shared = Arc::new(SharedState::default());
        let store = MemoryPatchStore::new(vec![Patch::named("a"), Patch::named("b")]);
        let loader = PatchLoader::spawn(Arc::clone(&shared), Arc::new(store)).expect("spawn");

        loader.request(1);
        match wait_for(&loader) {
            Some(LoadOutcome::Ready(loaded)) => {
                assert_eq!(loaded.id, 1);
                assert_eq!(loaded.patch.name, "b");
            }
            _ => panic!("load did not finish"),
        }
        assert!(!loader.is_busy());
    }

    #[test]
    fn failures_are_reported_to_the_control_side() {
        let shared = Arc::new(SharedState::default());
        let loader =
            PatchLoader::spawn(Arc::clone(&shared), Arc::new(MemoryPatchStore::default()))
                .expect("spawn");
        loader.request(3);
        assert!(matches!(wait_for(&loader), Some(LoadOutcome::Failed)));
        assert_eq!(shared.take_load_error(), Some(PatchError::NotFound(3)));
        assert_eq!(shared.take_load_error(), None);
    }

    #[test]
    fn vu_round_trips_through_bits() {
        let shared = SharedState::default();
        shared.publish_vu([0.25, 1.5]);
        assert_eq!(shared.vu(), [0.25, 1.5]);
    }
}
