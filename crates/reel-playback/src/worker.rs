//! The per-clip cache worker thread.
//!
//! Requests go through a latest-wins slot: a request that arrives while a
//! pass is running replaces any request still waiting, and only the newest
//! one runs next. The thread opens the decode session itself, so a slow
//! open never blocks the caller.

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use reel_core::Result;
use reel_media::{DecodeError, DecodeSession, SessionOptions, SourceOpener, StreamInfo};
use reel_timeline::ClipId;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::cache::{AudioSink, CacheRequest, ClipCacher, OpenState, SharedCacheState};

/// Lifecycle notifications from clip workers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipEvent {
    Opened { clip: ClipId },
    OpenFailed { clip: ClipId, error: DecodeError },
    Closed { clip: ClipId },
}

#[derive(Default)]
struct Slot {
    request: Option<CacheRequest>,
    closing: bool,
}

impl Slot {
    /// Store `request` in place of any waiting one, carrying over a
    /// waiting reset. Returns whether the stored request resets.
    fn put(&mut self, mut request: CacheRequest) -> bool {
        if let Some(waiting) = self.request.take() {
            request.reset |= waiting.reset;
        }
        let reset = request.reset;
        self.request = Some(request);
        reset
    }
}

struct Control {
    slot: Mutex<Slot>,
    wake: Condvar,
}

/// Everything a worker needs to open its session.
pub struct WorkerSetup {
    pub clip: ClipId,
    pub opener: Arc<dyn SourceOpener>,
    pub path: PathBuf,
    pub stream: StreamInfo,
    pub options: SessionOptions,
    pub audio: Option<AudioSink>,
    pub events: Sender<ClipEvent>,
}

/// Handle on a running cache worker.
pub struct CacheWorker {
    clip: ClipId,
    control: Arc<Control>,
    shared: Arc<SharedCacheState>,
    handle: Option<JoinHandle<()>>,
}

impl CacheWorker {
    /// Start the worker thread. The session opens on that thread; the
    /// outcome arrives as a [`ClipEvent`].
    pub fn spawn(setup: WorkerSetup, shared: Arc<SharedCacheState>) -> Result<Self> {
        let clip = setup.clip;
        let control = Arc::new(Control {
            slot: Mutex::new(Slot::default()),
            wake: Condvar::new(),
        });
        shared.set_open_state(OpenState::Opening);

        let thread_control = Arc::clone(&control);
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("reel-cache-{}", clip.0))
            .spawn(move || worker_main(setup, thread_shared, thread_control))?;

        Ok(Self {
            clip,
            control,
            shared,
            handle: Some(handle),
        })
    }

    pub fn clip(&self) -> ClipId {
        self.clip
    }

    /// Queue `request`, replacing any request not yet started. With
    /// `interrupt` the running pass is abandoned at its next check.
    pub fn request(&self, request: CacheRequest, interrupt: bool) {
        let mut slot = self.control.slot.lock();
        if slot.closing {
            return;
        }
        // a reset still waiting in the slot must survive the replacement
        let pending_reset = slot.put(request);
        if interrupt || pending_reset {
            self.shared.interrupt.store(true, Ordering::Release);
        }
        drop(slot);
        self.control.wake.notify_one();
    }

    /// Stop the worker. With `wait` this blocks until the thread has closed
    /// its session; otherwise the thread finishes on its own.
    pub fn close(&mut self, wait: bool) {
        {
            let mut slot = self.control.slot.lock();
            slot.closing = true;
            slot.request = None;
        }
        self.shared.interrupt.store(true, Ordering::Release);
        self.control.wake.notify_all();

        let Some(handle) = self.handle.take() else {
            return;
        };
        if wait {
            if handle.join().is_err() {
                warn!("Cache worker for {} panicked", self.clip);
            }
        } else {
            debug!("Detached cache worker for {}", self.clip);
        }
    }
}

impl Drop for CacheWorker {
    fn drop(&mut self) {
        self.close(true);
    }
}

fn worker_main(setup: WorkerSetup, shared: Arc<SharedCacheState>, control: Arc<Control>) {
    let WorkerSetup {
        clip,
        opener,
        path,
        stream,
        options,
        audio,
        events,
    } = setup;

    let session = match DecodeSession::open(opener.as_ref(), &path, &stream, options) {
        Ok(session) => session,
        Err(error) => {
            shared.set_open_state(OpenState::Failed);
            let _ = events.send(ClipEvent::OpenFailed { clip, error });
            return;
        }
    };
    shared.set_open_state(OpenState::Open);
    let _ = events.send(ClipEvent::Opened { clip });

    let mut cacher = ClipCacher::new(session, Arc::clone(&shared), audio, true);
    while let Some(request) = next_request(&control, &shared) {
        cacher.run(&request);
    }

    cacher.close();
    shared.queue.lock().clear();
    shared.set_open_state(OpenState::Closed);
    debug!("Cache worker for {} stopped", clip);
    let _ = events.send(ClipEvent::Closed { clip });
}

/// Block until a request arrives or the worker is told to close.
fn next_request(control: &Control, shared: &SharedCacheState) -> Option<CacheRequest> {
    let mut slot = control.slot.lock();
    loop {
        if slot.closing {
            return None;
        }
        if let Some(request) = slot.request.take() {
            shared.interrupt.store(false, Ordering::Release);
            return Some(request);
        }
        control.wake.wait(&mut slot);
    }
}
