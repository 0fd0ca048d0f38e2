//! # Core Thread
//!
//! The single thread that owns every core half and interprets commands.
//!
//! ```text
//! SIMULATION THREAD                         CORE THREAD
//! ─────────────────                         ───────────
//! queue(Create/Sync/Dispatch/...)
//! queue(...)
//! submit(wait) ── Vec<CoreCommand> ──────►  for cmd in batch: execute(cmd)
//!      │                                       Sync: apply, clear alloc,
//!      │ ◄────────── recycled FrameAlloc ────        send alloc back
//!      └─ (wait) fence.wait() ◄──────────────  Signal(fence): fence.signal()
//! ```
//!
//! Commands are plain values, so ownership of everything a command carries
//! moves with it. The first error on the core thread is stored in a fatal
//! slot; later commands are skipped (fences still signal, so nobody
//! deadlocks) and the simulation side sees the error on its next submit.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::context::{self, ExecutionContext};
use crate::error::{CoreError, CoreResult};
use crate::memory::{FrameAlloc, Handle};
use crate::sync::{CoreObject, CoreObjectRegistry, Fence, SyncBatch};

/// How often a blocked submit re-checks that the core thread is alive.
const LIVENESS_POLL: Duration = Duration::from_millis(50);

/// Core context state that interprets domain commands.
pub trait CoreDispatch: Send + Sized + 'static {
    /// Domain command type carried by [`CoreCommand::Dispatch`].
    type Command: Send + 'static;

    /// Executes one domain command.
    ///
    /// # Errors
    ///
    /// Any error stops the core thread's command processing.
    fn dispatch(
        &mut self,
        objects: &mut CoreObjectRegistry<Self>,
        command: Self::Command,
    ) -> CoreResult<()>;
}

/// A unit of work for the core thread.
pub enum CoreCommand<C: CoreDispatch> {
    /// Install a freshly registered core half.
    Create {
        /// Handle issued by the simulation registry.
        handle: Handle,
        /// The core half.
        object: Box<dyn CoreObject<C>>,
    },
    /// Apply a frame's sync packets.
    Sync(SyncBatch),
    /// Tear down a core half.
    Destroy(Handle),
    /// Domain command.
    Dispatch(C::Command),
    /// Signal a fence once everything queued before it has run.
    Signal(Arc<Fence>),
}

impl<C: CoreDispatch> std::fmt::Debug for CoreCommand<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create { handle, .. } => write!(f, "Create({handle})"),
            Self::Sync(batch) => write!(f, "Sync({} packets)", batch.entries.len()),
            Self::Destroy(handle) => write!(f, "Destroy({handle})"),
            Self::Dispatch(_) => write!(f, "Dispatch"),
            Self::Signal(_) => write!(f, "Signal"),
        }
    }
}

type FatalSlot = Arc<Mutex<Option<CoreError>>>;

/// Handle to the running core thread, held by the simulation side.
pub struct CoreThread<C: CoreDispatch> {
    sender: Option<Sender<Vec<CoreCommand<C>>>>,
    pending: Vec<CoreCommand<C>>,
    recycled: Receiver<FrameAlloc>,
    fatal: FatalSlot,
    thread: Option<JoinHandle<C>>,
}

impl<C: CoreDispatch> CoreThread<C> {
    /// Starts the core thread with `state` as its context.
    ///
    /// # Errors
    ///
    /// [`CoreError::ThreadSpawn`] if the OS refuses the thread.
    pub fn spawn(state: C) -> CoreResult<Self> {
        let (sender, receiver) = unbounded::<Vec<CoreCommand<C>>>();
        let (recycle_tx, recycled) = unbounded();
        let fatal: FatalSlot = Arc::new(Mutex::new(None));
        let thread_fatal = Arc::clone(&fatal);

        let thread = thread::Builder::new()
            .name("core".into())
            .spawn(move || Self::run(state, &receiver, &recycle_tx, &thread_fatal))
            .map_err(|e| CoreError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            sender: Some(sender),
            pending: Vec::new(),
            recycled,
            fatal,
            thread: Some(thread),
        })
    }

    /// Core thread main loop.
    fn run(
        mut state: C,
        receiver: &Receiver<Vec<CoreCommand<C>>>,
        recycle: &Sender<FrameAlloc>,
        fatal: &FatalSlot,
    ) -> C {
        let _context = context::enter(ExecutionContext::Core);
        let mut objects = CoreObjectRegistry::new();
        let mut failed = false;
        info!("core thread started");

        for batch in receiver {
            for command in batch {
                if failed {
                    // Keep releasing waiters after a failure.
                    if let CoreCommand::Signal(fence) = command {
                        fence.signal();
                    }
                    continue;
                }
                if let Err(e) = Self::execute(&mut state, &mut objects, command, recycle) {
                    error!(error = %e, "core thread command failed");
                    *fatal.lock() = Some(e);
                    failed = true;
                }
            }
        }

        objects.clear(&mut state);
        info!("core thread stopped");
        state
    }

    fn execute(
        state: &mut C,
        objects: &mut CoreObjectRegistry<C>,
        command: CoreCommand<C>,
        recycle: &Sender<FrameAlloc>,
    ) -> CoreResult<()> {
        match command {
            CoreCommand::Create { handle, object } => objects.create(handle, object, state),
            CoreCommand::Sync(mut batch) => {
                objects.apply_batch(&batch, state)?;
                batch.alloc.clear();
                // The simulation side may be gone during shutdown.
                let _ = recycle.send(batch.alloc);
            }
            CoreCommand::Destroy(handle) => {
                objects.destroy(handle, state);
            }
            CoreCommand::Dispatch(command) => state.dispatch(objects, command)?,
            CoreCommand::Signal(fence) => fence.signal(),
        }
        Ok(())
    }

    /// Queues a command locally. Nothing reaches the core thread until
    /// [`submit`](Self::submit).
    #[inline]
    pub fn queue(&mut self, command: CoreCommand<C>) {
        self.pending.push(command);
    }

    /// Number of locally queued commands.
    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sends the queued commands to the core thread.
    ///
    /// With `wait`, blocks until the core thread has executed them.
    ///
    /// # Errors
    ///
    /// A stored core thread failure, or [`CoreError::CoreThreadGone`].
    pub fn submit(&mut self, wait: bool) -> CoreResult<()> {
        self.check_fatal()?;

        let fence = wait.then(|| Arc::new(Fence::new()));
        if let Some(fence) = &fence {
            self.pending.push(CoreCommand::Signal(Arc::clone(fence)));
        }
        if !self.pending.is_empty() {
            let batch = std::mem::take(&mut self.pending);
            debug!(commands = batch.len(), wait, "submitting core commands");
            self.sender
                .as_ref()
                .ok_or(CoreError::CoreThreadGone)?
                .send(batch)
                .map_err(|_| CoreError::CoreThreadGone)?;
        }

        if let Some(fence) = fence {
            self.wait_fence(&fence)?;
        }
        self.check_fatal()
    }

    /// Blocks until `fence` is signaled, failing if the core thread dies
    /// first.
    ///
    /// # Errors
    ///
    /// [`CoreError::CoreThreadGone`].
    pub fn wait_fence(&self, fence: &Fence) -> CoreResult<()> {
        while !fence.wait_timeout(LIVENESS_POLL) {
            if !self.is_running() {
                return Err(CoreError::CoreThreadGone);
            }
        }
        Ok(())
    }

    /// Returns the stored core thread failure, if any.
    ///
    /// # Errors
    ///
    /// The first error the core thread hit.
    pub fn check_fatal(&self) -> CoreResult<()> {
        match &*self.fatal.lock() {
            Some(e) => Err(e.clone()),
            None if self.is_running() => Ok(()),
            None => Err(CoreError::CoreThreadGone),
        }
    }

    /// True while the core thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// An allocator for the next sync batch, reusing one the core thread
    /// sent back if available.
    #[must_use]
    pub fn take_alloc(&self, capacity: usize) -> FrameAlloc {
        self.recycled
            .try_recv()
            .unwrap_or_else(|_| FrameAlloc::new(capacity))
    }

    /// Flushes queued commands, stops the thread and returns its state.
    ///
    /// # Errors
    ///
    /// [`CoreError::CoreThreadGone`] if the thread panicked.
    pub fn shutdown(mut self) -> CoreResult<C> {
        if !self.pending.is_empty() {
            if let Some(sender) = &self.sender {
                let _ = sender.send(std::mem::take(&mut self.pending));
            }
        }
        self.sender = None;
        self.thread
            .take()
            .ok_or(CoreError::CoreThreadGone)?
            .join()
            .map_err(|_| CoreError::CoreThreadGone)
    }
}

impl<C: CoreDispatch> Drop for CoreThread<C> {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    use crate::sync::{CoreLink, SimObject, SimObjectRegistry, SyncPacketReader, SyncPacketWriter};

    #[derive(Default)]
    struct Recorder {
        values: Vec<u32>,
    }

    enum RecorderCommand {
        Push(u32),
        Fail,
        Read(Handle, Sender<u32>),
    }

    impl CoreDispatch for Recorder {
        type Command = RecorderCommand;

        fn dispatch(
            &mut self,
            objects: &mut CoreObjectRegistry<Self>,
            command: RecorderCommand,
        ) -> CoreResult<()> {
            match command {
                RecorderCommand::Push(v) => self.values.push(v),
                RecorderCommand::Fail => return Err(CoreError::CoreThreadGone),
                RecorderCommand::Read(handle, reply) => {
                    let value = objects.get::<CoreValue>(handle)?.0;
                    let _ = reply.send(value);
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Value {
        link: CoreLink,
        value: u32,
    }

    struct CoreValue(u32);

    impl SimObject<Recorder> for Value {
        fn link(&self) -> &CoreLink {
            &self.link
        }
        fn link_mut(&mut self) -> &mut CoreLink {
            &mut self.link
        }
        fn create_core(&self) -> Box<dyn CoreObject<Recorder>> {
            Box::new(CoreValue(0))
        }
        fn sync_size(&self, _dirty: u32) -> usize {
            4
        }
        fn write_sync(&mut self, _dirty: u32, writer: &mut SyncPacketWriter<'_>) {
            writer.write(&self.value);
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    impl CoreObject<Recorder> for CoreValue {
        fn apply_sync(
            &mut self,
            _handle: Handle,
            _dirty: u32,
            reader: &mut SyncPacketReader<'_>,
            _ctx: &mut Recorder,
        ) -> CoreResult<()> {
            self.0 = reader.read()?;
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_commands_run_in_order() {
        let mut core = CoreThread::spawn(Recorder::default()).unwrap();
        for v in 0..5 {
            core.queue(CoreCommand::Dispatch(RecorderCommand::Push(v)));
        }
        core.submit(true).unwrap();
        let state = core.shutdown().unwrap();
        assert_eq!(state.values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_queue_is_local_until_submit() {
        let mut core = CoreThread::spawn(Recorder::default()).unwrap();
        core.queue(CoreCommand::Dispatch(RecorderCommand::Push(1)));
        assert_eq!(core.pending_len(), 1);
        core.submit(false).unwrap();
        assert_eq!(core.pending_len(), 0);
        let state = core.shutdown().unwrap();
        assert_eq!(state.values, vec![1]);
    }

    #[test]
    fn test_sync_reaches_core_and_recycles_alloc() {
        let mut core = CoreThread::spawn(Recorder::default()).unwrap();
        let mut sim: SimObjectRegistry<Recorder> = SimObjectRegistry::new();

        let (handle, object) = sim.register(Box::new(Value::default()));
        core.queue(CoreCommand::Create { handle, object });
        sim.get_mut::<Value>(handle).unwrap().value = 77;

        let batch = sim.sync_to_core(core.take_alloc(256)).unwrap();
        core.queue(CoreCommand::Sync(batch));

        let (tx, rx) = crossbeam_channel::bounded(1);
        core.queue(CoreCommand::Dispatch(RecorderCommand::Read(handle, tx)));
        core.submit(true).unwrap();
        assert_eq!(rx.recv().unwrap(), 77);

        let alloc = core.take_alloc(0);
        assert_eq!(alloc.used(), 0);
        assert_eq!(alloc.epoch(), 1, "allocator came back cleared");
    }

    #[test]
    fn test_core_failure_surfaces_on_submit() {
        let mut core = CoreThread::spawn(Recorder::default()).unwrap();
        core.queue(CoreCommand::Dispatch(RecorderCommand::Fail));
        core.queue(CoreCommand::Dispatch(RecorderCommand::Push(1)));
        assert_eq!(core.submit(true), Err(CoreError::CoreThreadGone));

        // Later commands were skipped.
        let state = core.shutdown().unwrap();
        assert!(state.values.is_empty());
    }
}
