//! Compute context, queues and events.
//!
//! A [`ComputeContext`] opens one or more selected devices and owns exactly
//! one in-order [`Queue`] per device, in enumeration order. Programs, kernels
//! and buffers borrow the context, so it cannot be torn down while any of
//! them is alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, trace, warn};

use crate::backend::{self, CompiledProgram, DeviceBackend, KernelRegistry, Launch, PendingWork};
use crate::device::{Device, Platform, select_devices};
use crate::{ComputeError, ComputeResult};

/// Context creation settings.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Only devices advertising this capability are selected.
    pub required_capability: Option<String>,
    /// Number of devices (and queues) to open; fewer if fewer match.
    pub device_count: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            required_capability: None,
            device_count: 1,
        }
    }
}

// =============================================================================
// Queue
// =============================================================================

type PendingList = Vec<(u64, Box<dyn PendingWork>)>;

/// In-order command queue bound to one device.
pub struct Queue {
    index: usize,
    device: Device,
    backend: Arc<dyn DeviceBackend>,
    registry: Arc<KernelRegistry>,
    pending: Mutex<PendingList>,
    next_event: AtomicU64,
}

impl Queue {
    /// Position within the context (0 is the default queue).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Host kernels consulted by software builds.
    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    pub(crate) fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    fn pending(&self) -> MutexGuard<'_, PendingList> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of dispatches that have not been waited on.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Wait for all outstanding work, oldest first.
    ///
    /// Every pending item is waited on even after a failure; the first
    /// failure is returned.
    pub fn finish(&self) -> ComputeResult<()> {
        let drained: PendingList = std::mem::take(&mut *self.pending());
        if drained.is_empty() {
            return Ok(());
        }
        trace!(queue = self.index, count = drained.len(), "Queue::finish");

        let mut first_err = None;
        for (_, work) in drained {
            if let Err(e) = work.wait() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Launch on this queue, after everything already queued.
    pub(crate) fn submit(&self, program: &dyn CompiledProgram, launch: &Launch<'_>) -> ComputeResult<Event<'_>> {
        self.finish()?;
        let work = self.backend.launch(program, launch)?;

        if launch.blocking {
            work.wait()?;
            return Ok(Event {
                queue: self,
                id: None,
            });
        }

        let id = self.next_event.fetch_add(1, Ordering::Relaxed);
        self.pending().push((id, work));
        Ok(Event {
            queue: self,
            id: Some(id),
        })
    }

    fn wait_event(&self, id: u64) -> ComputeResult<()> {
        let work = {
            let mut pending = self.pending();
            pending.iter().position(|(i, _)| *i == id).map(|pos| pending.remove(pos).1)
        };
        // Already joined by finish() when missing.
        work.map_or(Ok(()), |w| w.wait())
    }

    fn event_complete(&self, id: u64) -> bool {
        self.pending()
            .iter()
            .find(|(i, _)| *i == id)
            .is_none_or(|(_, work)| work.is_complete())
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("index", &self.index)
            .field("device", &self.device.name())
            .field("backend", &self.backend.name())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Completion handle of one dispatch.
#[must_use = "a non-blocking dispatch must be waited on or joined with Queue::finish"]
pub struct Event<'q> {
    queue: &'q Queue,
    id: Option<u64>,
}

impl<'q> Event<'q> {
    /// Block until the dispatch completes.
    pub fn wait(self) -> ComputeResult<()> {
        match self.id {
            Some(id) => self.queue.wait_event(id),
            None => Ok(()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.id.is_none_or(|id| self.queue.event_complete(id))
    }

    pub fn queue(&self) -> &'q Queue {
        self.queue
    }

    /// Barrier over several events, possibly on different queues.
    ///
    /// Waits for every event; returns the first failure.
    pub fn wait_all(events: impl IntoIterator<Item = Event<'q>>) -> ComputeResult<()> {
        let mut first_err = None;
        for event in events {
            if let Err(e) = event.wait() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("queue", &self.queue.index)
            .field("id", &self.id)
            .finish()
    }
}

// =============================================================================
// Context
// =============================================================================

/// Selected devices with one queue each.
pub struct ComputeContext {
    queues: Vec<Queue>,
    registry: Arc<KernelRegistry>,
}

impl ComputeContext {
    /// Select devices from `platform` and open a queue on each.
    pub fn initialize(platform: &Platform, config: &ContextConfig) -> ComputeResult<Self> {
        trace!(required = ?config.required_capability, device_count = config.device_count, "ComputeContext::initialize");

        let devices = select_devices(platform, config.required_capability.as_deref(), config.device_count)?;
        if devices.len() < config.device_count {
            warn!(
                requested = config.device_count,
                available = devices.len(),
                "Fewer matching devices than requested"
            );
        }

        let registry = Arc::new(KernelRegistry::new());
        let mut queues = Vec::with_capacity(devices.len());
        for (index, device) in devices.into_iter().enumerate() {
            let backend = backend::open(&device).map_err(|e| match e {
                ComputeError::ContextCreation(_) => e,
                other => ComputeError::ContextCreation(format!("{}: {other}", device.name())),
            })?;
            debug!(queue = index, device = device.name(), backend = backend.name(), "Opened queue");
            queues.push(Queue {
                index,
                device,
                backend,
                registry: registry.clone(),
                pending: Mutex::new(Vec::new()),
                next_event: AtomicU64::new(0),
            });
        }

        info!(
            queues = queues.len(),
            devices = ?queues.iter().map(|q| q.device.name()).collect::<Vec<_>>(),
            "Compute context created"
        );
        Ok(Self { queues, registry })
    }

    /// Default (first) queue.
    pub fn queue(&self) -> &Queue {
        // initialize() never yields an empty queue list
        &self.queues[0]
    }

    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    pub fn queue_at(&self, index: usize) -> Option<&Queue> {
        self.queues.get(index)
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.queues.iter().map(Queue::device)
    }

    /// Host kernels shared by every queue.
    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    /// Wait for outstanding work on every queue.
    pub fn finish(&self) -> ComputeResult<()> {
        let mut first_err = None;
        for queue in &self.queues {
            if let Err(e) = queue.finish() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Drain pending work and release queues in reverse creation order.
    pub fn teardown(mut self) -> ComputeResult<()> {
        let result = self.finish();
        self.release();
        debug!("Compute context released");
        result
    }

    fn release(&mut self) {
        while let Some(queue) = self.queues.pop() {
            trace!(queue = queue.index, "Releasing queue");
        }
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        if self.queues.is_empty() {
            return;
        }
        if let Err(e) = self.finish() {
            warn!(error = %e, "Pending work failed while dropping compute context");
        }
        self.release();
    }
}

impl fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeContext").field("queues", &self.queues).finish()
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// Single owner of at most one live context.
///
/// Initializing while a context is live fails with `AlreadyInitialized`;
/// tearing down with nothing live is a no-op.
#[derive(Debug, Default)]
pub struct ComputeRuntime {
    context: Option<ComputeContext>,
}

impl ComputeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, platform: &Platform, config: &ContextConfig) -> ComputeResult<&ComputeContext> {
        if self.context.is_some() {
            return Err(ComputeError::AlreadyInitialized);
        }
        Ok(&*self.context.insert(ComputeContext::initialize(platform, config)?))
    }

    pub fn context(&self) -> ComputeResult<&ComputeContext> {
        self.context.as_ref().ok_or(ComputeError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Tear down the live context. Returns `false` when nothing was live.
    pub fn teardown(&mut self) -> ComputeResult<bool> {
        match self.context.take() {
            Some(ctx) => ctx.teardown().map(|_| true),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_queues() {
        let platform = Platform::software(3);
        let ctx = ComputeContext::initialize(
            &platform,
            &ContextConfig {
                device_count: 2,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ctx.queue_count(), 2);
        assert_eq!(ctx.queue().index(), 0);
        assert_eq!(ctx.queue_at(1).unwrap().device().index(), 1);
        assert!(ctx.queue_at(2).is_none());
        ctx.teardown().unwrap();
    }

    #[test]
    fn test_runtime_lifecycle() {
        let platform = Platform::software(1);
        let mut runtime = ComputeRuntime::new();
        assert!(matches!(runtime.context(), Err(ComputeError::NotInitialized)));
        assert!(!runtime.teardown().unwrap());

        runtime.initialize(&platform, &ContextConfig::default()).unwrap();
        assert!(matches!(
            runtime.initialize(&platform, &ContextConfig::default()),
            Err(ComputeError::AlreadyInitialized)
        ));

        assert!(runtime.teardown().unwrap());
        assert!(!runtime.is_initialized());
        runtime.initialize(&platform, &ContextConfig::default()).unwrap();
        assert!(runtime.teardown().unwrap());
    }

    #[test]
    fn test_no_device() {
        let platform = Platform::software(1);
        let err = ComputeContext::initialize(
            &platform,
            &ContextConfig {
                required_capability: Some("cl_khr_fp16".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ComputeError::NoDeviceFound { .. }));
    }
}
