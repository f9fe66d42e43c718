//! Process-wide session table.
//!
//! Every session attaches under an opaque [`HostHandle`] (the identity of
//! the host object it is embedded in) and receives a [`SessionId`]. The
//! table is guarded by one mutex acquired with a short timeout so a
//! contended registry never stalls the caller. When the last session
//! detaches the table itself is released.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use crate::{CaptureParams, ResourceError};

/// Number of slots in the global registry.
pub const DEFAULT_CAPACITY: usize = 4000;

/// How long attach, detach and find wait for the registry lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// Identifier of an attached session: its slot index plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(NonZeroU32);

impl SessionId {
    /// Wraps a raw id.
    pub fn new(id: NonZeroU32) -> Self {
        Self(id)
    }

    /// Returns the id as a number, always greater than zero.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    fn from_slot(slot: usize) -> Option<Self> {
        u32::try_from(slot + 1).ok().and_then(NonZeroU32::new).map(Self)
    }

    fn slot(self) -> usize {
        self.0.get() as usize - 1
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Opaque identity of the host object a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostHandle(u64);

impl HostHandle {
    /// Wraps a host-provided identity.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns a handle no other call in this process has returned.
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1 << 32);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identity.
    pub fn raw(self) -> u64 {
        self.0
    }
}

struct Slot {
    handle: HostHandle,
    params: CaptureParams,
}

struct SlotTable {
    slots: Vec<Option<Slot>>,
    active: usize,
}

impl SlotTable {
    fn position(&self, handle: HostHandle) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.handle == handle))
    }
}

/// Fixed-capacity table of attached sessions.
///
/// # Example
///
/// ```
/// use frame_saver::{HostHandle, InstanceRegistry};
///
/// let registry = InstanceRegistry::with_capacity(2);
/// let host = HostHandle::new(7);
///
/// let id = registry.attach(host).unwrap();
/// assert_eq!(registry.attach(host).unwrap(), id);
/// assert_eq!(registry.active_count(), 1);
///
/// registry.detach(host).unwrap();
/// assert!(registry.find(host).is_none());
/// ```
pub struct InstanceRegistry {
    capacity: usize,
    timeout: Duration,
    table: Mutex<Option<SlotTable>>,
}

impl InstanceRegistry {
    /// Creates a registry with `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            timeout: LOCK_TIMEOUT,
            table: Mutex::new(None),
        }
    }

    /// The process-wide registry used when a builder is not given one.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<InstanceRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(Self::with_capacity(DEFAULT_CAPACITY)))
            .clone()
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, Option<SlotTable>>, ResourceError> {
        self.table
            .try_lock_for(self.timeout)
            .ok_or(ResourceError::LockTimeout(self.timeout))
    }

    /// Attaches `handle`, returning its session id.
    ///
    /// Attaching a handle that already owns a slot returns the same id and
    /// changes nothing. New slots start with default parameters.
    pub fn attach(&self, handle: HostHandle) -> Result<SessionId, ResourceError> {
        let mut guard = self.lock()?;
        let capacity = self.capacity;
        let table = guard.get_or_insert_with(|| SlotTable {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            active: 0,
        });

        if let Some(slot) = table.position(handle) {
            return SessionId::from_slot(slot).ok_or(ResourceError::TableFull { capacity });
        }

        let free = table
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ResourceError::TableFull { capacity })?;
        let id = SessionId::from_slot(free).ok_or(ResourceError::TableFull { capacity })?;

        table.slots[free] = Some(Slot {
            handle,
            params: CaptureParams::default(),
        });
        table.active += 1;
        tracing::debug!(session = %id, active = table.active, "attached");
        Ok(id)
    }

    /// Releases the slot owned by `handle`.
    ///
    /// Releases the table once no session remains.
    pub fn detach(&self, handle: HostHandle) -> Result<(), ResourceError> {
        let mut guard = self.lock()?;
        let table = guard
            .as_mut()
            .ok_or(ResourceError::UnknownHandle(handle.raw()))?;
        let slot = table
            .position(handle)
            .ok_or(ResourceError::UnknownHandle(handle.raw()))?;

        table.slots[slot] = None;
        table.active -= 1;
        tracing::debug!(slot, active = table.active, "detached");
        if table.active == 0 {
            *guard = None;
        }
        Ok(())
    }

    /// Looks up the session owned by `handle`.
    ///
    /// An absent handle, or a registry too busy to answer within the lock
    /// timeout, both yield `None`.
    pub fn find(&self, handle: HostHandle) -> Option<SessionId> {
        let guard = self.lock().ok()?;
        let table = guard.as_ref()?;
        table.position(handle).and_then(SessionId::from_slot)
    }

    /// Number of attached sessions.
    pub fn active_count(&self) -> usize {
        self.table
            .try_lock_for(self.timeout)
            .and_then(|guard| guard.as_ref().map(|t| t.active))
            .unwrap_or(0)
    }

    /// Returns `true` when no table is allocated.
    pub fn is_torn_down(&self) -> bool {
        self.table
            .try_lock_for(self.timeout)
            .is_some_and(|guard| guard.is_none())
    }

    /// Parameters stored for an attached session.
    pub fn params(&self, id: SessionId) -> Option<CaptureParams> {
        let guard = self.lock().ok()?;
        let slot = guard.as_ref()?.slots.get(id.slot())?.as_ref()?;
        Some(slot.params.clone())
    }

    /// Replaces the parameters stored for an attached session.
    pub fn set_params(&self, id: SessionId, params: CaptureParams) -> Result<(), ResourceError> {
        let mut guard = self.lock()?;
        let slot = guard
            .as_mut()
            .and_then(|t| t.slots.get_mut(id.slot()))
            .and_then(Option::as_mut)
            .ok_or(ResourceError::UnknownHandle(u64::from(id.get())))?;
        slot.params = params;
        Ok(())
    }
}

impl fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("capacity", &self.capacity)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}
