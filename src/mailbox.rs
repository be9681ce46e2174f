//! Single-slot handoff between the inference flow and the overlay flow.
//!
//! The slot holds at most one value. Publishing replaces the resident value
//! and drops it while the lock is still held, so a reader never observes a
//! half-replaced slot and every value is dropped exactly once.
//!
//! A [`Snapshot`] keeps the lock for as long as it lives. Borrowed results
//! cannot escape it:
//!
//! ```compile_fail
//! use infer_overlay::Mailbox;
//!
//! let mailbox = Mailbox::new();
//! let payload = {
//!     let snapshot = mailbox.snapshot().unwrap();
//!     snapshot.payload()
//! };
//! println!("{:?}", payload);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::envelope::{Envelope, Payload, ResultKind};
use crate::error::FlowError;
use crate::frame::VideoInfo;

// ----------------------------------------------------------------------------
// Slot<T>
// ----------------------------------------------------------------------------

/// Mutex-guarded single value, latest wins.
#[derive(Debug)]
pub struct Slot<T> {
    name: &'static str,
    inner: Mutex<Option<T>>,
}

impl<T> Slot<T> {
    /// `name` identifies the slot in poisoning errors.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(None),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Option<T>>, FlowError> {
        self.inner
            .lock()
            .map_err(|_| FlowError::LockPoisoned(self.name))
    }

    /// Store `value`, dropping the previous one before the lock is released.
    /// Returns whether a previous value was dropped.
    pub fn publish(&self, value: T) -> Result<bool, FlowError> {
        let mut guard = self.lock()?;
        let previous = guard.replace(value);
        let replaced = previous.is_some();
        drop(previous);
        Ok(replaced)
    }

    /// Store `value` and hand the previous one back to the caller.
    pub fn swap(&self, value: T) -> Result<Option<T>, FlowError> {
        Ok(self.lock()?.replace(value))
    }

    pub fn take(&self) -> Result<Option<T>, FlowError> {
        Ok(self.lock()?.take())
    }

    pub fn is_occupied(&self) -> Result<bool, FlowError> {
        Ok(self.lock()?.is_some())
    }
}

// ----------------------------------------------------------------------------
// Mailbox
// ----------------------------------------------------------------------------

/// Holds the latest [`Envelope`] for the overlay flow, plus the display
/// geometry negotiated on that flow.
#[derive(Debug)]
pub struct Mailbox {
    slot: Slot<Envelope>,
    display: Mutex<Option<VideoInfo>>,
    publications: AtomicU64,
    disposals: AtomicU64,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            slot: Slot::new("mailbox"),
            display: Mutex::new(None),
            publications: AtomicU64::new(0),
            disposals: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, envelope: Envelope) -> Result<(), FlowError> {
        let kind = envelope.kind();
        let replaced = self.slot.publish(envelope)?;
        self.publications.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.disposals.fetch_add(1, Ordering::Relaxed);
        }
        log::debug!("mailbox: published {} result (replaced: {})", kind, replaced);
        Ok(())
    }

    /// Lock the mailbox for a read-and-render pass.
    pub fn snapshot(&self) -> Result<Snapshot<'_>, FlowError> {
        let guard = self.slot.lock()?;
        let display = self.display()?;
        Ok(Snapshot { guard, display })
    }

    pub fn set_display(&self, info: VideoInfo) -> Result<(), FlowError> {
        *self
            .display
            .lock()
            .map_err(|_| FlowError::LockPoisoned("display"))? = Some(info);
        Ok(())
    }

    pub fn display(&self) -> Result<Option<VideoInfo>, FlowError> {
        Ok(*self
            .display
            .lock()
            .map_err(|_| FlowError::LockPoisoned("display"))?)
    }

    /// Drop the resident envelope, if any. Returns whether one was dropped.
    pub fn clear(&self) -> Result<bool, FlowError> {
        let mut guard = self.slot.lock()?;
        let cleared = guard.take().is_some();
        if cleared {
            self.disposals.fetch_add(1, Ordering::Relaxed);
        }
        Ok(cleared)
    }

    pub fn is_empty(&self) -> Result<bool, FlowError> {
        Ok(!self.slot.is_occupied()?)
    }

    pub fn publications(&self) -> u64 {
        self.publications.load(Ordering::Relaxed)
    }

    /// Envelopes dropped by replacement or clearing.
    pub fn disposals(&self) -> u64 {
        self.disposals.load(Ordering::Relaxed)
    }
}

/// Locked view of the mailbox.
pub struct Snapshot<'a> {
    guard: MutexGuard<'a, Option<Envelope>>,
    display: Option<VideoInfo>,
}

impl Snapshot<'_> {
    pub fn envelope(&self) -> Option<&Envelope> {
        self.guard.as_ref()
    }

    /// `ResultKind::None` when empty.
    pub fn kind(&self) -> ResultKind {
        self.envelope().map_or(ResultKind::None, Envelope::kind)
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.envelope().map(Envelope::payload)
    }

    pub fn model_size(&self) -> Option<(u32, u32)> {
        self.envelope().map(Envelope::model_size)
    }

    pub fn confidence_threshold(&self) -> Option<f32> {
        self.envelope().map(Envelope::confidence_threshold)
    }

    pub fn display(&self) -> Option<VideoInfo> {
        self.display
    }
}
