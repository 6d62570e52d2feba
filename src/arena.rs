//! Pass-scoped buffer registry.
//!
//! Every intermediate buffer of a processing pass is leased from a
//! [`PassArena`]. A lease settles its registry slot exactly once: when it is
//! dropped, released explicitly, or handed to the caller. Leases borrow the
//! arena, so the compiler guarantees they are all settled before the arena
//! itself goes away at the end of the pass.

use crate::error::ForensicError;
use std::cell::{Cell, RefCell};
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Live,
    Released,
    HandedOff,
}

#[derive(Debug)]
struct Slot {
    label: &'static str,
    bytes: usize,
    state: SlotState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub leased: usize,
    pub released: usize,
    pub handed_off: usize,
    pub failed_releases: usize,
    pub live_bytes: usize,
    pub peak_bytes: usize,
}

impl ArenaStats {
    pub fn outstanding(&self) -> usize {
        self.leased - self.released - self.handed_off
    }
}

#[derive(Debug)]
pub struct PassArena {
    pass_id: u64,
    slots: RefCell<Vec<Slot>>,
    live_bytes: Cell<usize>,
    peak_bytes: Cell<usize>,
    failed_releases: Cell<usize>,
}

impl PassArena {
    pub fn new(pass_id: u64) -> Self {
        Self {
            pass_id,
            slots: RefCell::new(Vec::new()),
            live_bytes: Cell::new(0),
            peak_bytes: Cell::new(0),
            failed_releases: Cell::new(0),
        }
    }

    /// Lease a fresh buffer of `len` copies of `fill`.
    pub fn lease<T: Clone>(&self, label: &'static str, len: usize, fill: T) -> Lease<'_, T> {
        self.adopt(label, vec![fill; len])
    }

    /// Register an already-allocated buffer with this pass.
    pub fn adopt<T>(&self, label: &'static str, buffer: Vec<T>) -> Lease<'_, T> {
        let bytes = std::mem::size_of_val(buffer.as_slice());
        let slot = {
            let mut slots = self.slots.borrow_mut();
            slots.push(Slot {
                label,
                bytes,
                state: SlotState::Live,
            });
            slots.len() - 1
        };

        let live = self.live_bytes.get() + bytes;
        self.live_bytes.set(live);
        self.peak_bytes.set(self.peak_bytes.get().max(live));

        Lease {
            arena: self,
            slot,
            buffer: Some(buffer),
        }
    }

    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            failed_releases: self.failed_releases.get(),
            live_bytes: self.live_bytes.get(),
            peak_bytes: self.peak_bytes.get(),
            ..ArenaStats::default()
        };
        if let Ok(slots) = self.slots.try_borrow() {
            stats.leased = slots.len();
            for slot in slots.iter() {
                match slot.state {
                    SlotState::Live => {}
                    SlotState::Released => stats.released += 1,
                    SlotState::HandedOff => stats.handed_off += 1,
                }
            }
        }
        stats
    }

    fn settle(&self, slot: usize, outcome: SlotState) {
        if let Err(err) = self.try_settle(slot, outcome) {
            self.failed_releases.set(self.failed_releases.get() + 1);
            warn!("[arena] pass {}: {err}", self.pass_id);
        }
    }

    fn try_settle(&self, slot: usize, outcome: SlotState) -> Result<(), ForensicError> {
        let mut slots = self.slots.try_borrow_mut().map_err(|_| {
            ForensicError::ResourceRelease(format!("registry busy while settling slot {slot}"))
        })?;
        let entry = slots
            .get_mut(slot)
            .ok_or_else(|| ForensicError::ResourceRelease(format!("unknown slot {slot}")))?;
        if entry.state != SlotState::Live {
            return Err(ForensicError::ResourceRelease(format!(
                "'{}' already settled as {:?}",
                entry.label, entry.state
            )));
        }
        entry.state = outcome;
        self.live_bytes
            .set(self.live_bytes.get().saturating_sub(entry.bytes));
        Ok(())
    }
}

impl Drop for PassArena {
    fn drop(&mut self) {
        let stats = self.stats();
        if stats.outstanding() > 0 {
            let leaked: Vec<&'static str> = self
                .slots
                .get_mut()
                .iter()
                .filter(|slot| slot.state == SlotState::Live)
                .map(|slot| slot.label)
                .collect();
            warn!(
                "[arena] pass {} ended with {} unsettled buffers: {leaked:?}",
                self.pass_id,
                stats.outstanding()
            );
        }
        debug!(
            "[arena] pass {}: {} leased, {} released, {} handed off, peak {} bytes",
            self.pass_id, stats.leased, stats.released, stats.handed_off, stats.peak_bytes
        );
    }
}

/// A registered buffer. Derefs to its contents.
#[derive(Debug)]
pub struct Lease<'a, T> {
    arena: &'a PassArena,
    slot: usize,
    buffer: Option<Vec<T>>,
}

impl<'a, T> Lease<'a, T> {
    pub fn release(self) {
        drop(self);
    }

    /// Hand the buffer to the caller; the slot is settled as handed off.
    pub fn into_inner(mut self) -> Vec<T> {
        let buffer = self.buffer.take().unwrap_or_default();
        self.arena.settle(self.slot, SlotState::HandedOff);
        buffer
    }
}

impl<T> Deref for Lease<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl<T> DerefMut for Lease<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl<T> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            drop(buffer);
            self.arena.settle(self.slot, SlotState::Released);
        }
    }
}
