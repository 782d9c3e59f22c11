//! Request-local scope: the per-request token table of reference-counted
//! scope entities (spec.md §3 "RLS", §4.3, §9 "Scope tokens + graph
//! cycles").
//!
//! Cross-links between entities (a stream wrapping a stream) must go
//! through tokens, never raw owning pointers, so the slot table remains the
//! single owner and teardown is a single pass — see [`ScopeToken`].

use crate::error::{codes, ErrorCategory, PlumberError, Result};

mod stream;
pub use stream::{StreamHandle, StreamReadOutcome};

/// An object installable into an [`Rls`]. `free` runs exactly once, when
/// the entity's refcount reaches zero. `copy` backs `scope_copy`
/// (copy-on-write, spec.md §4.3); entities that cannot be duplicated leave
/// it `None` and `scope_copy` reports an error. The stream callbacks back
/// DRA (spec.md §4.1) and asynchronously-readable RLS objects.
pub trait ScopeEntity: Send + 'static {
    fn free(&mut self) {}

    fn copy(&self) -> Option<Box<dyn ScopeEntity>> {
        None
    }

    fn open_stream(&mut self) -> Option<StreamHandle> {
        None
    }

    fn read_stream(&mut self, buf: &mut [u8]) -> StreamReadOutcome {
        let _ = buf;
        StreamReadOutcome::Eof
    }

    fn eof_stream(&self) -> bool {
        true
    }

    /// A descriptor the runtime can poll instead of spinning while waiting
    /// for more stream data (spec.md §4.3). `None` means "always ready".
    fn ready_event(&self) -> Option<i32> {
        None
    }
}

/// Opaque 32-bit handle valid only within the request that issued it
/// (spec.md §3 "Scope token"). Packs a slot index and a per-request
/// generation so a token from a freed-and-reused slot is rejected rather
/// than resolving to an unrelated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeToken(u32);

impl ScopeToken {
    fn pack(slot: u16, generation: u16) -> Self {
        ScopeToken(u32::from(slot) | (u32::from(generation) << 16))
    }

    fn slot(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// The little-endian wire encoding used when a servlet writes a token
    /// to a pipe (spec.md §6 "Scope token on the wire").
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        ScopeToken(u32::from_le_bytes(bytes))
    }
}

struct Slot {
    entity: Box<dyn ScopeEntity>,
    refcount: u32,
    generation: u16,
    gc: bool,
}

/// Per-request token table (spec.md §3 "RLS", §4.3). Created on first
/// scope access within a request, destroyed after the request's last task
/// completes by draining every slot via decref.
#[derive(Default)]
pub struct Rls {
    slots: Vec<Option<Slot>>,
    free_list: Vec<usize>,
    gc_list: Vec<usize>,
}

impl Rls {
    pub fn new() -> Self {
        Self::default()
    }

    /// `scope_add`: installs `entity` at the next free slot. Non-GC
    /// entities start at refcount 1; GC entities start at 0 pending an
    /// explicit `incref` (spec.md §4.3).
    pub fn scope_add(&mut self, entity: Box<dyn ScopeEntity>, gc: bool) -> ScopeToken {
        let refcount = if gc { 0 } else { 1 };
        let slot_index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            self.slots.push(None);
            self.slots.len() - 1
        };
        let generation = self.slots[slot_index]
            .take()
            .map(|s| s.generation.wrapping_add(1))
            .unwrap_or(0);
        self.slots[slot_index] = Some(Slot {
            entity,
            refcount,
            generation,
            gc,
        });
        if gc {
            self.gc_list.push(slot_index);
        }
        ScopeToken::pack(slot_index as u16, generation)
    }

    fn slot(&self, token: ScopeToken) -> Result<&Slot> {
        self.slots
            .get(token.slot())
            .and_then(Option::as_ref)
            .filter(|s| s.generation == token.generation())
            .ok_or_else(invalid_token)
    }

    fn slot_mut(&mut self, token: ScopeToken) -> Result<&mut Slot> {
        self.slots
            .get_mut(token.slot())
            .and_then(Option::as_mut)
            .filter(|s| s.generation == token.generation())
            .ok_or_else(invalid_token)
    }

    /// `scope_get`: resolves a token to its entity within the issuing
    /// request only (spec.md §8 "Token validity").
    pub fn scope_get(&self, token: ScopeToken) -> Result<&dyn ScopeEntity> {
        self.slot(token).map(|s| s.entity.as_ref())
    }

    pub fn scope_get_mut(&mut self, token: ScopeToken) -> Result<&mut dyn ScopeEntity> {
        self.slot_mut(token).map(|s| s.entity.as_mut())
    }

    /// `scope_copy`: invokes the entity's `copy` callback and installs the
    /// result as a new, independent entity (spec.md §4.3, §8 round-trip
    /// "copy then mutate leaves the original byte-identical").
    pub fn scope_copy(&mut self, token: ScopeToken) -> Result<ScopeToken> {
        let gc = self.slot(token)?.gc;
        let copy = self
            .slot(token)?
            .entity
            .copy()
            .ok_or_else(|| {
                PlumberError::new(
                    codes::SCOPE_COPY_UNSUPPORTED,
                    ErrorCategory::Usage,
                    "entity does not support scope_copy",
                )
            })?;
        Ok(self.scope_add(copy, gc))
    }

    pub fn incref(&mut self, token: ScopeToken) -> Result<()> {
        self.slot_mut(token)?.refcount += 1;
        Ok(())
    }

    /// Decrements the refcount; at zero, runs `free` and reclaims the slot.
    pub fn decref(&mut self, token: ScopeToken) -> Result<()> {
        let slot_index = token.slot();
        let slot = self.slot_mut(token)?;
        slot.refcount = slot.refcount.saturating_sub(1);
        if slot.refcount == 0 {
            let mut slot = self.slots[slot_index].take().expect("checked above");
            slot.entity.free();
            self.free_list.push(slot_index);
        }
        Ok(())
    }

    /// Walks every still-occupied slot and decrements it once, running
    /// `free` at zero (spec.md §4.3 "Decref / destruction"). GC entities
    /// still reachable (non-zero after this pass) are the unreachable-set
    /// complement; nothing further references them once the request ends,
    /// so a single decref pass over every slot is sufficient cycle
    /// breaking here (no separate trace phase, since entities expose no
    /// `trace` callback — see DESIGN.md).
    pub fn teardown(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].is_some() {
                let mut slot = self.slots[index].take().unwrap();
                slot.entity.free();
            }
        }
        self.free_list.clear();
        self.gc_list.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Rls {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn invalid_token() -> PlumberError {
    PlumberError::new(
        codes::SCOPE_TOKEN_INVALID,
        ErrorCategory::Usage,
        "scope token invalid or from another request",
    )
}
