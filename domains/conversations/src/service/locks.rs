//! Per-conversation exchange serialization
//!
//! One async mutex per conversation with an in-flight exchange. Entries are
//! created on demand and removed when the last holder or waiter lets go,
//! including waiters whose `acquire` is cancelled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

#[derive(Default)]
struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    /// Holders plus waiters
    users: usize,
}

type LockTable = HashMap<Uuid, Slot>;

#[derive(Default, Clone)]
pub struct ConversationLocks {
    table: Arc<Mutex<LockTable>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other exchange holds the conversation
    pub async fn acquire(&self, conversation_id: Uuid) -> ConversationGuard {
        let lock = {
            let mut table = lock_table(&self.table);
            let slot = table.entry(conversation_id).or_default();
            slot.users += 1;
            slot.lock.clone()
        };

        // Built before waiting so a dropped `acquire` still releases its slot
        let mut held = ConversationGuard {
            conversation_id,
            guard: None,
            table: self.table.clone(),
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// Conversations with a live lock entry
    pub fn tracked(&self) -> usize {
        lock_table(&self.table).len()
    }
}

fn lock_table(table: &Mutex<LockTable>) -> MutexGuard<'_, LockTable> {
    // The table holds no invariants a panicking holder could break
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held for the duration of one exchange
pub struct ConversationGuard {
    conversation_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<Mutex<LockTable>>,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut table = lock_table(&self.table);
        if let Some(slot) = table.get_mut(&self.conversation_id) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                table.remove(&self.conversation_id);
            }
        }
    }
}
