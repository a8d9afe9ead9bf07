//! Optimistic synchronization between the in-process [`TodoState`] and the
//! session's [`PersistenceBackend`].
//!
//! Every mutation is applied locally first. With the durable-local strategy
//! the whole collection is then written to its slot; with the remote strategy
//! exactly one remote call is issued.
//!
//! Alongside the visible state the layer keeps the collection as the backend
//! last acknowledged it, plus the writes still in flight. A refused write is
//! dropped and the visible state is rebuilt from that baseline with the
//! remaining in-flight writes replayed on top. With nothing else in flight
//! this is exactly the pre-mutation collection.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::{LocalDurable, PersistenceBackend};
use crate::celebrate::{CelebrationScheduler, ToggleEffect};
use crate::filter::Filter;
use crate::remote::TodoTable;
use crate::state::{Change, Counts, TodoState};
use crate::todo::{Todo, TodoPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Blank input or unknown id; nothing changed and nothing was sent.
    Rejected,
    /// Applied locally and written to the durable slot.
    Saved,
    /// Applied locally and acknowledged by the remote store.
    Confirmed,
    /// The remote store refused; the local change was undone.
    RolledBack,
}

impl SyncOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Saved | Self::Confirmed)
    }
}

/// Visible state plus what the backend is known to hold.
#[derive(Debug)]
struct Ledger {
    state: TodoState,
    confirmed: Vec<Todo>,
    /// Writes applied to `state` whose backend call has not returned.
    pending: Vec<(u64, Change)>,
    next_ticket: u64,
}

impl Ledger {
    fn new(state: TodoState) -> Self {
        Self {
            confirmed: state.todos().to_vec(),
            state,
            pending: Vec::new(),
            next_ticket: 0,
        }
    }

    fn track(&mut self, change: Change) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending.push((ticket, change));
        ticket
    }

    fn take(&mut self, ticket: u64) -> Option<Change> {
        let idx = self.pending.iter().position(|(t, _)| *t == ticket)?;
        Some(self.pending.remove(idx).1)
    }

    fn acknowledge(&mut self, ticket: u64) {
        if let Some(change) = self.take(ticket) {
            change.apply_to(&mut self.confirmed);
        }
    }

    fn reject(&mut self, ticket: u64) {
        self.take(ticket);
        let mut todos = self.confirmed.clone();
        for (_, change) in &self.pending {
            change.apply_to(&mut todos);
        }
        debug!(in_flight = self.pending.len(), "rebuilding from acknowledged collection");
        self.state.reset(todos);
    }

    /// Swaps a confirmed insert's temporary record for the stored row.
    fn replace_confirmed(&mut self, temp_id: &str, saved: Todo) -> bool {
        if let Some(slot) = self.confirmed.iter_mut().find(|t| t.id == temp_id) {
            *slot = saved.clone();
        }
        self.state.replace(temp_id, saved)
    }
}

enum Attempt<P, R> {
    Rejected,
    Saved(P),
    Confirmed(R),
    RolledBack,
}

impl<P, R> Attempt<P, R> {
    fn outcome(&self) -> SyncOutcome {
        match self {
            Self::Rejected => SyncOutcome::Rejected,
            Self::Saved(_) => SyncOutcome::Saved,
            Self::Confirmed(_) => SyncOutcome::Confirmed,
            Self::RolledBack => SyncOutcome::RolledBack,
        }
    }
}

/// Shared handle over the todo collection and its persistence.
///
/// Cloning is cheap; all clones see the same state. The lock is never held
/// across an await.
#[derive(Clone)]
pub struct SyncLayer {
    ledger: Arc<Mutex<Ledger>>,
    backend: PersistenceBackend,
    celebrations: Arc<CelebrationScheduler>,
}

impl SyncLayer {
    pub fn new(
        state: TodoState,
        backend: PersistenceBackend,
        celebrations: CelebrationScheduler,
    ) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger::new(state))),
            backend,
            celebrations: Arc::new(celebrations),
        }
    }

    /// Reads the initial collection from `backend`. Load failures start empty.
    #[tracing::instrument(skip_all, fields(backend = backend.kind()))]
    pub async fn load(backend: PersistenceBackend, celebrations: CelebrationScheduler) -> Self {
        let todos = backend.load().await;
        info!(count = todos.len(), "loaded todos");
        Self::new(TodoState::from_todos(todos), backend, celebrations)
    }

    pub fn backend(&self) -> &PersistenceBackend {
        &self.backend
    }

    pub fn celebrations(&self) -> &CelebrationScheduler {
        &self.celebrations
    }

    /// Runs `f` against the current state under the lock.
    pub fn with_state<T>(&self, f: impl FnOnce(&TodoState) -> T) -> T {
        f(&self.ledger.lock().state)
    }

    pub fn todos(&self) -> Vec<Todo> {
        self.with_state(|s| s.todos().to_vec())
    }

    pub fn filtered(&self) -> Vec<Todo> {
        self.with_state(|s| s.filtered().into_iter().cloned().collect())
    }

    pub fn counts(&self) -> Counts {
        self.with_state(TodoState::counts)
    }

    pub fn all_completed(&self) -> bool {
        self.with_state(TodoState::all_completed)
    }

    pub fn filter(&self) -> Filter {
        self.with_state(TodoState::filter)
    }

    /// View-only; the filter is never persisted.
    pub fn set_filter(&self, filter: Filter) {
        self.ledger.lock().state.set_filter(filter);
    }

    pub fn resolve_id(&self, prefix: &str) -> Option<String> {
        self.with_state(|s| s.resolve_id(prefix).map(str::to_string))
    }

    /// Returns the outcome and, when applied, the record as it now stands.
    #[tracing::instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn add(&self, text: &str) -> (SyncOutcome, Option<Todo>) {
        let attempt = self
            .optimistic(
                "add",
                |state| {
                    let todo = state.add(text)?;
                    let change = Change::Insert {
                        todo: todo.clone(),
                        before: state.next_id_after(&todo.id),
                    };
                    Some((todo, change))
                },
                |table, todo| async move {
                    let saved = table.insert(&todo).await?;
                    Ok::<_, anyhow::Error>((todo.id, saved))
                },
            )
            .await;

        let outcome = attempt.outcome();
        let record = match attempt {
            Attempt::Saved(todo) => Some(todo),
            Attempt::Confirmed((temp_id, saved)) => {
                if !self.ledger.lock().replace_confirmed(&temp_id, saved.clone()) {
                    warn!(
                        temp_id = %temp_id,
                        id = %saved.id,
                        "record removed before insert was confirmed"
                    );
                }
                Some(saved)
            }
            Attempt::Rejected | Attempt::RolledBack => None,
        };

        if outcome.is_applied() {
            self.celebrations.cancel();
        }
        (outcome, record)
    }

    #[tracing::instrument(skip(self))]
    pub async fn toggle(&self, id: &str) -> SyncOutcome {
        let attempt = self
            .optimistic(
                "toggle",
                |state| {
                    let now = state.toggle(id)?;
                    let effect = ToggleEffect::after_toggle(state, now);
                    let change = Change::SetCompleted {
                        id: id.to_string(),
                        completed: now,
                    };
                    Some(((id.to_string(), now, effect), change))
                },
                |table, (id, now, effect)| async move {
                    table.update(&id, &TodoPatch::completed(now)).await?;
                    Ok::<_, anyhow::Error>(effect)
                },
            )
            .await;

        let outcome = attempt.outcome();
        let effect = match attempt {
            Attempt::Saved((_, _, effect)) => Some(effect),
            Attempt::Confirmed(effect) => Some(effect),
            Attempt::Rejected | Attempt::RolledBack => None,
        };
        if let Some(effect) = effect {
            self.celebrations.on_toggle(effect);
        }
        outcome
    }

    #[tracing::instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn edit(&self, id: &str, text: &str) -> SyncOutcome {
        self.optimistic(
            "edit",
            |state| {
                state.edit(id, text)?;
                let applied = state.get(id)?.text.clone();
                let change = Change::SetText {
                    id: id.to_string(),
                    text: applied.clone(),
                };
                Some(((id.to_string(), applied), change))
            },
            |table, (id, applied)| async move {
                table.update(&id, &TodoPatch::text(applied)).await
            },
        )
        .await
        .outcome()
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> SyncOutcome {
        self.optimistic(
            "delete",
            |state| {
                state.delete(id)?;
                let change = Change::Remove {
                    ids: vec![id.to_string()],
                };
                Some((id.to_string(), change))
            },
            |table, id| async move { table.delete(&id).await },
        )
        .await
        .outcome()
    }

    #[tracing::instrument(skip(self))]
    pub async fn clear_completed(&self) -> SyncOutcome {
        self.optimistic(
            "clear_completed",
            |state| {
                let removed = state.clear_completed();
                if removed.is_empty() {
                    return None;
                }
                let ids: Vec<String> = removed.iter().map(|(_, t)| t.id.clone()).collect();
                let change = Change::Remove { ids: ids.clone() };
                Some((ids, change))
            },
            |table, ids| async move { table.delete_many(&ids).await },
        )
        .await
        .outcome()
    }

    /// Apply, persist, and on a refused write rebuild from the acknowledged
    /// collection.
    ///
    /// `mutate` returns the payload for the backend call plus the change it
    /// made, or `None` to reject without touching the backend.
    async fn optimistic<P, R, M, C, Fut>(
        &self,
        op: &'static str,
        mutate: M,
        remote_call: C,
    ) -> Attempt<P, R>
    where
        M: FnOnce(&mut TodoState) -> Option<(P, Change)>,
        C: FnOnce(Arc<dyn TodoTable>, P) -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let (payload, ticket) = {
            let mut ledger = self.ledger.lock();
            let Some((payload, change)) = mutate(&mut ledger.state) else {
                debug!(op, "mutation rejected");
                return Attempt::Rejected;
            };
            (payload, ledger.track(change))
        };

        let table = match &self.backend {
            PersistenceBackend::LocalDurable(local) => {
                self.persist_local(op, local);
                self.ledger.lock().acknowledge(ticket);
                return Attempt::Saved(payload);
            }
            PersistenceBackend::Remote(remote) => remote.table(),
        };

        match remote_call(table, payload).await {
            Ok(value) => {
                debug!(op, ticket, "remote write confirmed");
                self.ledger.lock().acknowledge(ticket);
                Attempt::Confirmed(value)
            }
            Err(err) => {
                error!(op, ticket, error = %format!("{err:#}"), "remote write failed; rolling back");
                self.ledger.lock().reject(ticket);
                Attempt::RolledBack
            }
        }
    }

    /// Whole-collection overwrite. Failures are logged, never rolled back.
    fn persist_local(&self, op: &'static str, local: &LocalDurable) {
        let todos = self.todos();
        if let Err(err) = local.save(&todos) {
            error!(op, error = %format!("{err:#}"), "failed writing local todos");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, text: &str, completed: bool) -> Todo {
        Todo {
            id: id.to_string(),
            text: text.to_string(),
            completed,
            emoji: None,
            created_at: 0,
        }
    }

    fn toggle(ledger: &mut Ledger, id: &str) -> u64 {
        let completed = ledger.state.toggle(id).expect("known id");
        ledger.track(Change::SetCompleted {
            id: id.to_string(),
            completed,
        })
    }

    #[test]
    fn rejected_writes_on_one_record_unwind_in_any_order() {
        let mut ledger = Ledger::new(TodoState::from_todos(vec![record("a", "A", false)]));
        let first = toggle(&mut ledger, "a");
        let second = toggle(&mut ledger, "a");

        ledger.reject(first);
        assert!(!ledger.state.get("a").unwrap().completed);
        ledger.reject(second);
        assert_eq!(ledger.state.todos(), ledger.confirmed.as_slice());
        assert!(!ledger.state.get("a").unwrap().completed);

        let first = toggle(&mut ledger, "a");
        let second = toggle(&mut ledger, "a");
        ledger.reject(second);
        assert!(ledger.state.get("a").unwrap().completed);
        ledger.reject(first);
        assert!(!ledger.state.get("a").unwrap().completed);
    }

    #[test]
    fn rejection_keeps_other_in_flight_and_acknowledged_writes() {
        let mut ledger = Ledger::new(TodoState::from_todos(vec![
            record("a", "A", false),
            record("b", "B", false),
        ]));
        let toggled = toggle(&mut ledger, "a");

        ledger.state.edit("a", "Alpha");
        let edited = ledger.track(Change::SetText {
            id: "a".to_string(),
            text: "Alpha".to_string(),
        });
        ledger.state.delete("b");
        let deleted = ledger.track(Change::Remove {
            ids: vec!["b".to_string()],
        });

        ledger.acknowledge(deleted);
        ledger.reject(toggled);

        assert_eq!(ledger.state.todos(), &[record("a", "Alpha", false)]);
        assert_eq!(ledger.pending.len(), 1);

        ledger.acknowledge(edited);
        assert_eq!(ledger.confirmed, vec![record("a", "Alpha", false)]);
    }

    #[test]
    fn confirmed_insert_takes_server_row() {
        let mut ledger = Ledger::new(TodoState::from_todos(vec![record("a", "A", false)]));
        let temp = ledger.state.add("new").unwrap();
        let ticket = ledger.track(Change::Insert {
            todo: temp.clone(),
            before: ledger.state.next_id_after(&temp.id),
        });
        ledger.acknowledge(ticket);

        let saved = Todo {
            created_at: 42,
            ..temp.clone()
        };
        assert!(ledger.replace_confirmed(&temp.id, saved.clone()));
        assert_eq!(ledger.confirmed[0], saved);
        assert_eq!(ledger.state.todos()[0], saved);
    }
}
