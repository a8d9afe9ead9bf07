use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filter::Filter;
use crate::todo::{Todo, normalize_text};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counts {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
}

impl Counts {
    /// Completed share rounded to a whole percent; `0` for an empty list.
    pub fn percent_complete(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let pct = (self.completed as f64 / self.total as f64) * 100.0;
        pct.round().clamp(0.0, 100.0) as u8
    }
}

/// A write as sent to the persistence backend, replayable against any copy
/// of the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Places `todo` directly before the record `before`, or last when `None`.
    /// When the anchor is gone the record goes ahead of the first older one.
    Insert { todo: Todo, before: Option<String> },
    SetCompleted { id: String, completed: bool },
    SetText { id: String, text: String },
    Remove { ids: Vec<String> },
}

impl Change {
    /// Records that are missing are skipped; an insert of a present id is
    /// ignored.
    pub fn apply_to(&self, todos: &mut Vec<Todo>) {
        match self {
            Self::Insert { todo, before } => {
                if todos.iter().any(|t| t.id == todo.id) {
                    return;
                }
                let anchored = before
                    .as_ref()
                    .map(|anchor| todos.iter().position(|t| &t.id == anchor));
                let at = match anchored {
                    None => todos.len(),
                    Some(Some(idx)) => idx,
                    Some(None) => todos
                        .iter()
                        .position(|t| t.created_at < todo.created_at)
                        .unwrap_or(todos.len()),
                };
                todos.insert(at, todo.clone());
            }
            Self::SetCompleted { id, completed } => {
                if let Some(todo) = todos.iter_mut().find(|t| &t.id == id) {
                    todo.completed = *completed;
                }
            }
            Self::SetText { id, text } => {
                if let Some(todo) = todos.iter_mut().find(|t| &t.id == id) {
                    todo.text = text.clone();
                }
            }
            Self::Remove { ids } => todos.retain(|t| !ids.contains(&t.id)),
        }
    }
}

/// In-process copy of the todo collection plus the active view filter.
///
/// Records are kept most-recent-first. Every change bumps `revision`.
#[derive(Debug, Clone, Default)]
pub struct TodoState {
    todos: Vec<Todo>,
    filter: Filter,
    revision: u64,
}

impl TodoState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_todos(todos: Vec<Todo>) -> Self {
        Self {
            todos,
            filter: Filter::All,
            revision: 0,
        }
    }

    pub fn todos(&self) -> &[Todo] {
        &self.todos
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
    }

    pub fn get(&self, id: &str) -> Option<&Todo> {
        self.todos.iter().find(|t| t.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.todos.iter().position(|t| t.id == id)
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Trims `text` and prepends a new active record. Blank input is ignored.
    pub fn add(&mut self, text: &str) -> Option<Todo> {
        let text = normalize_text(text)?;
        let todo = Todo::new_local(text, Todo::now_millis());
        self.prepend(todo.clone());
        Some(todo)
    }

    pub fn prepend(&mut self, todo: Todo) {
        self.todos.insert(0, todo);
        self.touch();
    }

    /// Flips `completed` and returns the new value.
    pub fn toggle(&mut self, id: &str) -> Option<bool> {
        let idx = self.position(id)?;
        let todo = &mut self.todos[idx];
        todo.completed = !todo.completed;
        let now = todo.completed;
        self.touch();
        Some(now)
    }

    /// Replaces the text and returns the previous one. Blank results are rejected.
    pub fn edit(&mut self, id: &str, text: &str) -> Option<String> {
        let text = normalize_text(text)?;
        let idx = self.position(id)?;
        let previous = std::mem::replace(&mut self.todos[idx].text, text);
        self.touch();
        Some(previous)
    }

    pub fn delete(&mut self, id: &str) -> Option<(usize, Todo)> {
        let idx = self.position(id)?;
        let removed = self.todos.remove(idx);
        self.touch();
        Some((idx, removed))
    }

    /// Drops every completed record in one step. Removed entries keep their
    /// former indices, in ascending order.
    pub fn clear_completed(&mut self) -> Vec<(usize, Todo)> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.todos.len());
        for (idx, todo) in std::mem::take(&mut self.todos).into_iter().enumerate() {
            if todo.completed {
                removed.push((idx, todo));
            } else {
                kept.push(todo);
            }
        }
        self.todos = kept;
        if !removed.is_empty() {
            self.touch();
        }
        removed
    }

    /// Swaps the record stored under `id` for `todo`, which may carry a new id.
    pub fn replace(&mut self, id: &str, todo: Todo) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        self.todos[idx] = todo;
        self.touch();
        true
    }

    /// Id of the record directly after `id`, if any.
    pub fn next_id_after(&self, id: &str) -> Option<String> {
        let idx = self.position(id)?;
        self.todos.get(idx + 1).map(|t| t.id.clone())
    }

    /// Replaces the whole collection. The filter is left alone.
    pub fn reset(&mut self, todos: Vec<Todo>) {
        debug!(
            revision = self.revision,
            from = self.todos.len(),
            to = todos.len(),
            "resetting collection"
        );
        self.todos = todos;
        self.touch();
    }

    pub fn filtered(&self) -> Vec<&Todo> {
        self.filtered_by(self.filter)
    }

    pub fn filtered_by(&self, filter: Filter) -> Vec<&Todo> {
        self.todos.iter().filter(|t| filter.matches(t)).collect()
    }

    pub fn counts(&self) -> Counts {
        let completed = self.todos.iter().filter(|t| t.completed).count();
        Counts {
            total: self.todos.len(),
            active: self.todos.len() - completed,
            completed,
        }
    }

    /// True when the list is non-empty and every record is completed.
    pub fn all_completed(&self) -> bool {
        !self.todos.is_empty() && self.todos.iter().all(|t| t.completed)
    }

    /// Finds the single id starting with `prefix`. Ambiguous or unknown
    /// prefixes yield `None`.
    pub fn resolve_id(&self, prefix: &str) -> Option<&str> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return None;
        }
        if let Some(exact) = self.get(prefix) {
            return Some(exact.id.as_str());
        }
        let mut hits = self.todos.iter().filter(|t| t.id.starts_with(prefix));
        let first = hits.next()?;
        if hits.next().is_some() {
            return None;
        }
        Some(first.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todo(id: &str, text: &str, completed: bool) -> Todo {
        Todo {
            id: id.to_string(),
            text: text.to_string(),
            completed,
            emoji: None,
            created_at: 0,
        }
    }

    #[test]
    fn whitespace_add_leaves_collection_unchanged() {
        let mut state = TodoState::new();
        assert!(state.add("  ").is_none());
        assert!(state.todos().is_empty());
        assert_eq!(state.revision(), 0);
    }

    #[test]
    fn add_prepends_trimmed_active_record() {
        let mut state = TodoState::new();
        state.add("first").unwrap();
        let second = state.add("  second  ").unwrap();

        assert_eq!(second.text, "second");
        assert!(!second.completed);
        assert_eq!(state.todos()[0].id, second.id);
        assert_eq!(state.todos()[1].text, "first");
    }

    #[test]
    fn toggle_round_trips() {
        let mut state = TodoState::new();
        let id = state.add("Buy milk").unwrap().id;

        assert_eq!(state.toggle(&id), Some(true));
        assert!(state.get(&id).unwrap().completed);
        assert_eq!(state.toggle(&id), Some(false));
        assert!(!state.get(&id).unwrap().completed);
        assert_eq!(state.toggle("missing"), None);
    }

    #[test]
    fn edit_trims_and_rejects_blank() {
        let mut state = TodoState::from_todos(vec![todo("1", "old", false)]);

        assert_eq!(state.edit("1", "   "), None);
        assert_eq!(state.get("1").unwrap().text, "old");

        assert_eq!(state.edit("1", " new "), Some("old".to_string()));
        assert_eq!(state.get("1").unwrap().text, "new");
        assert_eq!(state.edit("2", "x"), None);
    }

    #[test]
    fn counts_always_add_up() {
        let mut state = TodoState::from_todos(vec![
            todo("1", "a", true),
            todo("2", "b", false),
            todo("3", "c", true),
        ]);

        let check = |state: &TodoState| {
            let counts = state.counts();
            assert_eq!(counts.total, counts.active + counts.completed);
        };

        check(&state);
        state.toggle("2");
        check(&state);
        state.delete("1");
        check(&state);
        state.clear_completed();
        check(&state);
        assert_eq!(state.counts(), Counts::default());
    }

    #[test]
    fn clear_completed_empties_completed_view() {
        let mut state = TodoState::from_todos(vec![
            todo("1", "a", true),
            todo("2", "b", false),
            todo("3", "c", true),
        ]);

        let removed = state.clear_completed();
        assert_eq!(
            removed.iter().map(|(idx, t)| (*idx, t.id.as_str())).collect::<Vec<_>>(),
            vec![(0, "1"), (2, "3")]
        );
        assert!(state.filtered_by(Filter::Completed).is_empty());
        assert_eq!(state.todos().len(), 1);
    }

    #[test]
    fn filtered_follows_selected_filter() {
        let mut state = TodoState::from_todos(vec![
            todo("1", "a", true),
            todo("2", "b", false),
        ]);

        assert_eq!(state.filtered().len(), 2);
        state.set_filter(Filter::Active);
        let ids: Vec<_> = state.filtered().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["2".to_string()]);
    }

    #[test]
    fn all_completed_tracks_last_active_toggle() {
        let mut state = TodoState::from_todos(vec![
            todo("1", "a", true),
            todo("2", "b", false),
        ]);

        assert!(!state.all_completed());
        state.toggle("2");
        assert!(state.all_completed());
        state.toggle("2");
        assert!(!state.all_completed());

        assert!(!TodoState::new().all_completed());
    }

    #[test]
    fn percent_complete_rounds() {
        let counts = Counts {
            total: 3,
            active: 1,
            completed: 2,
        };
        assert_eq!(counts.percent_complete(), 67);
        assert_eq!(Counts::default().percent_complete(), 0);
    }

    #[test]
    fn reset_keeps_filter_and_bumps_revision() {
        let mut state = TodoState::from_todos(vec![todo("1", "a", false)]);
        state.set_filter(Filter::Active);
        state.add("b");
        let before = state.revision();

        state.reset(vec![todo("9", "z", true)]);

        assert_eq!(state.todos(), &[todo("9", "z", true)]);
        assert_eq!(state.filter(), Filter::Active);
        assert!(state.revision() > before);
    }

    #[test]
    fn next_id_after_points_at_following_record() {
        let state = TodoState::from_todos(vec![todo("1", "a", false), todo("2", "b", false)]);
        assert_eq!(state.next_id_after("1").as_deref(), Some("2"));
        assert_eq!(state.next_id_after("2"), None);
        assert_eq!(state.next_id_after("missing"), None);
    }

    fn ids(todos: &[Todo]) -> Vec<&str> {
        todos.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn insert_lands_before_its_anchor() {
        let mut todos = vec![todo("new", "n", false), todo("a", "a", false), todo("b", "b", false)];
        Change::Insert {
            todo: todo("x", "x", false),
            before: Some("b".to_string()),
        }
        .apply_to(&mut todos);
        assert_eq!(ids(&todos), vec!["new", "a", "x", "b"]);

        Change::Insert {
            todo: todo("last", "l", false),
            before: None,
        }
        .apply_to(&mut todos);
        assert_eq!(ids(&todos), vec!["new", "a", "x", "b", "last"]);

        Change::Insert {
            todo: todo("a", "dup", false),
            before: None,
        }
        .apply_to(&mut todos);
        assert_eq!(todos.len(), 5);
    }

    #[test]
    fn insert_without_anchor_falls_back_to_created_at() {
        let at = |id: &str, created_at| Todo {
            created_at,
            ..todo(id, id, false)
        };
        let mut todos = vec![at("c", 30), at("a", 10)];
        Change::Insert {
            todo: at("b", 20),
            before: Some("gone".to_string()),
        }
        .apply_to(&mut todos);
        assert_eq!(ids(&todos), vec!["c", "b", "a"]);
    }

    #[test]
    fn field_changes_skip_missing_records() {
        let mut todos = vec![todo("1", "a", false)];
        Change::SetCompleted {
            id: "1".to_string(),
            completed: true,
        }
        .apply_to(&mut todos);
        Change::SetText {
            id: "1".to_string(),
            text: "b".to_string(),
        }
        .apply_to(&mut todos);
        Change::SetText {
            id: "2".to_string(),
            text: "x".to_string(),
        }
        .apply_to(&mut todos);
        assert_eq!(todos, vec![todo("1", "b", true)]);

        Change::Remove {
            ids: vec!["1".to_string(), "2".to_string()],
        }
        .apply_to(&mut todos);
        assert!(todos.is_empty());
    }

    #[test]
    fn resolve_id_requires_unique_prefix() {
        let state = TodoState::from_todos(vec![
            todo("abc1", "a", false),
            todo("abd2", "b", false),
        ]);

        assert_eq!(state.resolve_id("abc"), Some("abc1"));
        assert_eq!(state.resolve_id("ab"), None);
        assert_eq!(state.resolve_id("abd2"), Some("abd2"));
        assert_eq!(state.resolve_id("zz"), None);
        assert_eq!(state.resolve_id(""), None);
    }
}
