//! Range diff between two keyed, ordered sequences.
//!
//! [`diff`] walks the published sequence `old` and the fresh query result
//! `new` with one cursor each and emits contiguous insert/update/remove
//! ranges. Edits are expressed against the sequence as it looks after the
//! previous edits were applied, so [`apply`] replays them front to back.
//!
//! While walking, the partially patched sequence is always
//! `new[..j] ++ old[i..]`, so every edit happens at index `j`.

use std::collections::HashMap;
use std::hash::Hash;

/// One contiguous edit
#[derive(Debug, Clone, PartialEq)]
pub enum RowEdit<T> {
    Insert { index: usize, rows: Vec<T> },
    Update { index: usize, rows: Vec<T> },
    Remove { index: usize, count: usize },
}

impl<T> RowEdit<T> {
    pub fn index(&self) -> usize {
        match self {
            RowEdit::Insert { index, .. }
            | RowEdit::Update { index, .. }
            | RowEdit::Remove { index, .. } => *index,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RowEdit::Insert { rows, .. } | RowEdit::Update { rows, .. } => rows.len(),
            RowEdit::Remove { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Open range being accumulated
struct Pending<T> {
    edits: Vec<RowEdit<T>>,
    open: Option<RowEdit<T>>,
}

impl<T> Pending<T> {
    fn new() -> Self {
        Self {
            edits: Vec::new(),
            open: None,
        }
    }

    fn close(&mut self) {
        if let Some(edit) = self.open.take() {
            self.edits.push(edit);
        }
    }

    fn insert(&mut self, at: usize, row: T) {
        if let Some(RowEdit::Insert { index, rows }) = &mut self.open
            && *index + rows.len() == at
        {
            rows.push(row);
            return;
        }
        self.close();
        self.open = Some(RowEdit::Insert {
            index: at,
            rows: vec![row],
        });
    }

    fn update(&mut self, at: usize, row: T) {
        if let Some(RowEdit::Update { index, rows }) = &mut self.open
            && *index + rows.len() == at
        {
            rows.push(row);
            return;
        }
        self.close();
        self.open = Some(RowEdit::Update {
            index: at,
            rows: vec![row],
        });
    }

    fn remove(&mut self, at: usize) {
        if let Some(RowEdit::Remove { index, count }) = &mut self.open
            && *index == at
        {
            *count += 1;
            return;
        }
        self.close();
        self.open = Some(RowEdit::Remove { index: at, count: 1 });
    }

    fn finish(mut self) -> Vec<RowEdit<T>> {
        self.close();
        self.edits
    }
}

/// Compute the edits that turn `old` into `new`. Keys must be unique
/// within each sequence. Runs in `O(|old| + |new|)`.
pub fn diff<T, K, F>(old: &[T], new: &[T], key: F) -> Vec<RowEdit<T>>
where
    T: Clone + PartialEq,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let old_pos: HashMap<K, usize> = old.iter().enumerate().map(|(i, r)| (key(r), i)).collect();

    let mut pending = Pending::new();
    let (mut i, mut j) = (0, 0);

    while i < old.len() || j < new.len() {
        if i < old.len() && j < new.len() && key(&old[i]) == key(&new[j]) {
            if old[i] != new[j] {
                pending.update(j, new[j].clone());
            } else {
                pending.close();
            }
            i += 1;
            j += 1;
            continue;
        }

        let new_not_in_rest_of_old = j < new.len()
            && old_pos
                .get(&key(&new[j]))
                .is_none_or(|&pos| pos < i);

        if new_not_in_rest_of_old {
            pending.insert(j, new[j].clone());
            j += 1;
        } else {
            // Either old[i] is gone from `new`, or both rows moved. Removing
            // old[i] handles both: a moved row is re-inserted when `new`
            // reaches it, since it is then behind the old cursor.
            debug_assert!(i < old.len());
            pending.remove(j);
            i += 1;
        }
    }

    pending.finish()
}

/// Replay `edits` on `rows`.
pub fn apply<T: Clone>(rows: &mut Vec<T>, edits: &[RowEdit<T>]) {
    for edit in edits {
        match edit {
            RowEdit::Insert { index, rows: new } => {
                let tail = rows.split_off(*index);
                rows.extend(new.iter().cloned());
                rows.extend(tail);
            }
            RowEdit::Update { index, rows: new } => {
                for (offset, row) in new.iter().enumerate() {
                    rows[index + offset] = row.clone();
                }
            }
            RowEdit::Remove { index, count } => {
                rows.drain(*index..*index + *count);
            }
        }
    }
}
