// Observable collections.
//
// `TrackedList` is the reconciliation primitive shared by every
// server-backed collection: labels on an issue, an `EntityList`, a
// page of a `PagedList`. It diffs an incoming snapshot against the
// current items and emits the smallest change sequence it can find.

mod entity_list;
mod paged;

use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;

pub use entity_list::EntityList;
pub use paged::{Page, PagedList};

/// Capacity of a list's change-notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// One observed mutation of a [`TrackedList`].
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange<T> {
    /// `item` appeared at `index`.
    Inserted { index: usize, item: T },
    /// A contiguous run of `items` starting at `index` disappeared.
    Removed { index: usize, items: Vec<T> },
    /// Nothing survived; the list was rebuilt from scratch.
    Reset,
}

/// An ordered collection that updates itself by reconciling against
/// server snapshots instead of being replaced wholesale.
#[derive(Debug)]
pub struct TrackedList<T> {
    items: RwLock<Vec<T>>,
    changes: broadcast::Sender<ListChange<T>>,
}

impl<T> TrackedList<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub(crate) fn new() -> Self {
        Self::from_items(Vec::new())
    }

    pub(crate) fn from_items(items: Vec<T>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            items: RwLock::new(items),
            changes,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// The item at `index`, if the list is currently that long.
    pub fn get(&self, index: usize) -> Option<T> {
        self.read().get(index).cloned()
    }

    /// A point-in-time copy of the whole list.
    pub fn snapshot(&self) -> Vec<T> {
        self.read().clone()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.read().contains(item)
    }

    /// Subscribe to mutations. Slow subscribers observe
    /// `RecvError::Lagged` rather than blocking updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ListChange<T>> {
        self.changes.subscribe()
    }

    /// Reconcile the list against an incoming snapshot.
    ///
    /// A single greedy forward pass. Each incoming item is looked for
    /// at or after the current position; a match further ahead removes
    /// the skipped run in one notification, a miss either truncates
    /// the unmatched tail (or resets the whole list when nothing
    /// matched yet) and appends. Duplicate incoming items are kept as
    /// distinct occurrences. Anything left over past the end of the
    /// incoming snapshot is removed.
    pub(crate) fn reconcile(&self, incoming: Vec<T>) {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let mut position = 0usize;

        for item in incoming {
            let found = items[position..]
                .iter()
                .position(|existing| *existing == item)
                .map(|offset| position + offset);

            match found {
                Some(matched) => {
                    if matched > position {
                        let removed: Vec<T> = items.drain(position..matched).collect();
                        self.notify(ListChange::Removed {
                            index: position,
                            items: removed,
                        });
                    }
                }
                None => {
                    if items.len() > position {
                        if position == 0 {
                            items.clear();
                            self.notify(ListChange::Reset);
                        } else {
                            let removed: Vec<T> = items.drain(position..).collect();
                            self.notify(ListChange::Removed {
                                index: position,
                                items: removed,
                            });
                        }
                    }
                    items.push(item.clone());
                    self.notify(ListChange::Inserted {
                        index: position,
                        item,
                    });
                }
            }
            position += 1;
        }

        if items.len() > position {
            let removed: Vec<T> = items.drain(position..).collect();
            self.notify(ListChange::Removed {
                index: position,
                items: removed,
            });
        }
    }

    fn notify(&self, change: ListChange<T>) {
        let _ = self.changes.send(change);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<T>> {
        self.items.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn drain_changes(receiver: &mut broadcast::Receiver<ListChange<char>>) -> Vec<ListChange<char>> {
        let mut changes = Vec::new();
        while let Ok(change) = receiver.try_recv() {
            changes.push(change);
        }
        changes
    }

    #[test]
    fn matching_snapshot_is_a_no_op() {
        let list = TrackedList::from_items(vec!['a', 'b', 'c']);
        let mut changes = list.subscribe();

        list.reconcile(vec!['a', 'b', 'c']);

        assert_eq!(list.snapshot(), vec!['a', 'b', 'c']);
        assert!(drain_changes(&mut changes).is_empty());
    }

    #[test]
    fn one_removal_and_one_append() {
        let list = TrackedList::from_items(vec!['a', 'b', 'c', 'd']);
        let mut changes = list.subscribe();

        list.reconcile(vec!['a', 'c', 'd', 'e']);

        assert_eq!(list.snapshot(), vec!['a', 'c', 'd', 'e']);
        assert_eq!(
            drain_changes(&mut changes),
            vec![
                ListChange::Removed {
                    index: 1,
                    items: vec!['b']
                },
                ListChange::Inserted {
                    index: 3,
                    item: 'e'
                },
            ]
        );
    }

    #[test]
    fn contiguous_removal_is_one_notification() {
        let list = TrackedList::from_items(vec!['a', 'b', 'c', 'd']);
        let mut changes = list.subscribe();

        list.reconcile(vec!['a', 'd']);

        assert_eq!(list.snapshot(), vec!['a', 'd']);
        assert_eq!(
            drain_changes(&mut changes),
            vec![ListChange::Removed {
                index: 1,
                items: vec!['b', 'c']
            }]
        );
    }

    #[test]
    fn full_replacement_is_a_single_reset() {
        let list = TrackedList::from_items(vec!['a', 'b']);
        let mut changes = list.subscribe();

        list.reconcile(vec!['x', 'y']);

        assert_eq!(list.snapshot(), vec!['x', 'y']);
        let observed = drain_changes(&mut changes);
        assert_eq!(
            observed,
            vec![
                ListChange::Reset,
                ListChange::Inserted { index: 0, item: 'x' },
                ListChange::Inserted { index: 1, item: 'y' },
            ]
        );
        assert_eq!(
            observed
                .iter()
                .filter(|change| matches!(change, ListChange::Reset))
                .count(),
            1
        );
    }

    #[test]
    fn unmatched_tail_past_a_match_is_truncated_then_appended() {
        let list = TrackedList::from_items(vec!['a', 'b']);
        let mut changes = list.subscribe();

        list.reconcile(vec!['a', 'c']);

        assert_eq!(list.snapshot(), vec!['a', 'c']);
        assert_eq!(
            drain_changes(&mut changes),
            vec![
                ListChange::Removed {
                    index: 1,
                    items: vec!['b']
                },
                ListChange::Inserted { index: 1, item: 'c' },
            ]
        );
    }

    #[test]
    fn leftover_tail_is_cleared() {
        let list = TrackedList::from_items(vec!['a', 'b', 'c']);

        list.reconcile(vec!['a']);

        assert_eq!(list.snapshot(), vec!['a']);
    }

    #[test]
    fn empty_snapshot_clears_everything() {
        let list = TrackedList::from_items(vec!['a', 'b']);
        let mut changes = list.subscribe();

        list.reconcile(Vec::new());

        assert!(list.is_empty());
        assert_eq!(
            drain_changes(&mut changes),
            vec![ListChange::Removed {
                index: 0,
                items: vec!['a', 'b']
            }]
        );
    }

    #[test]
    fn duplicate_incoming_items_are_distinct_occurrences() {
        let list = TrackedList::from_items(vec!['a']);

        list.reconcile(vec!['a', 'a']);

        assert_eq!(list.snapshot(), vec!['a', 'a']);
    }

    #[test]
    fn populating_an_empty_list_appends_without_reset() {
        let list: TrackedList<char> = TrackedList::new();
        let mut changes = list.subscribe();

        list.reconcile(vec!['a', 'b']);

        assert_eq!(list.snapshot(), vec!['a', 'b']);
        assert_eq!(
            drain_changes(&mut changes),
            vec![
                ListChange::Inserted { index: 0, item: 'a' },
                ListChange::Inserted { index: 1, item: 'b' },
            ]
        );
    }
}
