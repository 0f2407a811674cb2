use std::collections::{BTreeMap, VecDeque};
use tokconf::OverlapPolicy;

/// Open notes keyed by (channel, pitch).
///
/// Each key holds its open records in opening order; the overlap policy
/// decides which end a note-off takes from. `T` is whatever the caller
/// needs to finish the note - usually an index into its own event arena.
#[derive(Debug)]
pub(crate) struct OpenNotes<T> {
    policy: OverlapPolicy,
    open: BTreeMap<(u8, u8), VecDeque<T>>,
    count: usize,
}

impl<T> OpenNotes<T> {
    pub(crate) fn new(policy: OverlapPolicy) -> Self {
        Self {
            policy,
            open: BTreeMap::new(),
            count: 0,
        }
    }

    pub(crate) fn open(&mut self, channel: u8, pitch: u8, record: T) {
        self.open.entry((channel, pitch)).or_default().push_back(record);
        self.count += 1;
    }

    /// Close one open note for the key, or `None` when nothing is open.
    pub(crate) fn close(&mut self, channel: u8, pitch: u8) -> Option<T> {
        let key = (channel, pitch);
        let stack = self.open.get_mut(&key)?;
        let record = match self.policy {
            OverlapPolicy::EarliestFirst => stack.pop_front(),
            OverlapPolicy::LatestFirst => stack.pop_back(),
        }?;
        if stack.is_empty() {
            self.open.remove(&key);
        }
        self.count -= 1;
        Some(record)
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Remove every open record, returned in key order then opening order.
    pub(crate) fn drain(&mut self) -> Vec<((u8, u8), T)> {
        self.count = 0;
        std::mem::take(&mut self.open)
            .into_iter()
            .flat_map(|(key, stack)| stack.into_iter().map(move |record| (key, record)))
            .collect()
    }
}
