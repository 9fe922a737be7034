use crate::{N_CHANNELS, N_KEYS};
use log::warn;

/// One entry per `(channel, key)` at most, so this bounds a scene's buffer.
pub const HOLD_CAPACITY: usize = N_CHANNELS * N_KEYS;

/// A note-off deferred by the sustain pedal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldItem {
    pub channel: u8,
    pub key: u8,
    /// Set when the same key was struck again while held. The entry no
    /// longer releases anything; `channel`/`key` keep the original note so
    /// duplicate voices can be cleaned up when the pedal lifts.
    pub tombstone: bool,
}

/// Pending note-offs of one scene.
///
/// Two preallocated buffers are swapped on purge: the pending entries move
/// to `draining` and whatever must wait longer is pushed back into `items`.
/// Neither ever grows past `HOLD_CAPACITY`.
#[derive(Debug, Clone)]
pub struct HoldBuffer {
    items: Vec<HoldItem>,
    draining: Vec<HoldItem>,
}

impl Default for HoldBuffer {
    fn default() -> Self {
        Self {
            items: Vec::with_capacity(HOLD_CAPACITY),
            draining: Vec::with_capacity(HOLD_CAPACITY),
        }
    }
}

impl HoldBuffer {
    /// Defer a note-off. An existing entry for the same note is revived
    /// rather than duplicated: releasing it later catches every voice on
    /// that key, duplicates included.
    pub fn push(&mut self, channel: u8, key: u8) {
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|i| i.channel == channel && i.key == key)
        {
            item.tombstone = false;
            return;
        }
        self.append(HoldItem {
            channel,
            key,
            tombstone: false,
        });
    }

    /// Mark every live entry for `(channel, key)` as handled.
    pub fn tombstone(&mut self, channel: u8, key: u8) {
        for item in &mut self.items {
            if !item.tombstone && item.channel == channel && item.key == key {
                item.tombstone = true;
            }
        }
    }

    /// Move every entry aside for processing. Returns how many there are.
    pub fn begin_purge(&mut self) -> usize {
        std::mem::swap(&mut self.items, &mut self.draining);
        self.items.clear();
        self.draining.len()
    }

    pub fn draining(&self, index: usize) -> HoldItem {
        self.draining[index]
    }

    pub fn retain_item(&mut self, item: HoldItem) {
        self.append(item);
    }

    pub fn end_purge(&mut self) {
        self.draining.clear();
    }

    pub fn items(&self) -> &[HoldItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.draining.clear();
    }

    fn append(&mut self, item: HoldItem) {
        if self.items.len() >= HOLD_CAPACITY {
            warn!(
                target: "polyscene::voices",
                "hold buffer full, dropping held note-off {}:{}", item.channel, item.key
            );
            return;
        }
        self.items.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstones_only_matching_live_entries() {
        let mut hold = HoldBuffer::default();
        hold.push(0, 60);
        hold.push(0, 62);
        hold.push(1, 60);
        hold.tombstone(0, 60);
        let dead: Vec<bool> = hold.items().iter().map(|i| i.tombstone).collect();
        assert_eq!(dead, vec![true, false, false]);
    }

    #[test]
    fn repeated_note_offs_share_one_entry() {
        let mut hold = HoldBuffer::default();
        for _ in 0..300 {
            hold.push(0, 60);
            hold.tombstone(0, 60);
        }
        assert_eq!(hold.len(), 1);
        assert!(hold.items()[0].tombstone);

        hold.push(0, 60);
        assert_eq!(hold.len(), 1);
        assert!(!hold.items()[0].tombstone);
    }

    #[test]
    fn never_grows_past_capacity() {
        let mut hold = HoldBuffer::default();
        let capacity = hold.items.capacity();
        for channel in 0..N_CHANNELS as u8 {
            for key in 0..N_KEYS as u8 {
                hold.push(channel, key);
                hold.push(channel, key);
            }
        }
        assert_eq!(hold.len(), HOLD_CAPACITY);
        hold.push(0, 60);
        assert_eq!(hold.len(), HOLD_CAPACITY);
        assert_eq!(hold.items.capacity(), capacity);
    }

    #[test]
    fn purge_retains_what_is_pushed_back() {
        let mut hold = HoldBuffer::default();
        hold.push(0, 60);
        hold.push(0, 64);
        let n = hold.begin_purge();
        assert_eq!(n, 2);
        assert!(hold.is_empty());
        for i in 0..n {
            let item = hold.draining(i);
            if item.key == 64 {
                hold.retain_item(item);
            }
        }
        hold.end_purge();
        assert_eq!(hold.len(), 1);
        assert_eq!(hold.items()[0].key, 64);
    }
}
