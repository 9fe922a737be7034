//! Key-to-pitch mapping consulted when notes start.

use crate::N_KEYS;

/// Scale service. Pitches are in semitones relative to MIDI key 0 at the
/// standard 8.18 Hz, so 12-TET returns the key itself.
pub trait Tuning: Send + Sync {
    /// Unmapped keys are dropped at note-on.
    fn is_mapped(&self, key: u8) -> bool;
    fn pitch(&self, key: u8) -> f32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardTuning;

impl Tuning for StandardTuning {
    fn is_mapped(&self, key: u8) -> bool {
        (key as usize) < N_KEYS
    }

    fn pitch(&self, key: u8) -> f32 {
        key as f32
    }
}

/// Explicit per-key table; `None` marks a key the scale leaves unmapped.
#[derive(Debug, Clone)]
pub struct KeyMapTuning {
    pitches: Vec<Option<f32>>,
}

impl KeyMapTuning {
    pub fn new(pitches: Vec<Option<f32>>) -> Self {
        let mut pitches = pitches;
        pitches.resize(N_KEYS, None);
        Self { pitches }
    }

    /// Equal temperament with only the keys in `mapped` sounding.
    pub fn only_keys(mapped: impl IntoIterator<Item = u8>) -> Self {
        let mut pitches = vec![None; N_KEYS];
        for key in mapped {
            if let Some(slot) = pitches.get_mut(key as usize) {
                *slot = Some(key as f32);
            }
        }
        Self { pitches }
    }
}

impl Tuning for KeyMapTuning {
    fn is_mapped(&self, key: u8) -> bool {
        matches!(self.pitches.get(key as usize), Some(Some(_)))
    }

    fn pitch(&self, key: u8) -> f32 {
        self.pitches
            .get(key as usize)
            .copied()
            .flatten()
            .unwrap_or(key as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_maps_every_key() {
        let tuning = StandardTuning;
        assert!(tuning.is_mapped(0) && tuning.is_mapped(127));
        assert_eq!(tuning.pitch(69), 69.0);
    }

    #[test]
    fn key_map_leaves_holes() {
        let tuning = KeyMapTuning::only_keys([60, 62, 64]);
        assert!(tuning.is_mapped(62));
        assert!(!tuning.is_mapped(61));

        let stretched = KeyMapTuning::new(vec![Some(0.0), Some(1.02)]);
        assert_eq!(stretched.pitch(1), 1.02);
        assert!(!stretched.is_mapped(5));
    }
}
