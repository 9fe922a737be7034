//! Computer-keyboard piano.
//!
//! Terminals report presses but not releases, so a note stays down for
//! `NOTE_HOLD` after its last press. Auto-repeat while a key is held keeps
//! refreshing that deadline.

use std::time::{Duration, Instant};

const NOTE_HOLD: Duration = Duration::from_millis(350);

/// Two rows in the usual tracker layout: `a w s e d f t g y h u j k o l p ;`
const PIANO: &[char] = &[
    'a', 'w', 's', 'e', 'd', 'f', 't', 'g', 'y', 'h', 'u', 'j', 'k', 'o', 'l', 'p', ';',
];

pub fn semitone(c: char) -> Option<u8> {
    PIANO.iter().position(|&k| k == c).map(|i| i as u8)
}

#[derive(Debug, Default)]
pub struct HeldNotes {
    notes: Vec<(u8, Instant)>,
}

impl HeldNotes {
    /// Returns true when `key` was not already sounding.
    pub fn press(&mut self, key: u8, now: Instant) -> bool {
        let deadline = now + NOTE_HOLD;
        match self.notes.iter_mut().find(|(k, _)| *k == key) {
            Some((_, until)) => {
                *until = deadline;
                false
            }
            None => {
                self.notes.push((key, deadline));
                true
            }
        }
    }

    /// Remove expired notes, calling `release` for each.
    pub fn expire(&mut self, now: Instant, mut release: impl FnMut(u8)) {
        self.notes.retain(|&(key, until)| {
            let keep = until > now;
            if !keep {
                release(key);
            }
            keep
        });
    }

    pub fn drain(&mut self) -> impl Iterator<Item = u8> + '_ {
        self.notes.drain(..).map(|(k, _)| k)
    }

    pub fn keys(&self) -> impl Iterator<Item = u8> + '_ {
        self.notes.iter().map(|(k, _)| *k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_presses_extend_instead_of_retriggering() {
        let start = Instant::now();
        let mut held = HeldNotes::default();
        assert!(held.press(60, start));
        assert!(!held.press(60, start + Duration::from_millis(300)));

        let mut released = Vec::new();
        held.expire(start + Duration::from_millis(400), |k| released.push(k));
        assert!(released.is_empty());
        held.expire(start + Duration::from_millis(700), |k| released.push(k));
        assert_eq!(released, vec![60]);
    }

    #[test]
    fn piano_row_is_chromatic() {
        assert_eq!(semitone('a'), Some(0));
        assert_eq!(semitone('w'), Some(1));
        assert_eq!(semitone('k'), Some(12));
        assert_eq!(semitone('z'), None);
    }
}
