use crate::{synth::voice::Voice, MAX_VOICES};

/// Copy of the active list, taken before an operation that may start or
/// free voices while it walks them.
#[derive(Debug, Clone, Copy)]
pub struct ActiveSnapshot {
    slots: [usize; MAX_VOICES],
    len: usize,
}

impl ActiveSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots[..self.len].iter().copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Fixed pool of voice slots for one scene.
///
/// Every slot owns a preallocated DSP unit. A slot is occupied while it holds
/// `Some(Voice)`, and every occupied slot appears exactly once in the
/// insertion-ordered active list.
pub struct VoiceArena<V> {
    slots: Vec<Option<Voice>>,
    units: Vec<V>,
    active: Vec<usize>,
}

impl<V> VoiceArena<V> {
    pub fn new(mut make_unit: impl FnMut() -> V) -> Self {
        Self {
            slots: vec![None; MAX_VOICES],
            units: (0..MAX_VOICES).map(|_| make_unit()).collect(),
            active: Vec::with_capacity(MAX_VOICES),
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.active.len() == MAX_VOICES
    }

    /// Slots of live voices, oldest first.
    pub fn active(&self) -> &[usize] {
        &self.active
    }

    pub fn snapshot(&self) -> ActiveSnapshot {
        let mut slots = [0; MAX_VOICES];
        slots[..self.active.len()].copy_from_slice(&self.active);
        ActiveSnapshot {
            slots,
            len: self.active.len(),
        }
    }

    /// Occupy the first free slot with `voice`, returning the slot.
    pub fn acquire(&mut self, voice: Voice) -> Option<usize> {
        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some(voice);
        self.active.push(slot);
        Some(slot)
    }

    /// Vacate `slot`, keeping the remaining voices in order.
    pub fn free(&mut self, slot: usize) -> Option<Voice> {
        let voice = self.slots[slot].take()?;
        if let Some(position) = self.active.iter().position(|&s| s == slot) {
            self.active.remove(position);
        }
        Some(voice)
    }

    pub fn free_all(&mut self) {
        for slot in self.active.drain(..) {
            self.slots[slot] = None;
        }
    }

    pub fn voice(&self, slot: usize) -> Option<&Voice> {
        self.slots[slot].as_ref()
    }

    pub fn voice_mut(&mut self, slot: usize) -> Option<&mut Voice> {
        self.slots[slot].as_mut()
    }

    pub fn unit(&self, slot: usize) -> &V {
        &self.units[slot]
    }

    pub fn unit_mut(&mut self, slot: usize) -> &mut V {
        &mut self.units[slot]
    }

    /// Voice bookkeeping and DSP unit of one slot, borrowed together.
    pub fn pair_mut(&mut self, slot: usize) -> Option<(&mut Voice, &mut V)> {
        let voice = self.slots[slot].as_mut()?;
        Some((voice, &mut self.units[slot]))
    }

    /// Live voices in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Voice)> + '_ {
        self.active
            .iter()
            .filter_map(|&slot| self.slots[slot].as_ref().map(|v| (slot, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Voice> + '_ {
        let slots = &mut self.slots;
        slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Disjoint mutable borrows of the units in `lanes`, in lane order.
    /// Slots must be distinct.
    pub fn units_for<'a, const N: usize>(
        &'a mut self,
        lanes: &[Option<usize>; N],
    ) -> [Option<&'a mut V>; N] {
        let mut out: [Option<&'a mut V>; N] = std::array::from_fn(|_| None);
        for (slot, unit) in self.units.iter_mut().enumerate() {
            if let Some(lane) = lanes.iter().position(|l| *l == Some(slot)) {
                out[lane] = Some(unit);
            }
        }
        out
    }
}
