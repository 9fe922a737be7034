use log::{debug, warn};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::{error::EngineError, BLOCK_SIZE, N_SCENES};

/*
Effect Rack
===========

Eight slots, fed from three places in the mix:

  scene A ──► [InsertA1] ──► [InsertA2] ──┬──────────────────────────┐
  scene B ──► [InsertB1] ──► [InsertB2] ──┼──────────────────────────┤
                                          │ send levels              │
                                          ├──► [Send1] ──► return ───┤
                                          └──► [Send2] ──► return ───┤
                                                                     ▼
                                       master ◄── [Global2] ◄── [Global1]

Ring-out
--------

Once a slot's input goes silent it keeps processing for `ringout_blocks`
more blocks so reverb and delay tails are not cut off. `None` means the
effect never settles (e.g. a delay with unity feedback) and always runs.

Swapping effects
----------------

Effects are built and initialized on the control thread, then pushed through
a bounded queue. The audio thread installs them at the start of the next
block and pushes whatever they replaced onto the retire queue, so no effect
is ever allocated or dropped on the audio thread unless that queue is full.
*/

pub const N_FX_SLOTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FxSlot {
    InsertA1,
    InsertA2,
    InsertB1,
    InsertB2,
    Send1,
    Send2,
    Global1,
    Global2,
}

impl FxSlot {
    pub const ALL: [FxSlot; N_FX_SLOTS] = [
        FxSlot::InsertA1,
        FxSlot::InsertA2,
        FxSlot::InsertB1,
        FxSlot::InsertB2,
        FxSlot::Send1,
        FxSlot::Send2,
        FxSlot::Global1,
        FxSlot::Global2,
    ];

    /// Position in the rack; also the bit in the fx-disable mask.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn insert(scene: usize, n: usize) -> Self {
        debug_assert!(scene < N_SCENES && n < 2);
        Self::ALL[scene * 2 + n.min(1)]
    }

    pub fn send(n: usize) -> Self {
        Self::ALL[4 + n.min(1)]
    }

    pub fn global(n: usize) -> Self {
        Self::ALL[6 + n.min(1)]
    }

    pub fn disabled_in(self, mask: u8) -> bool {
        mask & (1 << self.index()) != 0
    }
}

/// Render contract for an effect unit. Blocks are always `BLOCK_SIZE` long.
pub trait Effect: Send {
    fn name(&self) -> &'static str;

    /// Allocate and prepare for `sample_rate`. Called on the control thread
    /// before the effect is installed.
    fn init(&mut self, sample_rate: f32) {
        let _ = sample_rate;
    }

    /// Drop any audible state, e.g. clear delay buffers.
    fn suspend(&mut self);

    fn process(&mut self, left: &mut [f32; BLOCK_SIZE], right: &mut [f32; BLOCK_SIZE]);

    /// Blocks of tail after the input goes silent; `None` rings forever.
    fn ringout_blocks(&self) -> Option<u32>;
}

/// Counts silent blocks since the last one with input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ringout {
    counter: u32,
}

impl Ringout {
    /// Register a block and report whether the effect should process it.
    pub fn check(&mut self, had_input: bool, decay: Option<u32>) -> bool {
        if had_input {
            self.counter = 0;
        } else {
            self.counter = self.counter.saturating_add(1);
        }
        match decay {
            None => true,
            Some(blocks) => self.counter == 0 || self.counter < blocks,
        }
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

struct FxUnit {
    effect: Box<dyn Effect>,
    ringout: Ringout,
}

impl FxUnit {
    /// Process the block if the effect still has input or tail. Returns
    /// whether it is still ringing.
    fn process_ringout(
        &mut self,
        left: &mut [f32; BLOCK_SIZE],
        right: &mut [f32; BLOCK_SIZE],
        had_input: bool,
    ) -> bool {
        let decay = self.effect.ringout_blocks();
        if !self.ringout.check(had_input, decay) {
            return false;
        }
        self.effect.process(left, right);
        true
    }
}

/// Replace the effect in `slot`; `None` empties it.
pub struct FxSwap {
    pub slot: FxSlot,
    pub effect: Option<Box<dyn Effect>>,
}

/// Audio-side rack.
pub struct FxRack {
    units: [Option<FxUnit>; N_FX_SLOTS],
    swaps: Consumer<FxSwap>,
    retired: Producer<Box<dyn Effect>>,
    disabled: u8,
}

impl FxRack {
    /// Install queued effects. Returns how many slots changed.
    pub fn apply_swaps(&mut self) -> usize {
        let mut changed = 0;
        while let Ok(swap) = self.swaps.pop() {
            let unit = swap.effect.map(|effect| FxUnit {
                effect,
                ringout: Ringout::default(),
            });
            let old = std::mem::replace(&mut self.units[swap.slot.index()], unit);
            debug!(target: "polyscene::deferred", "effect slot {:?} swapped", swap.slot);
            if let Some(old) = old {
                if let Err(rtrb::PushError::Full(effect)) = self.retired.push(old.effect) {
                    warn!(
                        target: "polyscene::deferred",
                        "retire queue full, dropping {} on the audio thread",
                        effect.name()
                    );
                }
            }
            changed += 1;
        }
        changed
    }

    pub fn is_loaded(&self, slot: FxSlot) -> bool {
        self.units[slot.index()].is_some()
    }

    /// Loaded and not disabled.
    pub fn is_enabled(&self, slot: FxSlot) -> bool {
        self.is_loaded(slot) && !slot.disabled_in(self.disabled)
    }

    /// Track the disable mask, suspending slots that were just switched off.
    pub fn update_disabled(&mut self, mask: u8) {
        let newly_disabled = mask & !self.disabled;
        self.disabled = mask;
        if newly_disabled != 0 {
            self.suspend(newly_disabled);
        }
    }

    /// Suspend every loaded slot whose bit is set in `mask`.
    pub fn suspend(&mut self, mask: u8) {
        for slot in FxSlot::ALL {
            if mask & (1 << slot.index()) == 0 {
                continue;
            }
            if let Some(unit) = &mut self.units[slot.index()] {
                unit.effect.suspend();
                unit.ringout.reset();
            }
        }
    }

    pub fn suspend_all(&mut self) {
        self.suspend(u8::MAX);
    }

    /// Run one slot in place. Empty or disabled slots pass the signal
    /// through and report no tail.
    pub fn process(
        &mut self,
        slot: FxSlot,
        left: &mut [f32; BLOCK_SIZE],
        right: &mut [f32; BLOCK_SIZE],
        had_input: bool,
    ) -> bool {
        if slot.disabled_in(self.disabled) {
            return false;
        }
        let Some(unit) = &mut self.units[slot.index()] else {
            return false;
        };
        let ringing = unit.process_ringout(left, right, had_input);
        if ringing && !(left.iter().all(|s| s.is_finite()) && right.iter().all(|s| s.is_finite()))
        {
            warn!("effect {} produced non-finite output, suspending", unit.effect.name());
            unit.effect.suspend();
            left.fill(0.0);
            right.fill(0.0);
        }
        ringing
    }
}

/// Control-side end of the rack.
pub struct FxControl {
    swaps: Producer<FxSwap>,
    retired: Consumer<Box<dyn Effect>>,
    sample_rate: f32,
}

impl FxControl {
    /// Initialize `effect` and queue it for `slot`.
    pub fn install(&mut self, slot: FxSlot, mut effect: Box<dyn Effect>) -> Result<(), EngineError> {
        effect.init(self.sample_rate);
        debug!(target: "polyscene::deferred", "queueing {} for {slot:?}", effect.name());
        self.swaps
            .push(FxSwap {
                slot,
                effect: Some(effect),
            })
            .map_err(|_| EngineError::QueueFull)
    }

    pub fn clear(&mut self, slot: FxSlot) -> Result<(), EngineError> {
        self.swaps
            .push(FxSwap { slot, effect: None })
            .map_err(|_| EngineError::QueueFull)
    }

    /// Drop effects the audio thread has replaced. Returns how many.
    pub fn collect_retired(&mut self) -> usize {
        let mut count = 0;
        while let Ok(effect) = self.retired.pop() {
            drop(effect);
            count += 1;
        }
        count
    }
}

pub fn fx_channel(capacity: usize, sample_rate: f32) -> (FxControl, FxRack) {
    let capacity = capacity.max(1);
    let (swap_tx, swap_rx) = RingBuffer::<FxSwap>::new(capacity);
    // every queued swap can retire one effect, plus room for a full rack
    let (retire_tx, retire_rx) = RingBuffer::<Box<dyn Effect>>::new(capacity + N_FX_SLOTS);
    (
        FxControl {
            swaps: swap_tx,
            retired: retire_rx,
            sample_rate,
        },
        FxRack {
            units: std::array::from_fn(|_| None),
            swaps: swap_rx,
            retired: retire_tx,
            disabled: 0,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adds a constant so processing is observable; counts suspends.
    struct Offset {
        amount: f32,
        tail: Option<u32>,
        suspended: usize,
    }

    impl Offset {
        fn boxed(amount: f32, tail: Option<u32>) -> Box<dyn Effect> {
            Box::new(Self {
                amount,
                tail,
                suspended: 0,
            })
        }
    }

    impl Effect for Offset {
        fn name(&self) -> &'static str {
            "offset"
        }

        fn suspend(&mut self) {
            self.suspended += 1;
        }

        fn process(&mut self, left: &mut [f32; BLOCK_SIZE], right: &mut [f32; BLOCK_SIZE]) {
            left.iter_mut().for_each(|s| *s += self.amount);
            right.iter_mut().for_each(|s| *s += self.amount);
        }

        fn ringout_blocks(&self) -> Option<u32> {
            self.tail
        }
    }

    fn silent() -> ([f32; BLOCK_SIZE], [f32; BLOCK_SIZE]) {
        ([0.0; BLOCK_SIZE], [0.0; BLOCK_SIZE])
    }

    #[test]
    fn ringout_counts_silent_blocks() {
        let mut ringout = Ringout::default();
        assert!(ringout.check(true, Some(3)));
        assert!(ringout.check(false, Some(3)));
        assert!(ringout.check(false, Some(3)));
        assert!(!ringout.check(false, Some(3)));
        assert!(ringout.check(true, Some(3)));
        for _ in 0..100 {
            assert!(ringout.check(false, None));
        }
    }

    #[test]
    fn swaps_install_and_retire() {
        let (mut control, mut rack) = fx_channel(4, 48_000.0);
        control
            .install(FxSlot::Send1, Offset::boxed(1.0, Some(2)))
            .expect("queue has room");
        assert_eq!(rack.apply_swaps(), 1);
        assert!(rack.is_loaded(FxSlot::Send1));

        control
            .install(FxSlot::Send1, Offset::boxed(2.0, Some(2)))
            .expect("queue has room");
        rack.apply_swaps();
        assert_eq!(control.collect_retired(), 1);

        let (mut l, mut r) = silent();
        assert!(rack.process(FxSlot::Send1, &mut l, &mut r, true));
        assert_eq!(l[0], 2.0);
    }

    #[test]
    fn tail_stops_after_decay() {
        let (mut control, mut rack) = fx_channel(4, 48_000.0);
        control
            .install(FxSlot::Global1, Offset::boxed(1.0, Some(2)))
            .expect("queue has room");
        rack.apply_swaps();

        let (mut l, mut r) = silent();
        assert!(rack.process(FxSlot::Global1, &mut l, &mut r, true));
        assert!(rack.process(FxSlot::Global1, &mut l, &mut r, false));
        let (mut l, mut r) = silent();
        assert!(!rack.process(FxSlot::Global1, &mut l, &mut r, false));
        assert_eq!(l[0], 0.0, "settled effect must not touch the signal");
    }

    #[test]
    fn disabled_slots_pass_through() {
        let (mut control, mut rack) = fx_channel(4, 48_000.0);
        control
            .install(FxSlot::InsertB2, Offset::boxed(1.0, None))
            .expect("queue has room");
        rack.apply_swaps();
        rack.update_disabled(1 << FxSlot::InsertB2.index());
        assert!(!rack.is_enabled(FxSlot::InsertB2));

        let (mut l, mut r) = silent();
        assert!(!rack.process(FxSlot::InsertB2, &mut l, &mut r, true));
        assert_eq!(l[0], 0.0);
    }

    #[test]
    fn full_queue_is_reported() {
        let (mut control, _rack) = fx_channel(1, 48_000.0);
        control
            .install(FxSlot::Send2, Offset::boxed(1.0, None))
            .expect("queue has room");
        assert!(matches!(
            control.install(FxSlot::Send2, Offset::boxed(1.0, None)),
            Err(EngineError::QueueFull)
        ));
    }

    #[test]
    fn slot_helpers_follow_rack_layout() {
        assert_eq!(FxSlot::insert(1, 0), FxSlot::InsertB1);
        assert_eq!(FxSlot::send(1), FxSlot::Send2);
        assert_eq!(FxSlot::global(0), FxSlot::Global1);
        assert!(FxSlot::Send1.disabled_in(0b1_0000));
        assert!(!FxSlot::Send1.disabled_in(0b0_1111));
    }
}
