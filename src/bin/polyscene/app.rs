//! Audio setup: one engine rendered from the cpal callback, the handle
//! handed to the terminal UI.

use std::sync::Arc;

use color_eyre::eyre::{bail, eyre, Result as EyreResult, WrapErr};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat,
};
use polyscene::{
    dsp::{BasicVoice, StereoDelay},
    engine::fx::FxSlot,
    patch::store::PatchStore,
    EngineConfig, SynthEngine, BLOCK_SIZE,
};
use rtrb::{Producer, RingBuffer};

use crate::{patches, ui::UiApp};

/// Samples kept for the scope; the UI drains whatever has arrived.
const SCOPE_CAPACITY: usize = 8192;

/// Carries a rendered block across callbacks whose buffer size is not a
/// multiple of the engine block.
struct BlockCursor {
    left: [f32; BLOCK_SIZE],
    right: [f32; BLOCK_SIZE],
    pos: usize,
}

impl BlockCursor {
    fn new() -> Self {
        Self {
            left: [0.0; BLOCK_SIZE],
            right: [0.0; BLOCK_SIZE],
            pos: BLOCK_SIZE,
        }
    }

    fn fill(
        &mut self,
        engine: &mut SynthEngine<BasicVoice>,
        scope: &mut Producer<f32>,
        data: &mut [f32],
        channels: usize,
    ) {
        for frame in data.chunks_mut(channels) {
            if self.pos == BLOCK_SIZE {
                engine.render_block(&mut self.left, &mut self.right);
                self.pos = 0;
            }
            let (l, r) = (self.left[self.pos], self.right[self.pos]);
            match frame {
                [mono] => *mono = 0.5 * (l + r),
                [left, right, rest @ ..] => {
                    *left = l;
                    *right = r;
                    rest.fill(0.0);
                }
                [] => {}
            }
            // a full scope just drops samples
            let _ = scope.push(0.5 * (l + r));
            self.pos += 1;
        }
    }
}

pub fn run() -> EyreResult<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| eyre!("no default output device available"))?;
    let supported = device
        .default_output_config()
        .wrap_err("failed to fetch default output config")?;
    if supported.sample_format() != SampleFormat::F32 {
        bail!("output device wants {:?}, only f32 is supported", supported.sample_format());
    }

    let sample_rate = supported.sample_rate().0 as f32;
    let channels = supported.channels() as usize;
    log::info!(
        "output: {} at {sample_rate} Hz, {channels} channels",
        device.name().unwrap_or_else(|_| "unknown device".to_string())
    );

    let store = Arc::new(patches::builtin());

    let config = EngineConfig::with_sample_rate(sample_rate);
    let (mut engine, mut handle) = SynthEngine::with_store(
        config,
        move || BasicVoice::new(sample_rate),
        Arc::clone(&store) as Arc<dyn PatchStore>,
    )
    .wrap_err("failed to create engine")?;

    handle
        .install_effect(FxSlot::global(0), Box::new(StereoDelay::new(0.3, 0.35, 0.25)))
        .wrap_err("failed to queue the master delay")?;
    engine
        .process_pending_offline()
        .wrap_err("failed to apply startup state")?;

    let (mut scope_tx, scope_rx) = RingBuffer::<f32>::new(SCOPE_CAPACITY);
    let mut cursor = BlockCursor::new();

    let stream = device.build_output_stream(
        &supported.into(),
        move |data: &mut [f32], _| cursor.fill(&mut engine, &mut scope_tx, data, channels),
        |err| log::error!("audio stream error: {err}"),
        None,
    )?;
    stream.play()?;

    let mut terminal = ratatui::init();
    let result = UiApp::new(handle, scope_rx, sample_rate, store).run(&mut terminal);
    ratatui::restore();
    drop(stream);
    log::info!("polyscene stopped");
    result
}
