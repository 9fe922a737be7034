//! Terminal front end: keyboard piano, scene controls, scope and meters.

mod keys;
mod scope;
mod status;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use color_eyre::eyre::Result as EyreResult;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use polyscene::{
    patch::{
        modes::{PolyMode, SceneMode},
        params::{GlobalParam, ParamId, SceneParam},
        store::{MemoryPatchStore, PatchStore},
        Patch,
    },
    EngineHandle, N_SCENES,
};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::Paragraph,
    DefaultTerminal, Frame,
};
use rtrb::Consumer;

use keys::HeldNotes;
use scope::render_scope;
use status::{render_status, Status};

const SCOPE_LEN: usize = 1024;
const CUTOFF_STEP: f32 = 4.0;
const HELP: &str =
    " [a..;] play  [z/x] octave  [tab] scene  [1-6] play mode  [m] scene mode  [[/]] cutoff  [space] sustain  [,/.] patch  [q] quit";

/// The UI's copy of the values it edits. The engine owns the real patch;
/// this mirror is rebuilt from the store whenever a patch is requested.
struct Mirror {
    patch_id: usize,
    name: String,
    scene_mode: SceneMode,
    active_scene: usize,
    poly_modes: [PolyMode; N_SCENES],
    cutoff: [f32; N_SCENES],
}

impl Mirror {
    fn from_patch(id: usize, patch: &Patch) -> Self {
        Self {
            patch_id: id,
            name: patch.name.clone(),
            scene_mode: patch.scene_mode(),
            active_scene: patch.active_scene(),
            poly_modes: std::array::from_fn(|s| patch.poly_mode(s)),
            cutoff: std::array::from_fn(|s| patch.get(ParamId::scene(s, SceneParam::FilterCutoff))),
        }
    }

    /// Pick up a value the engine changed from MIDI.
    fn refresh(&mut self, param: ParamId, value: f32) {
        for scene in 0..N_SCENES {
            if param == ParamId::scene(scene, SceneParam::FilterCutoff) {
                self.cutoff[scene] = value;
            }
        }
    }
}

pub struct UiApp {
    handle: EngineHandle,
    scope_rx: Consumer<f32>,
    scope: Vec<f32>,
    store: Arc<MemoryPatchStore>,
    sample_rate: f32,
    mirror: Mirror,
    held: HeldNotes,
    octave: i8,
    sustain: bool,
    message: Option<String>,
    should_quit: bool,
}

impl UiApp {
    pub fn new(
        handle: EngineHandle,
        scope_rx: Consumer<f32>,
        sample_rate: f32,
        store: Arc<MemoryPatchStore>,
    ) -> Self {
        let mirror = Mirror::from_patch(0, &Patch::default());
        Self {
            handle,
            scope_rx,
            scope: vec![0.0; SCOPE_LEN],
            store,
            sample_rate,
            mirror,
            held: HeldNotes::default(),
            octave: 0,
            sustain: false,
            message: None,
            should_quit: false,
        }
    }

    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> EyreResult<()> {
        while !self.should_quit {
            self.poll_scope();
            self.poll_engine();

            terminal.draw(|frame| self.render(frame))?;

            // ~60fps
            if event::poll(Duration::from_millis(16))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code);
                    }
                }
            }
        }
        self.release_all();
        Ok(())
    }

    fn poll_scope(&mut self) {
        while let Ok(sample) = self.scope_rx.pop() {
            self.scope.push(sample);
        }
        if self.scope.len() > SCOPE_LEN {
            let excess = self.scope.len() - SCOPE_LEN;
            self.scope.drain(..excess);
        }
    }

    fn poll_engine(&mut self) {
        let handle = &mut self.handle;
        self.held.expire(Instant::now(), |key| {
            let _ = handle.note_off(0, key, 64);
        });
        self.handle.collect_retired();
        let mirror = &mut self.mirror;
        self.handle.drain_refresh(|param, value| {
            log::debug!("engine refreshed {param:?} = {value}");
            mirror.refresh(param, value);
        });
        if let Some(err) = self.handle.take_load_error() {
            log::warn!("patch load failed: {err}");
            self.message = Some(err.to_string());
        }
    }

    fn report(&mut self, result: Result<(), polyscene::EngineError>) {
        if let Err(err) = result {
            log::warn!("{err}");
            self.message = Some(err.to_string());
        }
    }

    fn handle_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char(c) if keys::semitone(c).is_some() => {
                if let Some(semitone) = keys::semitone(c) {
                    self.play(semitone);
                }
            }
            KeyCode::Char('z') => self.shift_octave(-1),
            KeyCode::Char('x') => self.shift_octave(1),
            KeyCode::Tab => {
                let scene = (self.mirror.active_scene + 1) % N_SCENES;
                self.mirror.active_scene = scene;
                let result = self
                    .handle
                    .set_parameter(ParamId::global(GlobalParam::ActiveScene), scene as f32);
                self.report(result);
            }
            KeyCode::Char(c @ '1'..='6') => {
                let mode = PolyMode::from_value((c as u8 - b'1') as f32);
                let scene = self.mirror.active_scene;
                self.mirror.poly_modes[scene] = mode;
                let result = self
                    .handle
                    .set_parameter(ParamId::scene(scene, SceneParam::PolyMode), mode.as_value());
                self.report(result);
            }
            KeyCode::Char('m') => {
                let next = (self.mirror.scene_mode.as_value() + 1.0) % 4.0;
                self.mirror.scene_mode = SceneMode::from_value(next);
                let result = self
                    .handle
                    .set_parameter(ParamId::global(GlobalParam::SceneMode), next);
                self.report(result);
            }
            KeyCode::Char('[') => self.nudge_cutoff(-CUTOFF_STEP),
            KeyCode::Char(']') => self.nudge_cutoff(CUTOFF_STEP),
            KeyCode::Char(' ') => {
                self.sustain = !self.sustain;
                let result = self
                    .handle
                    .control_change(0, 64, if self.sustain { 127 } else { 0 });
                self.report(result);
            }
            KeyCode::Backspace => {
                self.release_all();
                let result = self.handle.control_change(0, 120, 0);
                self.report(result);
            }
            KeyCode::Char(',') => self.step_patch(-1),
            KeyCode::Char('.') => self.step_patch(1),
            _ => {}
        }
    }

    fn play(&mut self, semitone: u8) {
        let key = 60 + self.octave as i32 * 12 + semitone as i32;
        let Ok(key) = u8::try_from(key) else {
            return;
        };
        if key > 127 {
            return;
        }
        if self.held.press(key, Instant::now()) {
            let result = self.handle.note_on(0, key, 100);
            self.report(result);
        }
    }

    fn shift_octave(&mut self, delta: i8) {
        self.release_all();
        self.octave = (self.octave + delta).clamp(-4, 4);
    }

    fn release_all(&mut self) {
        let keys: Vec<u8> = self.held.drain().collect();
        for key in keys {
            let _ = self.handle.note_off(0, key, 64);
        }
    }

    fn nudge_cutoff(&mut self, delta: f32) {
        let scene = self.mirror.active_scene;
        let cutoff = (self.mirror.cutoff[scene] + delta).clamp(-60.0, 70.0);
        self.mirror.cutoff[scene] = cutoff;
        let result = self
            .handle
            .set_parameter_smoothed(ParamId::scene(scene, SceneParam::FilterCutoff), cutoff);
        self.report(result);
    }

    fn step_patch(&mut self, delta: isize) {
        let count = self.store.patch_count() as isize;
        if count == 0 {
            return;
        }
        let id = (self.mirror.patch_id as isize + delta).rem_euclid(count) as usize;
        self.release_all();
        match self.store.load(id) {
            Ok(patch) => {
                self.mirror = Mirror::from_patch(id, &patch);
                self.message = None;
                let result = self.handle.load_patch(id);
                self.report(result);
            }
            Err(err) => self.message = Some(err.to_string()),
        }
    }

    fn render(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(7), // status
                Constraint::Min(6),    // scope
                Constraint::Length(1), // held keys
                Constraint::Length(1), // help
            ])
            .split(frame.area());

        let status = Status {
            patch: &self.mirror.name,
            sample_rate: self.sample_rate,
            scene_mode: self.mirror.scene_mode,
            active_scene: self.mirror.active_scene,
            poly_modes: self.mirror.poly_modes,
            cutoff: self.mirror.cutoff,
            voices: self.handle.voice_count(),
            vu: self.handle.vu(),
            octave: self.octave,
            sustain: self.sustain,
            message: self.message.as_deref(),
        };
        render_status(frame, chunks[0], &status);
        render_scope(frame, chunks[1], &self.scope, self.handle.is_halted());

        let held: Vec<String> = self.held.keys().map(|k| k.to_string()).collect();
        frame.render_widget(
            Paragraph::new(format!(" keys: {}", held.join(" "))).style(Style::default().fg(Color::White)),
            chunks[2],
        );
        frame.render_widget(
            Paragraph::new(HELP).style(Style::default().fg(Color::DarkGray)),
            chunks[3],
        );
    }
}
