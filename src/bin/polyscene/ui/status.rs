//! Status panel: patch, scene layout, voice count and meters

use polyscene::{
    patch::modes::{PolyMode, SceneMode},
    N_SCENES,
};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame,
};

/// What the status panel shows, gathered by the app each frame.
pub struct Status<'a> {
    pub patch: &'a str,
    pub sample_rate: f32,
    pub scene_mode: SceneMode,
    pub active_scene: usize,
    pub poly_modes: [PolyMode; N_SCENES],
    pub cutoff: [f32; N_SCENES],
    pub voices: usize,
    pub vu: [f32; 2],
    pub octave: i8,
    pub sustain: bool,
    pub message: Option<&'a str>,
}

fn scene_name(scene: usize) -> &'static str {
    if scene == 0 {
        "A"
    } else {
        "B"
    }
}

pub fn render_status(frame: &mut Frame, area: Rect, status: &Status) {
    let block = Block::default().title(" polyscene ").borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(inner);

    let header = Line::from(vec![
        Span::styled(format!(" {}  ", status.patch), Style::default().fg(Color::Cyan)),
        Span::styled(
            format!("{:?}  ", status.scene_mode),
            Style::default().fg(Color::Yellow),
        ),
        Span::styled(
            format!("voices {:>2}  ", status.voices),
            Style::default().fg(Color::Green),
        ),
        Span::styled(
            format!("oct {:+}  ", status.octave),
            Style::default().fg(Color::White),
        ),
        Span::styled(
            if status.sustain { "SUS  " } else { "     " },
            Style::default().fg(Color::Magenta),
        ),
        Span::styled(
            format!("{:.1}kHz", status.sample_rate / 1000.0),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    frame.render_widget(Paragraph::new(header), rows[0]);

    for scene in 0..N_SCENES {
        let marker = if scene == status.active_scene { ">" } else { " " };
        let line = Line::from(vec![
            Span::raw(format!("{marker}{} ", scene_name(scene))),
            Span::styled(
                format!("{:<9}", format!("{:?}", status.poly_modes[scene])),
                Style::default().fg(Color::White),
            ),
            Span::styled(
                format!("cutoff {:+.0}", status.cutoff[scene]),
                Style::default().fg(Color::DarkGray),
            ),
        ]);
        frame.render_widget(Paragraph::new(line), rows[1 + scene]);
    }

    let meters = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[3]);
    for (side, area) in meters.iter().enumerate() {
        let level = status.vu[side].clamp(0.0, 1.0);
        let color = if status.vu[side] >= 1.0 { Color::Red } else { Color::Green };
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(color))
            .label(if side == 0 { "L" } else { "R" })
            .ratio(level as f64);
        frame.render_widget(gauge, *area);
    }

    if let Some(message) = status.message {
        let line = Paragraph::new(message).style(Style::default().fg(Color::Red));
        frame.render_widget(line, rows[4]);
    }
}
