//! Output oscilloscope widget

use ratatui::{
    layout::Rect,
    style::{Color, Style},
    symbols,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType},
    Frame,
};

pub fn render_scope(frame: &mut Frame, area: Rect, samples: &[f32], halted: bool) {
    let title = if halted { " Output (loading) " } else { " Output " };
    let block = Block::default().title(title).borders(Borders::ALL);

    let len = samples.len().max(1) as f64;
    let points: Vec<(f64, f64)> = samples
        .iter()
        .enumerate()
        .map(|(i, &s)| (i as f64 / len, s.clamp(-1.0, 1.0) as f64))
        .collect();

    let color = if halted { Color::DarkGray } else { Color::Cyan };
    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points);

    let axis_style = Style::default().fg(Color::DarkGray);
    let chart = Chart::new(vec![dataset])
        .block(block)
        .x_axis(Axis::default().bounds([0.0, 1.0]).style(axis_style))
        .y_axis(Axis::default().bounds([-1.0, 1.0]).style(axis_style));

    frame.render_widget(chart, area);
}
