use crate::model::UiModel;
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Wrap},
};

const SPINNER: [&str; 4] = ["∙∙∙", "●∙∙", "∙●∙", "∙∙●"];

/// Warnings, completed phases and the phase in progress.
pub fn render(model: &UiModel, tick: usize) -> Paragraph<'static> {
    let mut lines = Vec::new();

    for warning in &model.warnings {
        lines.push(Line::from(vec![
            Span::styled(
                " WARNING ",
                Style::default()
                    .bg(Color::Yellow)
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(" {warning}")),
        ]));
    }
    if !model.warnings.is_empty() {
        lines.push(Line::default());
    }

    for phase in &model.phases {
        let badge = match phase.outcome.failure() {
            None => Span::styled(" SUCCESS ", Style::default().bg(Color::Green).fg(Color::Black)),
            Some(_) => Span::styled(" FAILURE ", Style::default().bg(Color::Red).fg(Color::White)),
        };
        let duration = phase
            .duration
            .map(|d| format!(" ({:.3}s)", d.as_secs_f64()))
            .unwrap_or_default();
        lines.push(Line::from(vec![
            badge,
            Span::raw(format!(" {}", phase.title())),
            Span::styled(
                duration,
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            ),
        ]));
        if let Some(reason) = phase.outcome.failure() {
            lines.push(Line::from(format!("          {reason}")));
        }
    }

    if let Some(current) = &model.current {
        lines.push(Line::from(vec![
            Span::raw("      "),
            Span::styled(
                SPINNER[tick % SPINNER.len()],
                Style::default().fg(Color::Rgb(0xff, 0x8a, 0x00)),
            ),
            Span::raw(format!(" {current}")),
        ]));
    }

    Paragraph::new(lines).wrap(Wrap { trim: false })
}
