use crate::model::UiModel;
use ratatui::{
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

/// The log tail.
pub fn render(model: &UiModel) -> Paragraph<'static> {
    let lines: Vec<Line> = model
        .logs
        .iter()
        .map(|line| Line::from(line.clone()))
        .collect();
    Paragraph::new(lines).block(Block::default().borders(Borders::TOP))
}

/// Where to reach the workspace, once known.
pub fn render_access(model: &UiModel) -> Paragraph<'static> {
    let Some(access) = &model.access else {
        return Paragraph::new(Line::from(Span::styled(
            " waiting for the workspace ... ctrl+c or q to quit",
            Style::default().fg(Color::DarkGray),
        )));
    };
    let mut lines = vec![Line::from(vec![
        Span::raw(" workspace at "),
        Span::styled(access.url.clone(), Style::default().fg(Color::Cyan)),
    ])];
    if access.ssh_port > 0 {
        lines.push(Line::from(format!(
            " ssh -p {} gitpod@localhost",
            access.ssh_port
        )));
    }
    lines.push(Line::from(Span::styled(
        " ctrl+c or q to stop the workspace",
        Style::default().fg(Color::DarkGray),
    )));
    Paragraph::new(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{Terminal, backend::TestBackend};
    use rungp_proto::{UiEvent, WorkspaceAccess};

    fn render_to_string(model: &UiModel) -> String {
        let backend = TestBackend::new(60, 4);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal
            .draw(|f| f.render_widget(render_access(model), f.area()))
            .unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn access_shows_url_and_ssh() {
        let mut model = UiModel::new();
        model.apply(UiEvent::SetWorkspaceAccess(WorkspaceAccess {
            url: "http://localhost:8080/?folder=/ws".into(),
            ssh_port: 8082,
        }));

        let text = render_to_string(&model);
        assert!(text.contains("workspace at http://localhost:8080/?folder=/ws"), "got: {text}");
        assert!(text.contains("ssh -p 8082 gitpod@localhost"), "got: {text}");
    }

    #[test]
    fn access_placeholder_before_ide_is_up() {
        let text = render_to_string(&UiModel::new());
        assert!(text.contains("waiting for the workspace"), "got: {text}");
    }
}
