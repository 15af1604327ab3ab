use crate::app::Screen;
use crate::theme;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, Wrap},
    Frame,
};
use swarm_core::{ProcessState, TaskRow};

const PROGRESS_BAR_WIDTH: usize = 10;

pub fn render(f: &mut Frame, screen: &Screen) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(f.size());

    render_header(f, screen, layout[0]);
    render_gauge(f, screen, layout[1]);
    render_tasks(f, screen, layout[2]);
    render_notice(f, screen, layout[3]);
    render_keys(f, layout[4]);
}

fn render_header(f: &mut Frame, screen: &Screen, area: Rect) {
    let state = screen.view.state;
    let channel = if screen.transport_open {
        Span::styled("live", Style::new().fg(theme::OK))
    } else {
        Span::styled("offline", Style::new().fg(theme::MUTED))
    };
    let mut spans = vec![
        Span::styled("State: ", Style::new().fg(theme::MUTED)),
        Span::styled(
            state.as_str(),
            Style::new()
                .fg(theme::state_color(state))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("  Backend: ", Style::new().fg(theme::MUTED)),
        Span::styled(screen.endpoint.clone(), Style::new().fg(theme::TEXT)),
        Span::styled("  Updates: ", Style::new().fg(theme::MUTED)),
        channel,
    ];
    if let Some(seq) = screen.view.seq {
        spans.push(Span::styled(
            format!("  seq {seq}"),
            Style::new().fg(theme::MUTED),
        ));
    }
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::new().fg(theme::BORDER))
        .title(Span::styled("Swarm Pulse", theme::HEADER_STYLE));
    f.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn render_gauge(f: &mut Frame, screen: &Screen, area: Rect) {
    let view = &screen.view;
    let label = format!(
        "{}/{} settled  done {}  failed {}  running {}  pending {}",
        view.completed + view.failed,
        view.total,
        view.completed,
        view.failed,
        view.running,
        view.pending
    );
    let color = if view.failed > 0 {
        theme::WARN
    } else {
        theme::state_color(view.state)
    };
    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::new().fg(theme::BORDER))
                .title(format!("Progress {}%", view.percent)),
        )
        .gauge_style(Style::new().fg(color))
        .percent(u16::from(view.percent))
        .label(label);
    f.render_widget(gauge, area);
}

fn render_tasks(f: &mut Frame, screen: &Screen, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::new().fg(theme::BORDER))
        .title("Tasks");

    if screen.view.rows.is_empty() {
        let hint = match screen.view.state {
            ProcessState::Processing => "Waiting for per-task updates...",
            _ => "No tasks yet. Press s to start a batch.",
        };
        let p = Paragraph::new(Span::styled(hint, Style::new().fg(theme::MUTED))).block(block);
        f.render_widget(p, area);
        return;
    }

    let header = Row::new(vec!["", "Task", "Status", "Progress", "Error"])
        .style(Style::new().fg(theme::MUTED).add_modifier(Modifier::BOLD));
    let rows = screen
        .view
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| task_row(row).style(theme::zebra_row_style(index)));
    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(PROGRESS_BAR_WIDTH as u16 + 8),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(block);
    f.render_widget(table, area);
}

fn task_row(row: &TaskRow) -> Row<'static> {
    let color = theme::status_color(row.status);
    Row::new(vec![
        Cell::from(Span::styled(
            theme::status_icon(row.status),
            Style::new().fg(color),
        )),
        Cell::from(row.id.clone()),
        Cell::from(Span::styled(row.status.as_str(), Style::new().fg(color))),
        Cell::from(progress_bar(row.progress)),
        Cell::from(Span::styled(
            row.error.clone().unwrap_or_default(),
            Style::new().fg(theme::CRITICAL),
        )),
    ])
}

fn progress_bar(progress: u8) -> String {
    let filled = usize::from(progress.min(100)) * PROGRESS_BAR_WIDTH / 100;
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        ".".repeat(PROGRESS_BAR_WIDTH - filled),
        progress
    )
}

fn render_notice(f: &mut Frame, screen: &Screen, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::new().fg(theme::BORDER))
        .title("Notice");
    let line = match (&screen.view.notice, &screen.status_note) {
        (Some(notice), _) => Line::from(vec![
            Span::styled(
                format!("{} ", notice.raised_at.format("%H:%M:%S")),
                Style::new().fg(theme::MUTED),
            ),
            Span::styled(
                notice.message.clone(),
                Style::new().fg(theme::notice_color(notice.kind)),
            ),
            Span::styled("  (d to dismiss)", Style::new().fg(theme::MUTED)),
        ]),
        (None, Some(note)) => Line::from(Span::styled(note.clone(), Style::new().fg(theme::TEXT))),
        (None, None) => Line::from(""),
    };
    f.render_widget(
        Paragraph::new(line).block(block).wrap(Wrap { trim: true }),
        area,
    );
}

fn render_keys(f: &mut Frame, area: Rect) {
    let keys = [
        ("s/Enter", "start"),
        ("c", "cancel"),
        ("d", "dismiss"),
        ("q/Esc", "quit"),
    ];
    let mut spans = Vec::new();
    for (key, label) in keys {
        spans.push(Span::styled(key, theme::KEY_STYLE));
        spans.push(Span::styled(
            format!(" {label}  "),
            Style::new().fg(theme::MUTED),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
