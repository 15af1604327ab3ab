use ratatui::style::{Color, Modifier, Style};
use swarm_core::{NoticeKind, ProcessState, TaskStatus};

pub const BORDER: Color = Color::Rgb(71, 85, 105);
pub const TEXT: Color = Color::Rgb(226, 232, 240);
pub const MUTED: Color = Color::Rgb(148, 163, 184);
pub const ACCENT: Color = Color::Rgb(56, 189, 248);
pub const OK: Color = Color::Rgb(34, 197, 94);
pub const WARN: Color = Color::Rgb(245, 158, 11);
pub const CRITICAL: Color = Color::Rgb(239, 68, 68);

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const KEY_STYLE: Style = Style::new().fg(ACCENT).add_modifier(Modifier::BOLD);

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}

pub mod icons {
    pub const DONE: &str = "x";
    pub const PENDING: &str = ".";
    pub const RUNNING: &str = ">";
    pub const FAILED: &str = "!";
}

pub fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Completed => icons::DONE,
        TaskStatus::Running => icons::RUNNING,
        TaskStatus::Failed => icons::FAILED,
        TaskStatus::Pending => icons::PENDING,
    }
}

pub fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Completed => OK,
        TaskStatus::Running => ACCENT,
        TaskStatus::Failed => CRITICAL,
        TaskStatus::Pending => MUTED,
    }
}

pub fn state_color(state: ProcessState) -> Color {
    match state {
        ProcessState::Idle => MUTED,
        ProcessState::Processing => ACCENT,
        ProcessState::Completed => OK,
    }
}

pub fn notice_color(kind: NoticeKind) -> Color {
    if kind.is_error() {
        CRITICAL
    } else {
        WARN
    }
}
