//! UI rendering for the TUI

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget, Wrap},
    Frame,
};
use unicode_width::UnicodeWidthStr;

use super::app::App;
use super::compose;
use super::messages;
use crate::notifications::NotificationState;
use crate::realtime::ConnectionState;

/// Indicator symbol, label and color for the socket state
fn connection_indicator(state: ConnectionState) -> (&'static str, &'static str, Color) {
    match state {
        ConnectionState::Connected => ("*", "live", Color::Green),
        ConnectionState::Connecting => ("~", "connecting", Color::Yellow),
        ConnectionState::Disconnected => ("o", "offline", Color::Red),
    }
}

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Layout: header (1 line) + main content + compose box + status bar (1 line)
    let [header_area, main_area, compose_area, status_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(compose::COMPOSE_HEIGHT),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(header_area, frame.buffer_mut(), app);

    let me = app.session.me();
    if app.show_notifications {
        render_notifications(main_area, frame.buffer_mut(), &app.notifications);
    } else {
        messages::render(
            main_area,
            frame.buffer_mut(),
            app.session.active(),
            me,
            app.scroll,
        );
    }

    let target = app.session.active().map(|c| c.kind.title());
    compose::render(compose_area, frame, &app.compose, target.as_deref());

    render_status(status_area, frame.buffer_mut(), app);
}

/// Render the header bar
fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let title = " Remedi Chat";
    let (symbol, label, color) = connection_indicator(app.connection);

    let unread = app.notifications.unread();
    let badge = if unread > 0 {
        format!(" [{} unread] ", unread)
    } else {
        " [no alerts] ".to_string()
    };
    let badge_style = if unread > 0 {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };

    let conn = format!(" {} {} ", symbol, label);
    let user = format!(" {} ", app.session.me().display_name());

    // Right-align badge, connection and user name
    let right_width = badge.width() + conn.width() + user.width();
    let padding_width = (area.width as usize).saturating_sub(title.width() + right_width);

    let header_line = Line::from(vec![
        Span::styled(
            title,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" ".repeat(padding_width)),
        Span::styled(badge, badge_style),
        Span::styled(conn, Style::default().fg(color)),
        Span::styled(user, Style::default().fg(Color::Cyan)),
    ]);

    Paragraph::new(header_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Render the notification list in place of the conversation
fn render_notifications(area: Rect, buf: &mut Buffer, state: &NotificationState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Plain)
        .border_style(Style::default().fg(Color::Yellow))
        .title(Span::styled(
            format!(" Notifications ({} unread) - Esc to close ", state.unread()),
            Style::default().add_modifier(Modifier::BOLD),
        ));

    if state.items().is_empty() {
        Paragraph::new(Line::from(Span::styled(
            " Nothing here yet.",
            Style::default().fg(Color::DarkGray),
        )))
        .block(block)
        .render(area, buf);
        return;
    }

    let mut lines = Vec::new();
    for n in state.items() {
        let marker_style = if n.is_read {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        };
        lines.push(Line::from(vec![
            Span::styled(if n.is_read { "   " } else { " * " }, marker_style),
            Span::styled(
                n.title.clone().unwrap_or_else(|| "Notification".to_string()),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("  {}  #{}", n.created_at.format("%Y-%m-%d %H:%M"), n.id),
                Style::default().fg(Color::DarkGray),
            ),
        ]));
        lines.push(Line::from(Span::raw(format!("   {}", n.message))));
    }

    Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .render(area, buf);
}

/// Render the status bar
fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    if let Some(ref msg) = app.status_message {
        let style = if app.status_is_error {
            Style::default().fg(Color::Red).bg(Color::DarkGray)
        } else {
            Style::default().fg(Color::Green).bg(Color::DarkGray)
        };
        let line = Line::from(Span::styled(format!(" {} ", msg), style));
        Paragraph::new(line)
            .style(Style::default().bg(Color::DarkGray))
            .render(area, buf);
        return;
    }

    let sep_style = Style::default().fg(Color::Gray);
    let conversation = app
        .session
        .active()
        .map_or_else(|| "(none)".to_string(), |c| c.kind.title());

    let status_line = Line::from(vec![
        Span::styled(format!(" {} ", conversation), Style::default().fg(Color::Yellow)),
        Span::styled(" | ", sep_style),
        Span::styled("/help: commands", Style::default().fg(Color::Gray)),
        Span::styled(" | ", sep_style),
        Span::styled("PgUp/PgDn: scroll", Style::default().fg(Color::Gray)),
        Span::styled(" | ", sep_style),
        Span::styled("C-c: quit", Style::default().fg(Color::Gray)),
    ]);

    Paragraph::new(status_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}
