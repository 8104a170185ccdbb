//! Messages pane: the reconciled log of the open conversation.

use std::time::Instant;

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};
use unicode_width::UnicodeWidthStr;

use crate::chat::display;
use crate::chat::session::Conversation;
use crate::chat::LogEntry;
use crate::models::CurrentUser;

const INDENT: usize = 2;

/// Render the messages pane. `scroll` counts lines up from the bottom.
pub fn render(
    area: Rect,
    buf: &mut Buffer,
    conv: Option<&Conversation>,
    me: &CurrentUser,
    scroll: usize,
) {
    let title = conv.map_or_else(|| "No conversation".to_string(), |c| c.kind.title());
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Plain)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            format!(" {} ", title),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ));

    let inner = block.inner(area);
    block.render(area, buf);
    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let Some(conv) = conv else {
        Paragraph::new(Line::from(Span::styled(
            " Open a conversation: /admin, /bot or /user <id>",
            Style::default().fg(Color::DarkGray),
        )))
        .render(inner, buf);
        return;
    };

    // Last row is reserved for the typing line.
    let log_height = inner.height.saturating_sub(1) as usize;
    let lines = build_lines(conv.log.entries(), me, inner.width as usize);
    let start = visible_start(lines.len(), log_height, scroll);

    for (row, line) in lines.iter().skip(start).take(log_height).enumerate() {
        let line_area = Rect::new(inner.x, inner.y + row as u16, inner.width, 1);
        Paragraph::new(line.clone()).render(line_area, buf);
    }

    if start > 0 {
        let cell = &mut buf[(inner.x + inner.width.saturating_sub(1), inner.y)];
        cell.set_char('^');
        cell.set_style(Style::default().fg(Color::DarkGray));
    }

    if let Some(who) = conv.typing(Instant::now()) {
        let typing_area = Rect::new(
            inner.x,
            inner.y + inner.height.saturating_sub(1),
            inner.width,
            1,
        );
        Paragraph::new(Line::from(Span::styled(
            format!(" {} is typing...", who),
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )))
        .render(typing_area, buf);
    }
}

/// First line to draw so that the view ends `scroll` lines above the bottom.
fn visible_start(total: usize, height: usize, scroll: usize) -> usize {
    let max_start = total.saturating_sub(height);
    max_start.saturating_sub(scroll)
}

/// Flatten log entries into display lines.
fn build_lines(entries: &[LogEntry], me: &CurrentUser, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let body_width = width.saturating_sub(INDENT + 1);

    for entry in entries {
        let msg = &entry.message;
        let sender_style = if msg.from_bot() {
            Style::default().fg(Color::Magenta)
        } else if display::is_mine(msg, me) {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::Yellow)
        }
        .add_modifier(Modifier::BOLD);

        let mut header = vec![
            Span::raw(" "),
            Span::styled(display::sender_label(msg, me).to_string(), sender_style),
            Span::styled(
                format!("  {}", msg.created_at.format("%H:%M")),
                Style::default().fg(Color::DarkGray),
            ),
        ];
        if entry.is_pending() {
            header.push(Span::styled(
                "  sending...",
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            ));
        }
        lines.push(Line::from(header));

        let body_style = if entry.is_pending() {
            Style::default().fg(Color::Gray)
        } else {
            Style::default().fg(Color::White)
        };
        for row in wrap_text(display::display_content(msg), body_width) {
            lines.push(Line::from(vec![
                Span::raw(" ".repeat(INDENT + 1)),
                Span::styled(row, body_style),
            ]));
        }
        lines.push(Line::from(""));
    }

    lines
}

/// Word-wrap by terminal width. Words wider than a row are split.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 {
        return vec![];
    }
    let mut result = Vec::new();
    for line in text.lines() {
        if line.width() <= max_width {
            result.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            let sep = usize::from(!current.is_empty());
            if current.width() + sep + word.width() <= max_width {
                if sep == 1 {
                    current.push(' ');
                }
                current.push_str(word);
                continue;
            }
            if !current.is_empty() {
                result.push(std::mem::take(&mut current));
            }
            for c in word.chars() {
                let cw = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
                if current.width() + cw > max_width {
                    result.push(std::mem::take(&mut current));
                }
                current.push(c);
            }
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}
