//! Compose box: single-line input with slash commands.

use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Frame,
};
use unicode_width::UnicodeWidthChar;

/// State for the compose box.
#[derive(Default)]
pub struct ComposeState {
    /// Current input text.
    pub input: String,
    /// Cursor position (character offset into `input`).
    pub cursor_pos: usize,
}

impl ComposeState {
    /// Insert a character at the current cursor position.
    pub fn insert_char(&mut self, c: char) {
        let byte_pos = self.char_to_byte(self.cursor_pos);
        self.input.insert(byte_pos, c);
        self.cursor_pos += 1;
    }

    /// Delete the character before the cursor (backspace).
    pub fn backspace(&mut self) {
        if self.cursor_pos > 0 {
            let byte_pos = self.char_to_byte(self.cursor_pos);
            let prev_byte_pos = self.char_to_byte(self.cursor_pos - 1);
            self.input.drain(prev_byte_pos..byte_pos);
            self.cursor_pos -= 1;
        }
    }

    /// Delete the character at the cursor (delete key).
    pub fn delete(&mut self) {
        if self.cursor_pos < self.input.chars().count() {
            let byte_pos = self.char_to_byte(self.cursor_pos);
            let next_byte_pos = self.char_to_byte(self.cursor_pos + 1);
            self.input.drain(byte_pos..next_byte_pos);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor_pos = self.cursor_pos.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        if self.cursor_pos < self.input.chars().count() {
            self.cursor_pos += 1;
        }
    }

    pub fn move_home(&mut self) {
        self.cursor_pos = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor_pos = self.input.chars().count();
    }

    /// Clear all input text (Ctrl+U).
    pub fn clear(&mut self) {
        self.input.clear();
        self.cursor_pos = 0;
    }

    /// Take the trimmed input and clear the box. `None` for blank input.
    pub fn take(&mut self) -> Option<String> {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return None;
        }
        self.clear();
        Some(text)
    }

    /// Put a draft back after a failed send, unless the user already typed
    /// something new.
    pub fn restore(&mut self, draft: String) {
        if self.input.trim().is_empty() {
            self.input = draft;
            self.move_end();
        }
    }

    /// Convert a char-based cursor position to a byte offset.
    fn char_to_byte(&self, char_pos: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }
}

/// Height of the compose box: border + input + border.
pub const COMPOSE_HEIGHT: u16 = 3;

/// Render the compose box and place the terminal cursor.
pub fn render(area: Rect, frame: &mut Frame, state: &ComposeState, target: Option<&str>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Plain)
        .border_style(Style::default().fg(Color::Yellow));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.height == 0 || inner.width == 0 {
        return;
    }
    let input_area = Rect::new(inner.x, inner.y, inner.width, 1);

    if state.input.is_empty() {
        let placeholder = match target {
            Some(title) => format!(" Message {}... (/help for commands)", title),
            None => " /admin, /bot or /user <id> to open a conversation".to_string(),
        };
        let line = Line::from(Span::styled(
            placeholder,
            Style::default().fg(Color::DarkGray),
        ));
        frame.render_widget(Paragraph::new(line), input_area);
        frame.set_cursor_position((input_area.x + 1, input_area.y));
        return;
    }

    let display = visible_window(&state.input, state.cursor_pos, input_area.width as usize);
    let line = Line::from(Span::styled(
        format!(" {}", display.visible),
        Style::default().fg(Color::White),
    ));
    frame.render_widget(Paragraph::new(line), input_area);
    frame.set_cursor_position((
        input_area.x + 1 + display.cursor_offset as u16,
        input_area.y,
    ));
}

/// What part of the input fits, and where the cursor lands in it.
#[derive(Debug, PartialEq, Eq)]
struct DisplayText {
    visible: String,
    /// Cursor offset in terminal columns.
    cursor_offset: usize,
}

/// Scroll the input horizontally so the cursor stays visible. Widths are
/// measured in terminal columns, so wide glyphs count double.
fn visible_window(input: &str, cursor_pos: usize, width: usize) -> DisplayText {
    let avail = width.saturating_sub(2);
    if avail == 0 {
        return DisplayText {
            visible: String::new(),
            cursor_offset: 0,
        };
    }

    let chars: Vec<(char, usize)> = input
        .chars()
        .map(|c| (c, c.width().unwrap_or(0)))
        .collect();

    // Walk back from the cursor until the window is full.
    let mut start = cursor_pos.min(chars.len());
    let mut used = 0;
    while start > 0 && used + chars[start - 1].1 <= avail {
        start -= 1;
        used += chars[start].1;
    }
    let cursor_offset = used;

    let mut visible = String::new();
    let mut cols = 0;
    for &(c, w) in &chars[start..] {
        if cols + w > avail {
            break;
        }
        visible.push(c);
        cols += w;
    }

    DisplayText {
        visible,
        cursor_offset,
    }
}
