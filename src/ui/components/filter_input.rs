use super::KeyResult;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

/// Events the filter reports to the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterEvent {
  /// A new filter was submitted with Enter
  Applied,
  /// Escape removed the filter
  Cleared,
}

/// Free-text filter for the item lists, opened with `/`.
///
/// The applied value is sent to the service with the page request, so edits
/// only take effect on Enter.
#[derive(Debug, Clone, Default)]
pub struct FilterInput {
  draft: String,
  applied: String,
  active: bool,
}

impl FilterInput {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  /// The filter currently applied to requests
  pub fn value(&self) -> &str {
    &self.applied
  }

  pub fn handle_key(&mut self, key: KeyEvent) -> KeyResult<FilterEvent> {
    if !self.active {
      if key.code == KeyCode::Char('/') {
        self.active = true;
        self.draft = self.applied.clone();
        return KeyResult::Handled;
      }
      return KeyResult::NotHandled;
    }

    match key.code {
      KeyCode::Enter => {
        self.active = false;
        let draft = self.draft.trim().to_string();
        if draft == self.applied {
          return KeyResult::Handled;
        }
        self.applied = draft;
        KeyResult::Event(FilterEvent::Applied)
      }
      KeyCode::Esc => {
        self.active = false;
        self.draft.clear();
        if self.applied.is_empty() {
          return KeyResult::Handled;
        }
        self.applied.clear();
        KeyResult::Event(FilterEvent::Cleared)
      }
      KeyCode::Backspace => {
        self.draft.pop();
        KeyResult::Handled
      }
      KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.draft.clear();
        KeyResult::Handled
      }
      KeyCode::Char(c) => {
        self.draft.push(c);
        KeyResult::Handled
      }
      // Swallow everything else while typing
      _ => KeyResult::Handled,
    }
  }

  /// Render the input overlay while editing
  pub fn render_overlay(&self, frame: &mut Frame, area: Rect) {
    if !self.active {
      return;
    }

    let width = (area.width * 60 / 100).clamp(30.min(area.width), 60.min(area.width));
    let overlay = Rect::new(area.x + 1, area.y + 1, width.saturating_sub(1), 3.min(area.height));
    frame.render_widget(Clear, overlay);

    let block = Block::default()
      .borders(Borders::ALL)
      .border_style(Style::default().fg(Color::Yellow))
      .title(" Filter ");
    let line = Line::from(vec![
      Span::styled("/", Style::default().fg(Color::Yellow)),
      Span::raw(self.draft.as_str()),
      Span::styled("_", Style::default().fg(Color::Yellow)),
    ]);
    frame.render_widget(Paragraph::new(line).block(block), overlay);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
  }

  fn type_text(input: &mut FilterInput, text: &str) {
    for c in text.chars() {
      input.handle_key(key(KeyCode::Char(c)));
    }
  }

  #[test]
  fn test_ignores_keys_until_opened() {
    let mut input = FilterInput::new();
    assert_eq!(input.handle_key(key(KeyCode::Char('s'))), KeyResult::NotHandled);
    assert_eq!(input.handle_key(key(KeyCode::Char('/'))), KeyResult::Handled);
    assert!(input.is_active());
  }

  #[test]
  fn test_applies_on_enter_only() {
    let mut input = FilterInput::new();
    input.handle_key(key(KeyCode::Char('/')));
    type_text(&mut input, "dune ");
    assert_eq!(input.value(), "");

    let result = input.handle_key(key(KeyCode::Enter));
    assert_eq!(result, KeyResult::Event(FilterEvent::Applied));
    assert_eq!(input.value(), "dune");
    assert!(!input.is_active());
  }

  #[test]
  fn test_unchanged_filter_is_not_reapplied() {
    let mut input = FilterInput::new();
    input.handle_key(key(KeyCode::Char('/')));
    type_text(&mut input, "dune");
    input.handle_key(key(KeyCode::Enter));

    input.handle_key(key(KeyCode::Char('/')));
    assert_eq!(input.handle_key(key(KeyCode::Enter)), KeyResult::Handled);
  }

  #[test]
  fn test_escape_clears_applied_filter() {
    let mut input = FilterInput::new();
    input.handle_key(key(KeyCode::Char('/')));
    assert_eq!(input.handle_key(key(KeyCode::Esc)), KeyResult::Handled);

    input.handle_key(key(KeyCode::Char('/')));
    type_text(&mut input, "alien");
    input.handle_key(key(KeyCode::Enter));

    input.handle_key(key(KeyCode::Char('/')));
    let result = input.handle_key(key(KeyCode::Esc));
    assert_eq!(result, KeyResult::Event(FilterEvent::Cleared));
    assert_eq!(input.value(), "");
  }

  #[test]
  fn test_editing_keys() {
    let mut input = FilterInput::new();
    input.handle_key(key(KeyCode::Char('/')));
    type_text(&mut input, "abc");
    input.handle_key(key(KeyCode::Backspace));
    input.handle_key(key(KeyCode::Enter));
    assert_eq!(input.value(), "ab");

    input.handle_key(key(KeyCode::Char('/')));
    input.handle_key(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL));
    type_text(&mut input, "x");
    input.handle_key(key(KeyCode::Enter));
    assert_eq!(input.value(), "x");
  }
}
