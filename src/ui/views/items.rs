use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Tabs};

use crate::api::{MediaItem, WatchList};
use crate::app::Tab;
use crate::event::Rows;
use crate::ui::renderfns::{item_status_color, truncate};

/// State of the visible list
pub struct ListView<'a> {
  pub tab: Tab,
  pub page: u32,
  pub page_size: u32,
  pub rows: Option<&'a Rows>,
  pub loading: bool,
  pub error: Option<&'a str>,
  pub filter: &'a str,
}

pub fn draw_items(frame: &mut Frame, area: Rect, view: &ListView, list_state: &mut ListState) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([Constraint::Length(1), Constraint::Min(1)])
    .split(area);

  let tabs = Tabs::new(Tab::ALL.iter().map(|t| t.label()))
    .select(view.tab.index())
    .style(Style::default().fg(Color::DarkGray))
    .highlight_style(Style::default().fg(Color::Cyan).bold());
  frame.render_widget(tabs, chunks[0]);

  let pages = view
    .rows
    .map(|rows| rows.page_count(view.page_size))
    .unwrap_or(1);
  let mut title = format!(" {} page {}/{} ", view.tab.label(), view.page, pages);
  if !view.filter.is_empty() {
    title.push_str(&format!("[/{}] ", view.filter));
  }
  if view.loading {
    title.push_str("(loading...) ");
  }

  let block = Block::default()
    .title(title)
    .title_alignment(Alignment::Center)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let rows = match view.rows {
    Some(rows) if !rows.is_empty() => rows,
    _ => {
      let content = match (view.error, view.loading) {
        (Some(e), _) => format!("Failed to load: {}. Press 'r' to retry.", e),
        (None, true) => "Loading...".to_string(),
        (None, false) => "Nothing here yet.".to_string(),
      };
      let paragraph = Paragraph::new(content)
        .block(block)
        .style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, chunks[1]);
      return;
    }
  };

  let items: Vec<ListItem> = match rows {
    Rows::Items(page) => page.items.iter().map(item_line).collect(),
    Rows::Lists(page) => page.items.iter().map(list_line).collect(),
  };
  if list_state.selected().map_or(true, |i| i >= items.len()) {
    list_state.select(Some(0));
  }

  let list = List::new(items)
    .block(block)
    .highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");
  frame.render_stateful_widget(list, chunks[1], list_state);
}

fn item_line(item: &MediaItem) -> ListItem<'static> {
  let status = item.status.as_deref().unwrap_or("-");
  let title = match item.year {
    Some(year) => format!("{} ({})", item.title, year),
    None => item.title.clone(),
  };

  let mut spans = vec![
    Span::styled(
      format!("{:<18}", truncate(status, 18)),
      Style::default().fg(item_status_color(status)),
    ),
    Span::styled(
      format!("{:<7}", item.media_type.as_deref().unwrap_or("")),
      Style::default().fg(Color::Cyan),
    ),
    Span::raw(format!("{:<50}", truncate(&title, 50))),
  ];
  if let Some(error) = &item.error_message {
    spans.push(Span::styled(
      format!(" {}", truncate(error, 50)),
      Style::default().fg(Color::Red),
    ));
  }
  ListItem::new(Line::from(spans))
}

fn list_line(list: &WatchList) -> ListItem<'static> {
  let count = list
    .item_count
    .map(|n| format!("{} items", n))
    .unwrap_or_default();
  let synced = list
    .last_synced
    .as_deref()
    .map(|s| format!("synced {}", s))
    .unwrap_or_else(|| "never synced".to_string());

  ListItem::new(Line::from(vec![
    Span::styled(format!("{:<12}", list.list_type), Style::default().fg(Color::Cyan)),
    Span::raw(format!("{:<40}", truncate(&list.list_id, 40))),
    Span::styled(format!("{:<12}", count), Style::default().fg(Color::White)),
    Span::styled(synced, Style::default().fg(Color::DarkGray)),
  ]))
}
