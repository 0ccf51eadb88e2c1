// src/tui.rs
use std::io;
use std::time::Duration;

use chrono::{Local, Utc};
use crossterm::event::{Event as CrosstermEvent, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;

use crate::app::{App, CompletedHistory, CompletedSelect, CompletedSend};
use crate::config::Theme;
use crate::markdown;
use crate::reveal::{RevealConfig, Visible};
use crate::session::{self, Message, Role};

pub const TITLE: &str = "知识产权法律咨询系统";
pub const DISCLAIMER: &str =
    "本系统由AI驱动，提供的信息仅供参考，不构成正式的法律意见或律师-客户关系。对于重大法律事务，请咨询合格的专业律师。";

const NEW_CHAT_LABEL: &str = "＋ 新建对话";
const CITATIONS_HEADING: &str = "参考资料 (基于检索增强生成 - RAG):";
// Below this width the sidebar becomes an overlay toggled with Ctrl+O.
const NARROW_WIDTH: u16 = 90;
const SIDEBAR_WIDTH: u16 = 32;
const SIDEBAR_COLLAPSED_WIDTH: u16 = 6;

enum Completion {
    History(CompletedHistory),
    Send(CompletedSend),
    Select(CompletedSelect),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Input,
    Sidebar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

struct Palette {
    bg: Color,
    fg: Color,
    dim: Color,
    accent: Color,
    user: Color,
    error: Color,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Light => Palette {
                bg: Color::Rgb(248, 250, 252),
                fg: Color::Rgb(15, 23, 42),
                dim: Color::Rgb(100, 116, 139),
                accent: Color::Rgb(37, 99, 235),
                user: Color::Rgb(22, 101, 52),
                error: Color::Rgb(185, 28, 28),
            },
            Theme::Dark => Palette {
                bg: Color::Rgb(2, 6, 23),
                fg: Color::Rgb(226, 232, 240),
                dim: Color::Rgb(148, 163, 184),
                accent: Color::Rgb(96, 165, 250),
                user: Color::Rgb(134, 239, 172),
                error: Color::Rgb(248, 113, 113),
            },
        }
    }
}

/// Per-frame view of the widget state the terminal draw closure needs.
struct View<'a> {
    input: &'a str,
    focus: Focus,
    highlighted: usize,
    scroll_from_bottom: u16,
}

pub struct Tui {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    input: String,
    focus: Focus,
    // 0 is the "new chat" entry, sessions follow.
    highlighted: usize,
    scroll_from_bottom: u16,
    // Width class of the last drawn frame.
    narrow: bool,
}

impl Tui {
    pub fn new() -> io::Result<Self> {
        let backend = CrosstermBackend::new(io::stdout());
        let terminal = Terminal::new(backend)?;
        Ok(Self {
            terminal,
            input: String::new(),
            focus: Focus::Input,
            highlighted: 0,
            scroll_from_bottom: 0,
            narrow: false,
        })
    }

    pub async fn run_loop(&mut self, app: &mut App) -> anyhow::Result<()> {
        crossterm::terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
        log::info!("TUI run loop started.");

        let result = self.event_loop(app).await;

        crossterm::terminal::disable_raw_mode()?;
        crossterm::execute!(self.terminal.backend_mut(), crossterm::terminal::LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        log::info!("TUI run loop finished.");
        result
    }

    async fn event_loop(&mut self, app: &mut App) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let mut events = EventStream::new();
        // Redraw at the reveal cadence so typing progress shows without input.
        let tick = RevealConfig::from(&app.config.reveal).tick;
        let mut redraw = tokio::time::interval(tick.max(Duration::from_millis(15)));
        redraw.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let pending = app.begin_history_load();
        let history_tx = tx.clone();
        tokio::spawn(async move {
            let _ = history_tx.send(Completion::History(pending.run().await));
        });

        let mut needs_draw = true;
        loop {
            if needs_draw {
                self.draw(app)?;
            }
            needs_draw = true;
            tokio::select! {
                _ = redraw.tick() => needs_draw = app.is_animating(),
                Some(done) = rx.recv() => self.apply(app, done),
                maybe_event = events.next() => match maybe_event {
                    Some(Ok(CrosstermEvent::Key(key))) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(app, key, &tx) == Flow::Quit {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("Terminal event error: {}", e);
                        return Err(e.into());
                    }
                    None => break,
                },
            }
        }
        Ok(())
    }

    fn apply(&mut self, app: &mut App, done: Completion) {
        match done {
            Completion::History(completed) => {
                app.finish_history_load(completed);
                self.highlighted = self.highlighted.min(app.sessions().len());
            }
            Completion::Send(completed) => {
                let outcome = app.finish_send(completed);
                log::debug!("Send completed: {:?}", outcome);
                self.scroll_from_bottom = 0;
            }
            Completion::Select(completed) => {
                let outcome = app.finish_select(completed);
                log::debug!("Select completed: {:?}", outcome);
                self.scroll_from_bottom = 0;
            }
        }
    }

    fn handle_key(&mut self, app: &mut App, key: KeyEvent, tx: &mpsc::UnboundedSender<Completion>) -> Flow {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => return Flow::Quit,
            KeyCode::Char('c') if ctrl => return Flow::Quit,
            KeyCode::Char('n') if ctrl => {
                app.start_new_chat();
                self.focus = Focus::Input;
                self.highlighted = 0;
                self.scroll_from_bottom = 0;
            }
            KeyCode::Char('t') if ctrl => app.ui.toggle_theme(),
            KeyCode::Char('b') if ctrl => app.ui.sidebar_collapsed = !app.ui.sidebar_collapsed,
            KeyCode::Char('o') if ctrl => {
                app.ui.sidebar_open = !app.ui.sidebar_open;
                self.focus = settle_focus(self.focus, sidebar_visible(self.narrow, app.ui.sidebar_open));
            }
            KeyCode::Tab => self.focus = next_focus(self.focus, sidebar_visible(self.narrow, app.ui.sidebar_open)),
            KeyCode::PageUp => self.scroll_from_bottom = self.scroll_from_bottom.saturating_add(5),
            KeyCode::PageDown => self.scroll_from_bottom = self.scroll_from_bottom.saturating_sub(5),
            _ => match self.focus {
                Focus::Sidebar => self.handle_sidebar_key(app, key, tx),
                Focus::Input => self.handle_input_key(app, key, tx),
            },
        }
        Flow::Continue
    }

    fn handle_sidebar_key(&mut self, app: &mut App, key: KeyEvent, tx: &mpsc::UnboundedSender<Completion>) {
        match key.code {
            KeyCode::Up => self.highlighted = self.highlighted.saturating_sub(1),
            KeyCode::Down => self.highlighted = (self.highlighted + 1).min(app.sessions().len()),
            KeyCode::Enter => {
                if self.highlighted == 0 {
                    app.start_new_chat();
                    self.focus = Focus::Input;
                } else if let Some(summary) = app.sessions().get(self.highlighted - 1) {
                    let id = summary.id.clone();
                    if let Some(pending) = app.begin_select(&id) {
                        app.ui.sidebar_open = false;
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            let _ = tx.send(Completion::Select(pending.run().await));
                        });
                    }
                }
                self.scroll_from_bottom = 0;
            }
            _ => {}
        }
    }

    fn handle_input_key(&mut self, app: &mut App, key: KeyEvent, tx: &mpsc::UnboundedSender<Completion>) {
        match key.code {
            KeyCode::Enter if key.modifiers.contains(KeyModifiers::ALT) => self.input.push('\n'),
            KeyCode::Enter => {
                if app.is_busy() {
                    return;
                }
                if let Some(pending) = app.begin_send(&self.input) {
                    log::debug!("Awaiting reply {}", pending.assistant_id());
                    self.input.clear();
                    self.scroll_from_bottom = 0;
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(Completion::Send(pending.run().await));
                    });
                }
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => self.input.push(c),
            _ => {}
        }
    }

    fn draw(&mut self, app: &App) -> io::Result<()> {
        let view = View {
            input: &self.input,
            focus: self.focus,
            highlighted: self.highlighted,
            scroll_from_bottom: self.scroll_from_bottom,
        };
        let mut width = 0;
        self.terminal.draw(|f| {
            width = f.area().width;
            draw_frame(f, app, &view)
        })?;
        self.narrow = width < NARROW_WIDTH;
        // Selecting a session closes the overlay sidebar; don't leave focus on it.
        self.focus = settle_focus(self.focus, sidebar_visible(self.narrow, app.ui.sidebar_open));
        Ok(())
    }
}

/// On narrow terminals the sidebar is only on screen while opened with Ctrl+O.
fn sidebar_visible(narrow: bool, sidebar_open: bool) -> bool {
    !narrow || sidebar_open
}

fn next_focus(focus: Focus, sidebar_visible: bool) -> Focus {
    match focus {
        Focus::Input if sidebar_visible => Focus::Sidebar,
        _ => Focus::Input,
    }
}

fn settle_focus(focus: Focus, sidebar_visible: bool) -> Focus {
    if sidebar_visible { focus } else { Focus::Input }
}

fn draw_frame(f: &mut Frame, app: &App, view: &View<'_>) {
    let palette = Palette::for_theme(app.ui.theme);
    let area = f.area();
    f.render_widget(Block::default().style(Style::default().bg(palette.bg).fg(palette.fg)), area);

    let narrow = area.width < NARROW_WIDTH;
    let sidebar_width = if narrow {
        if app.ui.sidebar_open { SIDEBAR_WIDTH.min(area.width) } else { 0 }
    } else if app.ui.sidebar_collapsed {
        SIDEBAR_COLLAPSED_WIDTH
    } else {
        SIDEBAR_WIDTH
    };

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(sidebar_width), Constraint::Min(0)])
        .split(area);

    if sidebar_width > 0 {
        let collapsed = !narrow && app.ui.sidebar_collapsed;
        draw_sidebar(f, app, view, &palette, columns[0], collapsed);
    }
    // On narrow terminals the open sidebar takes the whole width.
    if narrow && app.ui.sidebar_open {
        return;
    }
    draw_main(f, app, view, &palette, columns[1]);
}

fn draw_sidebar(f: &mut Frame, app: &App, view: &View<'_>, palette: &Palette, area: Rect, collapsed: bool) {
    let now = Utc::now();
    let current = app.current_session_id();
    let mut items = vec![ListItem::new(Line::styled(
        if collapsed { "＋" } else { NEW_CHAT_LABEL },
        Style::default().fg(palette.accent).add_modifier(Modifier::BOLD),
    ))];
    for summary in app.sessions() {
        let active = current == Some(summary.id.as_str());
        let title_style = if active {
            Style::default().fg(palette.accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(palette.fg)
        };
        if collapsed {
            items.push(ListItem::new(Line::styled(if active { "●" } else { "○" }, title_style)));
            continue;
        }
        items.push(ListItem::new(vec![
            Line::from(vec![
                Span::styled(summary.title.clone(), title_style),
                Span::styled(
                    format!("  {}", session::format_relative_time(summary.updated_at, now)),
                    Style::default().fg(palette.dim),
                ),
            ]),
            Line::styled(summary.preview.clone(), Style::default().fg(palette.dim)),
        ]));
    }

    let border_style = if view.focus == Focus::Sidebar {
        Style::default().fg(palette.accent)
    } else {
        Style::default().fg(palette.dim)
    };
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(if collapsed { "" } else { "历史会话" }),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut state = ListState::default();
    if view.focus == Focus::Sidebar {
        state.select(Some(view.highlighted));
    }
    f.render_stateful_widget(list, area, &mut state);
}

fn draw_main(f: &mut Frame, app: &App, view: &View<'_>, palette: &Palette, area: Rect) {
    let input_lines = view.input.split('\n').count().clamp(1, 6) as u16;
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(input_lines + 2),
            Constraint::Length(2),
        ])
        .split(area);

    draw_header(f, app, palette, rows[0]);
    draw_thread(f, app, view, palette, rows[1]);
    draw_input(f, app, view, palette, rows[2]);

    let disclaimer = Paragraph::new(DISCLAIMER)
        .style(Style::default().fg(palette.dim))
        .wrap(Wrap { trim: true });
    f.render_widget(disclaimer, rows[3]);
}

fn draw_header(f: &mut Frame, app: &App, palette: &Palette, area: Rect) {
    let theme_label = match app.ui.theme {
        Theme::Light => "浅色",
        Theme::Dark => "深色",
    };
    let mut spans = vec![
        Span::styled(format!(" {} ", TITLE), Style::default().fg(palette.accent).add_modifier(Modifier::BOLD)),
        Span::styled("IP Guardian", Style::default().fg(palette.dim)),
    ];
    if app.is_busy() {
        spans.push(Span::styled("  ● 处理中", Style::default().fg(palette.accent)));
    }
    spans.push(Span::styled(
        format!("   Ctrl+T {} · Ctrl+N 新对话 · Ctrl+B 侧栏 · Tab 切换 · Esc 退出", theme_label),
        Style::default().fg(palette.dim),
    ));
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn message_lines(app: &App, message: &Message, palette: &Palette) -> Vec<Line<'static>> {
    let (label, label_color) = match message.role {
        Role::User => ("您", palette.user),
        Role::Model => ("IP Guardian", palette.accent),
        Role::System => ("系统", palette.dim),
    };
    let mut lines = vec![Line::from(vec![
        Span::styled(label, Style::default().fg(label_color).add_modifier(Modifier::BOLD)),
        Span::styled(
            format!("  {}", message.timestamp.with_timezone(&Local).format("%H:%M")),
            Style::default().fg(palette.dim),
        ),
    ])];

    let body_style = if message.is_error {
        Style::default().fg(palette.error)
    } else {
        Style::default().fg(palette.fg)
    };

    match app.reveal().visible(message) {
        Visible::Busy => {
            let dots = (Utc::now().timestamp_millis() / 300 % 4) as usize;
            lines.push(Line::styled(format!("正在思考{}", ".".repeat(dots)), Style::default().fg(palette.dim)));
        }
        Visible::Text { text, typing } => {
            let mut body: Vec<Line<'static>> = match message.role {
                Role::User => text.split('\n').map(|line| Line::styled(line.to_string(), body_style)).collect(),
                _ => markdown::render(&text, body_style),
            };
            if typing {
                let cursor = Span::styled("▍", Style::default().fg(palette.accent));
                match body.last_mut() {
                    Some(last) => last.spans.push(cursor),
                    None => body.push(Line::from(cursor)),
                }
            }
            lines.extend(body);

            if !message.citations().is_empty() {
                lines.push(Line::styled(CITATIONS_HEADING, Style::default().fg(palette.dim).add_modifier(Modifier::BOLD)));
                for (index, citation) in message.citations().iter().enumerate() {
                    lines.push(Line::from(vec![
                        Span::styled(format!("  [{}] {}", index + 1, citation.title), Style::default().fg(palette.fg)),
                        Span::styled(format!("  {}", citation.uri), Style::default().fg(palette.dim)),
                    ]));
                }
            }
        }
    }
    lines
}

fn draw_thread(f: &mut Frame, app: &App, view: &View<'_>, palette: &Palette, area: Rect) {
    let mut lines: Vec<Line<'static>> = Vec::new();
    for message in app.timeline().messages() {
        if !lines.is_empty() {
            lines.push(Line::default());
        }
        lines.extend(message_lines(app, message, palette));
    }

    let title = app
        .current_session_id()
        .and_then(|id| app.sessions().iter().find(|s| s.id == id))
        .map(|s| s.title.clone())
        .unwrap_or_else(|| "新会话".to_string());

    // Keep the newest line in view unless the user has paged up.
    let inner_width = area.width.saturating_sub(2).max(1) as usize;
    let inner_height = area.height.saturating_sub(2) as usize;
    let total_rows: usize = lines.iter().map(|line| line.width().div_ceil(inner_width).max(1)).sum();
    let max_offset = total_rows.saturating_sub(inner_height);
    let offset = max_offset.saturating_sub(view.scroll_from_bottom as usize);

    let thread = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.dim))
                .title(title),
        )
        .wrap(Wrap { trim: false })
        .scroll((offset.min(u16::MAX as usize) as u16, 0));
    f.render_widget(thread, area);
}

fn draw_input(f: &mut Frame, app: &App, view: &View<'_>, palette: &Palette, area: Rect) {
    let busy = app.is_busy();
    let title = if busy { "等待回复中…" } else { "输入您的问题（Enter 发送，Alt+Enter 换行）" };
    let border_style = if view.focus == Focus::Input && !busy {
        Style::default().fg(palette.accent)
    } else {
        Style::default().fg(palette.dim)
    };
    let text_style = if busy { Style::default().fg(palette.dim) } else { Style::default().fg(palette.fg) };

    let input_lines: Vec<&str> = view.input.split('\n').collect();
    let visible_rows = area.height.saturating_sub(2).max(1) as usize;
    let skip = input_lines.len().saturating_sub(visible_rows);
    let shown: Vec<Line> = input_lines[skip..].iter().map(|line| Line::styled(*line, text_style)).collect();

    let input = Paragraph::new(shown)
        .block(Block::default().borders(Borders::ALL).border_style(border_style).title(title));
    f.render_widget(input, area);

    if view.focus == Focus::Input && !busy {
        let last = input_lines.last().copied().unwrap_or_default();
        let x = area.x + 1 + Span::raw(last).width().min(area.width.saturating_sub(3) as usize) as u16;
        let y = area.y + 1 + (input_lines.len() - skip - 1) as u16;
        f.set_cursor_position((x, y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_skips_hidden_sidebar_on_narrow_terminals() {
        let hidden = sidebar_visible(true, false);
        assert!(!hidden);
        assert_eq!(next_focus(Focus::Input, hidden), Focus::Input);
        assert_eq!(next_focus(Focus::Sidebar, hidden), Focus::Input);
        assert_eq!(settle_focus(Focus::Sidebar, hidden), Focus::Input);
    }

    #[test]
    fn tab_cycles_when_sidebar_is_on_screen() {
        for visible in [sidebar_visible(false, false), sidebar_visible(true, true)] {
            assert!(visible);
            assert_eq!(next_focus(Focus::Input, visible), Focus::Sidebar);
            assert_eq!(next_focus(Focus::Sidebar, visible), Focus::Input);
            assert_eq!(settle_focus(Focus::Sidebar, visible), Focus::Sidebar);
        }
    }

    #[tokio::test]
    async fn citations_show_while_reply_is_still_typing() {
        use std::sync::Arc;

        use crate::config::Config;
        use crate::llm::MockLegalAnswerService;
        use crate::store::MemorySessionStore;

        let mut app = App::new(
            Config::default(),
            Arc::new(MockLegalAnswerService::default()),
            Arc::new(MemorySessionStore::demo()),
        );
        app.send("如何申请专利?").await;
        let reply = app.timeline().messages().last().unwrap().clone();
        assert!(matches!(app.reveal().visible(&reply), Visible::Text { typing: true, .. }));

        let palette = Palette::for_theme(Theme::Light);
        let text: Vec<String> = message_lines(&app, &reply, &palette)
            .iter()
            .map(|line| line.spans.iter().map(|span| span.content.as_ref()).collect())
            .collect();
        assert!(text.iter().any(|line| line == CITATIONS_HEADING));
        assert!(text.iter().any(|line| line.contains("中华人民共和国专利法")));
    }
}
