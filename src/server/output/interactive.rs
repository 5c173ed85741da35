//! Interactive sink: a live, scrollable list of recent requests
//!
//! Records are funnelled through an unbounded channel into a single render
//! loop running on a blocking thread, which owns the terminal.

use super::{content_length_text, OutputSink, StatusFamily};
use crate::build_info::BuildInfo;
use crate::server::record::RequestRecord;
use crate::server::types::ResolvedAddresses;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parking_lot::Mutex;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error};

/// Oldest entries are dropped beyond this many
pub const MAX_ENTRIES: usize = 1000;

const TICK_RATE: Duration = Duration::from_millis(100);

/// Bounded list of rendered requests, newest first, with a cursor
#[derive(Debug, Default)]
pub struct RequestList {
    entries: VecDeque<Arc<RequestRecord>>,
    selected: Option<usize>,
}

impl RequestList {
    pub fn push(&mut self, record: Arc<RequestRecord>) {
        self.entries.push_front(record);
        if self.entries.len() > MAX_ENTRIES {
            self.entries.pop_back();
        }
        // keep the cursor on the same entry as new ones arrive on top
        if let Some(selected) = self.selected {
            self.selected = Some((selected + 1).min(self.entries.len() - 1));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn next(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.selected = Some(match self.selected {
            Some(i) => (i + 1).min(self.entries.len() - 1),
            None => 0,
        });
    }

    pub fn previous(&mut self) {
        self.selected = match self.selected {
            Some(0) | None => None,
            Some(i) => Some(i - 1),
        };
    }

    pub fn first(&mut self) {
        self.selected = None;
    }

    pub fn last(&mut self) {
        if !self.entries.is_empty() {
            self.selected = Some(self.entries.len() - 1);
        }
    }

    fn items(&self) -> Vec<ListItem<'static>> {
        self.entries.iter().map(|record| render_record(record)).collect()
    }
}

fn status_color(record: &RequestRecord) -> Color {
    match StatusFamily::of(record.status) {
        StatusFamily::Success => Color::Green,
        StatusFamily::ClientError => Color::Yellow,
        StatusFamily::ServerError => Color::Red,
        StatusFamily::Other => Color::Blue,
    }
}

fn render_record(record: &RequestRecord) -> ListItem<'static> {
    let secondary = Style::default().fg(Color::DarkGray);
    let title = Line::from(vec![
        Span::styled(
            format!("{} {} ", record.method, record.url),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(
                "from {} at {}",
                record.remote_address,
                record.completed_at.format("%H:%M:%S")
            ),
            secondary,
        ),
    ]);
    let description = Line::from(vec![
        Span::styled(
            record.status.as_u16().to_string(),
            Style::default()
                .fg(status_color(record))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" {:?} ", record.duration)),
        Span::styled(
            format!(
                "{} {}",
                record.content_type.as_deref().unwrap_or(""),
                content_length_text(record.content_length)
            ),
            secondary,
        ),
    ]);
    ListItem::new(vec![title, description])
}

struct UiChannel {
    receiver: Option<mpsc::UnboundedReceiver<Arc<RequestRecord>>>,
}

/// Sink rendering records in a full-screen terminal list
pub struct InteractiveSink {
    sender: mpsc::UnboundedSender<Arc<RequestRecord>>,
    channel: Mutex<UiChannel>,
    build: BuildInfo,
    stopped: Arc<AtomicBool>,
    quit: Arc<Notify>,
}

impl InteractiveSink {
    /// `quit` is notified when the user leaves the interface
    pub fn new(build: BuildInfo, quit: Arc<Notify>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            channel: Mutex::new(UiChannel {
                receiver: Some(receiver),
            }),
            build,
            stopped: Arc::new(AtomicBool::new(false)),
            quit,
        }
    }
}

impl OutputSink for InteractiveSink {
    fn init(&self, location: &str, addresses: &ResolvedAddresses) {
        let Some(receiver) = self.channel.lock().receiver.take() else {
            debug!("Interactive output already initialized");
            return;
        };
        let title = format!(
            "servant {} ({}) | Serving {location} at {addresses}",
            self.build.version(),
            self.build.short_commit()
        );
        let stopped = Arc::clone(&self.stopped);
        let quit = Arc::clone(&self.quit);

        tokio::task::spawn_blocking(move || {
            if let Err(e) = run_interface(title, receiver, &stopped) {
                error!(error = %e, "Error running interactive output");
            }
            quit.notify_one();
        });
    }

    fn write(&self, record: Arc<RequestRecord>) {
        // the render loop is gone once the user quit
        let _ = self.sender.send(record);
    }

    fn close(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

fn run_interface(
    title: String,
    mut receiver: mpsc::UnboundedReceiver<Arc<RequestRecord>>,
    stopped: &AtomicBool,
) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = event_loop(&mut terminal, &title, &mut receiver, stopped);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    title: &str,
    receiver: &mut mpsc::UnboundedReceiver<Arc<RequestRecord>>,
    stopped: &AtomicBool,
) -> io::Result<()> {
    let mut list = RequestList::default();

    while !stopped.load(Ordering::Acquire) {
        while let Ok(record) = receiver.try_recv() {
            list.push(record);
        }

        terminal.draw(|frame| draw(frame, title, &list))?;

        if !event::poll(TICK_RATE)? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                KeyCode::Down | KeyCode::Char('j') => list.next(),
                KeyCode::Up | KeyCode::Char('k') => list.previous(),
                KeyCode::Home | KeyCode::Char('g') => list.first(),
                KeyCode::End | KeyCode::Char('G') => list.last(),
                _ => {}
            }
        }
    }
    Ok(())
}

fn draw(frame: &mut Frame, title: &str, list: &RequestList) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    let requests = List::new(list.items())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled(
                    title.to_string(),
                    Style::default()
                        .fg(Color::White)
                        .bg(Color::Magenta)
                        .add_modifier(Modifier::BOLD),
                )),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut state = ListState::default();
    state.select(list.selected());
    frame.render_stateful_widget(requests, chunks[0], &mut state);

    let help = Paragraph::new(format!(
        "{} requests | j/k move  g/G top/bottom  q quit",
        list.len()
    ))
    .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, chunks[1]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use http::{Method, StatusCode};

    fn record(url: &str) -> Arc<RequestRecord> {
        Arc::new(RequestRecord {
            remote_address: "127.0.0.1:1".to_string(),
            url: url.to_string(),
            method: Method::GET,
            status: StatusCode::OK,
            duration: Duration::from_millis(1),
            content_type: None,
            content_length: 0,
            body_size: None,
            completed_at: Local::now(),
        })
    }

    #[test]
    fn test_list_is_bounded_and_newest_first() {
        let mut list = RequestList::default();
        for i in 0..MAX_ENTRIES + 10 {
            list.push(record(&format!("/{i}")));
        }
        assert_eq!(list.len(), MAX_ENTRIES);
        assert_eq!(list.entries[0].url, format!("/{}", MAX_ENTRIES + 9));
        assert_eq!(list.entries[MAX_ENTRIES - 1].url, "/10");
    }

    #[test]
    fn test_cursor_follows_selected_entry() {
        let mut list = RequestList::default();
        list.push(record("/a"));
        list.push(record("/b"));
        list.next();
        list.next();
        assert_eq!(list.selected(), Some(1));
        assert_eq!(list.entries[1].url, "/a");

        list.push(record("/c"));
        assert_eq!(list.selected(), Some(2));
        assert_eq!(list.entries[2].url, "/a");
    }

    #[test]
    fn test_navigation_bounds() {
        let mut list = RequestList::default();
        list.next();
        assert_eq!(list.selected(), None);

        list.push(record("/a"));
        list.push(record("/b"));
        list.last();
        assert_eq!(list.selected(), Some(1));
        list.next();
        assert_eq!(list.selected(), Some(1));
        list.previous();
        list.previous();
        assert_eq!(list.selected(), None);
        list.first();
        assert!(list.selected().is_none());
    }

    #[tokio::test]
    async fn test_write_before_init_is_buffered() {
        let sink = InteractiveSink::new(BuildInfo::current(), Arc::new(Notify::new()));
        sink.write(record("/queued"));
        let mut channel = sink.channel.lock();
        let receiver = channel.receiver.as_mut().unwrap();
        assert_eq!(receiver.try_recv().unwrap().url, "/queued");
    }
}
