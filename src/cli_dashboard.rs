//! Jobs (latest jobs and their status)
//! Queue (jobs not finished yet, broker depth)
//! Records (latest stored log records)

use std::{
  error::Error,
  io,
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use chrono::Utc;
use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use lapin::Channel;
use tokio::runtime::Runtime;
use tui::{
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
  Terminal,
};
use lrqs::config::Config;
use lrqs::database::{PgRecordStore, RecordStore, setup_database};
use lrqs::messaging::{create_rabbit_channel, queue_depth};
use lrqs::models::{Job, JobStatus, LogRecord};
use lrqs::result_store::{PgResultStore, ResultStore};

const JOB_LIMIT: i64 = 20;
const RECORD_LIMIT: i64 = 20;

#[derive(Clone, Copy)]
enum DashboardTab {
  Jobs,
  Queue,
  Records,
}

struct App {
  current_tab: DashboardTab,
  jobs: Vec<Job>,
  records: Vec<LogRecord>,
  broker_depth: Option<u32>,
  error: Option<String>,
}

impl App {
  fn new() -> Self {
    Self {
      current_tab: DashboardTab::Jobs,
      jobs: vec![],
      records: vec![],
      broker_depth: None,
      error: None,
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Jobs => DashboardTab::Queue,
      DashboardTab::Queue => DashboardTab::Records,
      DashboardTab::Records => DashboardTab::Jobs,
    }
  }

  fn previous_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Jobs => DashboardTab::Records,
      DashboardTab::Queue => DashboardTab::Jobs,
      DashboardTab::Records => DashboardTab::Queue,
    }
  }

  fn unfinished(&self) -> impl Iterator<Item = &Job> {
    self.jobs.iter().filter(|job| !job.status.is_terminal())
  }
}

struct Snapshot {
  jobs: Vec<Job>,
  records: Vec<LogRecord>,
  broker_depth: Option<u32>,
  error: Option<String>,
}

async fn fetch_state(
  results: &PgResultStore,
  records: &PgRecordStore,
  channel: &Channel,
  queue_name: &str,
) -> Snapshot {
  let mut errors = Vec::new();
  let jobs = results.recent(JOB_LIMIT).await.unwrap_or_else(|e| {
    errors.push(e.to_string());
    vec![]
  });
  let records = records.recent(RECORD_LIMIT).await.unwrap_or_else(|e| {
    errors.push(e.to_string());
    vec![]
  });
  let broker_depth = match queue_depth(channel, queue_name).await {
    Ok(depth) => Some(depth),
    Err(e) => {
      errors.push(e.to_string());
      None
    }
  };
  Snapshot {
    jobs,
    records,
    broker_depth,
    error: if errors.is_empty() { None } else { Some(errors.join("; ")) },
  }
}

fn main() -> Result<(), Box<dyn Error>> {
  let config = Config::from_env()?;
  let rt = Runtime::new()?;
  let db_pool = rt.block_on(setup_database(config.database_url()?))?;
  let rabbit_channel = rt.block_on(create_rabbit_channel(config.rabbitmq_url()?))?;
  let results = PgResultStore::new(db_pool.clone());
  let records = PgRecordStore::new(db_pool);
  let queue_name = config.queue_name.clone();

  let (tx, rx) = mpsc::channel::<Snapshot>();
  thread::spawn(move || {
    loop {
      let snapshot = rt.block_on(fetch_state(&results, &records, &rabbit_channel, &queue_name));
      if tx.send(snapshot).is_err() {
        break;
      }
      thread::sleep(Duration::from_secs(2));
    }
  });

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let mut app = App::new();
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    if let Ok(snapshot) = rx.try_recv() {
      app.jobs = snapshot.jobs;
      app.records = snapshot.records;
      app.broker_depth = snapshot.broker_depth;
      app.error = snapshot.error;
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate
      .checked_sub(last_tick.elapsed())
      .unwrap_or_else(|| Duration::from_secs(0));
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Right => app.next_tab(),
          KeyCode::Left => app.previous_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn status_color(status: JobStatus) -> Color {
  match status {
    JobStatus::Pending => Color::Yellow,
    JobStatus::Started => Color::Cyan,
    JobStatus::Success => Color::Green,
    JobStatus::Failure => Color::Red,
  }
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([
      Constraint::Length(3),
      Constraint::Min(0),
      Constraint::Length(3),
    ].as_ref())
    .split(f.size());

  let tab_titles = vec!["Jobs", "Queue", "Records"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
    .block(Block::default().borders(Borders::ALL).title("Log Redaction Dashboard"))
    .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .select(match app.current_tab {
      DashboardTab::Jobs => 0,
      DashboardTab::Queue => 1,
      DashboardTab::Records => 2,
    });
  f.render_widget(tabs, chunks[0]);

  match app.current_tab {
    DashboardTab::Jobs => render_jobs(f, app, chunks[1]),
    DashboardTab::Queue => render_queue(f, app, chunks[1]),
    DashboardTab::Records => render_records(f, app, chunks[1]),
  }

  let footer_text = match &app.error {
    Some(error) => format!("Error: {}", error),
    None => "←/→: Switch Tabs | q: Quit".to_string(),
  };
  let footer = Paragraph::new(footer_text)
    .style(Style::default().fg(if app.error.is_some() { Color::Red } else { Color::White }))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn job_item(job: &Job) -> ListItem<'static> {
  let age = Utc::now().signed_duration_since(job.created_at).num_seconds();
  let mut spans = vec![
    Span::styled(format!("{} ", job.id), Style::default().add_modifier(Modifier::BOLD)),
    Span::styled(format!("{:<8}", job.status.as_str()), Style::default().fg(status_color(job.status))),
    Span::raw(format!(" {} | {}s ago", job.kind, age)),
  ];
  if let Some(error) = &job.error {
    spans.push(Span::styled(format!(" | {}", error), Style::default().fg(Color::Red)));
  }
  ListItem::new(Spans::from(spans))
}

fn render_jobs<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(75), Constraint::Percentage(25)].as_ref())
    .split(area);

  let job_items: Vec<ListItem> = app.jobs.iter().map(job_item).collect();
  let jobs_list = List::new(job_items)
    .block(Block::default().borders(Borders::ALL).title(format!("Latest {} Jobs", JOB_LIMIT)));
  f.render_widget(jobs_list, chunks[0]);

  let count = |status: JobStatus| app.jobs.iter().filter(|job| job.status == status).count();
  let totals: Vec<ListItem> = [JobStatus::Pending, JobStatus::Started, JobStatus::Success, JobStatus::Failure]
    .into_iter()
    .map(|status| {
      ListItem::new(Spans::from(Span::styled(
        format!("{}: {}", status, count(status)),
        Style::default().fg(status_color(status)),
      )))
    })
    .collect();
  let totals_list = List::new(totals).block(Block::default().borders(Borders::ALL).title("Totals"));
  f.render_widget(totals_list, chunks[1]);
}

fn render_queue<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let task_items: Vec<ListItem> = app.unfinished().map(job_item).collect();
  let depth = app
    .broker_depth
    .map(|d| d.to_string())
    .unwrap_or_else(|| "N/A".into());
  let header = format!("Unfinished Jobs (waiting in RabbitMQ: {})", depth);
  let tasks_list = List::new(if task_items.is_empty() {
    vec![ListItem::new(Spans::from(Span::raw("No unfinished jobs")))]
  } else {
    task_items
  })
    .block(Block::default().borders(Borders::ALL).title(header));
  f.render_widget(tasks_list, area);
}

fn render_records<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let record_items: Vec<ListItem> = app.records.iter().map(|record| {
    ListItem::new(Spans::from(vec![
      Span::styled(record.received_at.format("%Y-%m-%d %H:%M:%S").to_string(), Style::default().fg(Color::Green)),
      Span::raw(format!(" {} - ", record.id)),
      Span::raw(record.payload.to_string()),
    ]))
  }).collect();
  let records_list = List::new(record_items)
    .block(Block::default().borders(Borders::ALL).title("Stored Log Records (unredacted)"));
  f.render_widget(records_list, area);
}
