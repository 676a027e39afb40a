use std::path::PathBuf;
use std::time::Duration;

// Usage: q=quit, s=search, n=search in results, r=replace, u=undo,
// c=cancel, z=pause/resume, p=path input, /=pattern, t=replacement

use crossterm::event::{self, Event, KeyCode};
use ratatui::{
	layout::{Constraint, Direction, Flex, Layout, Rect},
	style::{Color, Modifier, Style},
	text::{Line, Span},
	widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState},
	Frame,
};

use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sweep::{
	Coordinator, CoordinatorEvent, FileResult, PatternKind, RunCriteria, RunOutcome, SearchFlags,
	StatusSnapshot, SweepSettings,
};

const SPINNER: &[char] = &['⠋', '⠙', '⠸', '⠴', '⠦', '⠇'];

fn main() -> std::io::Result<()> {
	let log_dir = std::env::temp_dir().join("sweep");
	let _ = std::fs::create_dir_all(&log_dir);
	let log_path = log_dir.join("tui.log");
	let file = std::fs::File::create(&log_path)?;
	let (nb, guard) = tracing_appender::non_blocking(file);

	// Tracing subscriber -> write to file (non-blocking), not the terminal
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::registry()
		.with(fmt::layer().with_writer(nb))
		.with(env_filter)
		.init();
	// Tip: set RUST_LOG=sweep_tui=debug,sweep=info to change verbosity

	info!("Starting sweep TUI");

	{
		let mut terminal = ratatui::init();
		let _ = run(&mut terminal);
		ratatui::restore();
	}

	// Flush appender and print tail of log after UI restores
	drop(guard);
	if let Ok(s) = std::fs::read_to_string(&log_path) {
		let tail: Vec<_> = s.lines().rev().take(40).collect();
		println!("\n---- sweep TUI logs (last 40 lines) ----");
		for line in tail.into_iter().rev() {
			println!("{line}");
		}
		println!(
			"----------------------------------------\nLog file: {}",
			log_path.display()
		);
	} else {
		println!("Logs at: {}", log_path.display());
	}

	Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
	None,
	Path,
	Pattern,
	Replacement,
}

#[derive(Debug, Clone, Copy)]
enum Action {
	Quit,
	Search,
	SearchInResults,
	Replace,
	Undo,
	Cancel,
	TogglePause,
	ToggleRegex,
	EnterInput(InputMode),
	CancelInput,
	SubmitInput,
	Up,
	Down,
	PageUp,
	PageDown,
	Home,
	End,
}

struct UiState {
	path: PathBuf,
	pattern: String,
	replacement: String,
	use_regex: bool,
	input_mode: InputMode,
	input_buffer: String,
	paused: bool,
	status: StatusSnapshot,
	message: String,
	results: Vec<FileResult>,
	selected_idx: usize,
	spinner_idx: usize,
}

impl UiState {
	fn criteria(&self) -> RunCriteria {
		let mut criteria = if self.replacement.is_empty() {
			RunCriteria::search(&self.path, &self.pattern)
		} else {
			RunCriteria::replace(&self.path, &self.pattern, &self.replacement)
		};
		if self.use_regex {
			criteria = criteria.with_pattern_kind(PatternKind::Regex);
		}
		criteria.with_flags(SearchFlags {
			global: true,
			..SearchFlags::default()
		})
	}
}

fn run(terminal: &mut ratatui::DefaultTerminal) -> std::io::Result<()> {
	debug!("TUI loop start");

	let coordinator = Coordinator::with_defaults(SweepSettings::default());
	let events = coordinator.events();

	let mut ui = UiState {
		path: PathBuf::from("."),
		pattern: String::new(),
		replacement: String::new(),
		use_regex: false,
		input_mode: InputMode::None,
		input_buffer: String::new(),
		paused: false,
		status: StatusSnapshot::default(),
		message: "Set a pattern with '/', then press 's' to search".to_string(),
		results: Vec::new(),
		selected_idx: 0,
		spinner_idx: 0,
	};
	let mut table_state = TableState::default();

	loop {
		for action in handle_events(ui.input_mode, &mut ui.input_buffer)? {
			match action {
				Action::Quit => {
					info!("Quitting...");
					return Ok(());
				}
				Action::Search => {
					match coordinator.start_search(ui.criteria()) {
						Ok(()) => {
							ui.results.clear();
							ui.selected_idx = 0;
							ui.paused = false;
							ui.message = format!("Searching for '{}'...", ui.pattern);
						}
						Err(e) => {
							warn!("search refused: {e}");
							ui.message = e.to_string();
						}
					}
				}
				Action::SearchInResults => {
					match coordinator.start_search_in_results(ui.criteria()) {
						Ok(()) => {
							ui.results.clear();
							ui.selected_idx = 0;
							ui.paused = false;
							ui.message =
								format!("Searching previous results for '{}'...", ui.pattern);
						}
						Err(e) => {
							warn!("search in results refused: {e}");
							ui.message = e.to_string();
						}
					}
				}
				Action::Replace => {
					if !coordinator.can_replace(&ui.pattern) {
						ui.message =
							"Replace unavailable: search for the pattern first".to_string();
						continue;
					}
					match coordinator.start_replace(ui.criteria()) {
						Ok(()) => {
							ui.paused = false;
							ui.message = format!(
								"Replacing '{}' with '{}'...",
								ui.pattern, ui.replacement
							);
						}
						Err(e) => {
							warn!("replace refused: {e}");
							ui.message = e.to_string();
						}
					}
				}
				Action::Undo => match coordinator.undo() {
					Ok(()) => ui.message = "Reverting replacements...".to_string(),
					Err(e) => {
						warn!("undo refused: {e}");
						ui.message = e.to_string();
					}
				},
				Action::Cancel => {
					coordinator.cancel();
					ui.message = "Cancel requested".to_string();
				}
				Action::TogglePause => {
					if coordinator.can_cancel() {
						if ui.paused {
							coordinator.resume();
							ui.paused = false;
							ui.message = "Resumed".to_string();
						} else {
							coordinator.pause();
							ui.paused = true;
							ui.message = "Paused".to_string();
						}
					}
				}
				Action::ToggleRegex => {
					ui.use_regex = !ui.use_regex;
					ui.message = if ui.use_regex {
						"Pattern is a regular expression".to_string()
					} else {
						"Pattern is plain text".to_string()
					};
				}
				Action::EnterInput(mode) => {
					ui.input_mode = mode;
					ui.input_buffer = match mode {
						InputMode::Path => ui.path.to_string_lossy().to_string(),
						InputMode::Pattern => ui.pattern.clone(),
						InputMode::Replacement => ui.replacement.clone(),
						InputMode::None => String::new(),
					};
				}
				Action::CancelInput => {
					ui.input_mode = InputMode::None;
					ui.input_buffer.clear();
				}
				Action::SubmitInput => {
					let value = ui.input_buffer.trim().to_string();
					match ui.input_mode {
						InputMode::Path => {
							let path = PathBuf::from(&value);
							if path.is_dir() {
								ui.path = path;
								ui.message = format!("Root set to {}", ui.path.display());
							} else {
								ui.message = format!("Not a directory: {value}");
							}
						}
						InputMode::Pattern => {
							ui.pattern = value;
							ui.message = format!("Pattern set to '{}'", ui.pattern);
						}
						InputMode::Replacement => {
							ui.replacement = value;
							ui.message = format!("Replacement set to '{}'", ui.replacement);
						}
						InputMode::None => {}
					}
					ui.input_mode = InputMode::None;
					ui.input_buffer.clear();
				}
				Action::Up => ui.selected_idx = ui.selected_idx.saturating_sub(1),
				Action::Down => {
					if ui.selected_idx + 1 < ui.results.len() {
						ui.selected_idx += 1;
					}
				}
				Action::PageUp => ui.selected_idx = ui.selected_idx.saturating_sub(10),
				Action::PageDown => {
					if !ui.results.is_empty() {
						ui.selected_idx =
							(ui.selected_idx + 10).min(ui.results.len() - 1);
					}
				}
				Action::Home => ui.selected_idx = 0,
				Action::End => {
					if !ui.results.is_empty() {
						ui.selected_idx = ui.results.len() - 1;
					}
				}
			}
		}

		// Consume coordinator events opportunistically to refresh UI
		while let Ok(event) = events.try_recv() {
			match event {
				CoordinatorEvent::Started(operation) => {
					debug!("TUI: run started: {operation}");
				}
				CoordinatorEvent::Status(status) => {
					ui.status = status;
				}
				CoordinatorEvent::ResultsAdded(results) => {
					ui.results.extend(results);
				}
				CoordinatorEvent::Completed { operation, outcome } => {
					debug!("TUI: {operation} completed: {outcome:?}");
					// Resync with the sink; streamed events may have raced a reset
					ui.results = coordinator.results();
					ui.paused = false;
					ui.message = match outcome {
						RunOutcome::Completed {
							successful_files,
							total_matches,
							..
						} => format!(
							"{operation} complete: {total_matches} matches in {successful_files} files"
						),
						RunOutcome::Canceled {
							processed_files, ..
						} => format!("{operation} canceled after {processed_files} files"),
						RunOutcome::Failed { reason } => format!("{operation} failed: {reason}"),
					};
				}
				CoordinatorEvent::UndoCompleted { files } => {
					ui.message = format!("Reverted {files} files");
				}
				CoordinatorEvent::UndoFailed { reason } => {
					ui.message = format!("Undo failed (ledger kept): {reason}");
				}
			}
		}

		if ui.results.is_empty() {
			table_state.select(None);
			ui.selected_idx = 0;
		} else {
			ui.selected_idx = ui.selected_idx.min(ui.results.len() - 1);
			table_state.select(Some(ui.selected_idx));
		}
		if coordinator.can_cancel() {
			ui.spinner_idx = (ui.spinner_idx + 1) % SPINNER.len();
		}

		terminal.draw(|f| draw(f, &ui, &coordinator, &mut table_state))?;
	}
}

fn draw(frame: &mut Frame, ui: &UiState, coordinator: &Coordinator, table_state: &mut TableState) {
	let chunks = Layout::default()
		.direction(Direction::Vertical)
		.constraints([
			Constraint::Length(4), // header
			Constraint::Min(5),    // results table
			Constraint::Length(4), // status footer
			Constraint::Length(1), // keybinding hints
		])
		.split(frame.area());

	let kind = if ui.use_regex { "regex" } else { "text" };
	let header_lines = vec![
		Line::from(vec![
			Span::styled("sweep", Style::default().fg(Color::Cyan)),
			Span::raw("  |  Root: "),
			Span::raw(ui.path.display().to_string()),
			Span::raw("  |  State: "),
			Span::styled(
				coordinator.state().to_string(),
				Style::default().fg(Color::Yellow),
			),
		]),
		Line::from(vec![
			Span::raw(format!("Pattern ({kind}): ")),
			Span::styled(&ui.pattern, Style::default().fg(Color::Green)),
			Span::raw("  |  Replacement: "),
			Span::styled(&ui.replacement, Style::default().fg(Color::Green)),
		]),
	];
	let header = Paragraph::new(header_lines)
		.block(Block::default().borders(Borders::ALL).title("Run"));
	frame.render_widget(header, chunks[0]);

	let table_header = Row::new(vec![
		Cell::from("File"),
		Cell::from("Matches"),
		Cell::from("First match"),
	])
	.style(Style::default().add_modifier(Modifier::BOLD));

	let rows: Vec<Row> = ui
		.results
		.iter()
		.map(|result| {
			if let Some(error) = &result.error {
				return Row::new(vec![
					Cell::from(result.path.display().to_string()),
					Cell::from("-"),
					Cell::from(format!("error: {error}")),
				])
				.style(Style::default().fg(Color::Red));
			}
			let first = result
				.matches
				.first()
				.map(|m| m.text.clone())
				.unwrap_or_default();
			let mut row = Row::new(vec![
				Cell::from(result.path.display().to_string()),
				Cell::from(result.matches.len().to_string()),
				Cell::from(first),
			]);
			if result.read_only {
				row = row.style(Style::default().fg(Color::DarkGray));
			}
			row
		})
		.collect();

	let table = Table::new(
		rows,
		[
			Constraint::Percentage(55),
			Constraint::Percentage(10),
			Constraint::Percentage(35),
		],
	)
	.header(table_header)
	.row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
	.block(
		Block::default()
			.borders(Borders::ALL)
			.title(format!("Results ({})", ui.results.len())),
	);
	frame.render_stateful_widget(table, chunks[1], table_state);

	let mut status_lines = Vec::new();
	let status_text = if ui.status.status_text.is_empty() {
		"No run yet".to_string()
	} else if coordinator.can_cancel() {
		format!("{} {}", SPINNER[ui.spinner_idx], ui.status.status_text)
	} else {
		ui.status.status_text.clone()
	};
	status_lines.push(Line::from(Span::raw(status_text)));
	if let Some(current) = &ui.status.current_file {
		status_lines.push(Line::from(Span::raw(format!("Processing {current}"))));
	}
	status_lines.push(Line::from(Span::raw(ui.message.clone())));
	let footer = Paragraph::new(status_lines)
		.block(Block::default().borders(Borders::ALL).title("Status"));
	frame.render_widget(footer, chunks[2]);

	let hint_spans = vec![
		Span::styled("Keys: ", Style::default().fg(Color::Yellow)),
		Span::styled("q", Style::default().fg(Color::Green)),
		Span::raw(" quit  "),
		Span::styled("/", Style::default().fg(Color::Green)),
		Span::raw(" pattern  "),
		Span::styled("t", Style::default().fg(Color::Green)),
		Span::raw(" replacement  "),
		Span::styled("p", Style::default().fg(Color::Green)),
		Span::raw(" path  "),
		Span::styled("x", Style::default().fg(Color::Green)),
		Span::raw(" regex  "),
		Span::styled("s", Style::default().fg(Color::Green)),
		Span::raw(" search  "),
		Span::styled("n", Style::default().fg(Color::Green)),
		Span::raw(" narrow  "),
		Span::styled("r", Style::default().fg(Color::Green)),
		Span::raw(" replace  "),
		Span::styled("u", Style::default().fg(Color::Green)),
		Span::raw(" undo  "),
		Span::styled("z", Style::default().fg(Color::Green)),
		Span::raw(" pause  "),
		Span::styled("c", Style::default().fg(Color::Green)),
		Span::raw(" cancel"),
	];
	let hints = Paragraph::new(Line::from(hint_spans))
		.style(Style::default().bg(Color::Black).fg(Color::White));
	frame.render_widget(hints, chunks[3]);

	if ui.input_mode != InputMode::None {
		let title = match ui.input_mode {
			InputMode::Path => "Set Root Path",
			InputMode::Pattern => "Set Search Pattern",
			InputMode::Replacement => "Set Replacement Text",
			InputMode::None => "",
		};
		let popup = popup_area(frame.area(), 60, 20);
		frame.render_widget(Clear, popup);
		let input_widget = Paragraph::new(format!("{}_", ui.input_buffer)).block(
			Block::default()
				.borders(Borders::ALL)
				.title(title)
				.style(Style::default().fg(Color::Yellow)),
		);
		frame.render_widget(input_widget, popup);
	}
}

/// Helper function to create a centered popup area
fn popup_area(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
	let vertical = Layout::vertical([Constraint::Percentage(percent_y)]).flex(Flex::Center);
	let horizontal = Layout::horizontal([Constraint::Percentage(percent_x)]).flex(Flex::Center);
	let [area] = vertical.areas(area);
	let [area] = horizontal.areas(area);
	area
}

fn handle_events(
	input_mode: InputMode,
	input_buffer: &mut String,
) -> std::io::Result<Vec<Action>> {
	let mut actions = Vec::new();
	// Wait briefly for at least one event, then drain the rest without waiting
	if event::poll(Duration::from_millis(50))? {
		loop {
			if let Event::Key(key) = event::read()? {
				if input_mode != InputMode::None {
					match key.code {
						KeyCode::Esc => actions.push(Action::CancelInput),
						KeyCode::Enter => actions.push(Action::SubmitInput),
						KeyCode::Backspace => {
							input_buffer.pop();
						}
						KeyCode::Char(c) => input_buffer.push(c),
						_ => {}
					}
				} else {
					let action = match key.code {
						KeyCode::Char('q') => Some(Action::Quit),
						KeyCode::Char('s') => Some(Action::Search),
						KeyCode::Char('n') => Some(Action::SearchInResults),
						KeyCode::Char('r') => Some(Action::Replace),
						KeyCode::Char('u') => Some(Action::Undo),
						KeyCode::Char('c') => Some(Action::Cancel),
						KeyCode::Char('z') => Some(Action::TogglePause),
						KeyCode::Char('x') => Some(Action::ToggleRegex),
						KeyCode::Char('p') => Some(Action::EnterInput(InputMode::Path)),
						KeyCode::Char('/') => Some(Action::EnterInput(InputMode::Pattern)),
						KeyCode::Char('t') => Some(Action::EnterInput(InputMode::Replacement)),
						KeyCode::Up => Some(Action::Up),
						KeyCode::Down => Some(Action::Down),
						KeyCode::PageUp => Some(Action::PageUp),
						KeyCode::PageDown => Some(Action::PageDown),
						KeyCode::Home => Some(Action::Home),
						KeyCode::End => Some(Action::End),
						_ => None,
					};
					if let Some(a) = action {
						actions.push(a);
					}
				}
			}
			// drain without blocking
			if !event::poll(Duration::from_millis(0))? {
				break;
			}
		}
	}
	Ok(actions)
}
