use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use log::info;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::{Frame, Terminal};

use ctl_station::config::StationConfig;
use ctl_station::label::{printer_from_config, LabelPrinter};
use ctl_station::laser::{Connector, LaserLinkDriver, LinkState, LinkTiming, SerialConnector};
use ctl_station::scheduler::PollScheduler;
use ctl_station::sim::{Rangefinder, SimConnector};
use ctl_station::station::{PrintOutcome, StationController, StationView};
use ctl_station::tolerance::Band;
use ctl_station::units::format_length;

// Redraw interval while polling is paused.
const IDLE_REDRAW: Duration = Duration::from_millis(250);
// Distance the simulated target moves per keypress: one inch.
const SIM_STEP_M: f64 = 0.0254;
const SIM_START_M: f64 = 3.264;

type StationTerminal = Terminal<CrosstermBackend<io::Stdout>>;

#[derive(Parser, Debug)]
#[command(name = "station_cli", version, about = "Cut-to-length verification station")]
struct Cli {
    /// Station configuration file.
    #[arg(long, default_value = "cut-station.toml")]
    config: PathBuf,
    /// Laser serial port, overriding the configuration.
    #[arg(long)]
    port: Option<String>,
    /// Directory for the session log file.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
    /// Measurement poll period in milliseconds.
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,
    /// Run against a simulated rangefinder instead of a serial device.
    #[arg(long)]
    simulate: bool,
}

enum Flow {
    Continue,
    Quit,
}

// The main entry point for the station terminal.
fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_path = init_logging(&cli.log_dir)?;

    println!("==============================");
    println!("  Cut-to-Length Station       ");
    println!("==============================");
    println!("Logging to {}", log_path.display());

    let mut config = StationConfig::load_or_default(&cli.config);
    if let Some(port) = cli.port {
        config.laser_port = port;
    }
    let mut printer = printer_from_config(&config.printer);
    let poll_period = Duration::from_millis(cli.poll_ms.max(50));

    println!("Connecting to laser on {}...", config.laser_port);
    if cli.simulate {
        let device = Rangefinder::new(SIM_START_M);
        let driver = LaserLinkDriver::new(SimConnector::new(device.clone()), config.laser_port.clone())
            .with_timing(LinkTiming::immediate());
        let station = StationController::new(config, driver);
        run_terminal(station, printer.as_mut(), poll_period, Some(&device))
    } else {
        let driver = LaserLinkDriver::new(SerialConnector::default(), config.laser_port.clone());
        let station = StationController::new(config, driver);
        run_terminal(station, printer.as_mut(), poll_period, None)
    }
}

/// Sends log records to a timestamped file; the terminal belongs to the UI.
fn init_logging(log_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("could not create log directory {}", log_dir.display()))?;
    // No colons in the file name.
    let file_name = format!("{} cut-station.log", Local::now().format("%Y-%m-%d %H%M%S"));
    let path = log_dir.join(file_name);
    let file = File::create(&path)
        .with_context(|| format!("could not create log file {}", path.display()))?;

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();

    Ok(path)
}

fn run_terminal<C: Connector>(
    mut station: StationController<C>,
    printer: &mut dyn LabelPrinter,
    poll_period: Duration,
    sim: Option<&Rangefinder>,
) -> Result<()> {
    station.start();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = event_loop(&mut terminal, &mut station, printer, poll_period, sim);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    station.shutdown();
    info!("Station closed.");
    result
}

fn event_loop<C: Connector>(
    terminal: &mut StationTerminal,
    station: &mut StationController<C>,
    printer: &mut dyn LabelPrinter,
    poll_period: Duration,
    sim: Option<&Rangefinder>,
) -> Result<()> {
    let mut scheduler = PollScheduler::new(poll_period, Instant::now());
    if !station.link_state().is_connected() {
        scheduler.pause();
    }

    loop {
        let view = station.view();
        terminal.draw(|frame| draw(frame, &view, scheduler.is_paused(), sim))?;

        let now = Instant::now();
        if scheduler.take_due(now) {
            // Blocks for at most the serial timeout; keys pressed meanwhile wait in the
            // terminal's input queue.
            let polled = station.on_tick();
            scheduler.complete(Instant::now());
            if polled.is_err() && !station.link_state().is_connected() {
                scheduler.pause();
            }
            continue;
        }

        let wait = scheduler.time_until_due(now).unwrap_or(IDLE_REDRAW);
        if !event::poll(wait)? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if let Flow::Quit = handle_key(key, station, printer, &mut scheduler, sim) {
                return Ok(());
            }
        }
    }
}

fn handle_key<C: Connector>(
    key: KeyEvent,
    station: &mut StationController<C>,
    printer: &mut dyn LabelPrinter,
    scheduler: &mut PollScheduler,
    sim: Option<&Rangefinder>,
) -> Flow {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => return Flow::Quit,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Flow::Quit,
        KeyCode::Enter => station.on_scan_commit(),
        KeyCode::Char('x') => station.on_clear(),
        KeyCode::Char('l') => {
            if station.on_reset().is_ok() && station.link_state().is_connected() {
                scheduler.resume(Instant::now());
            }
        }
        KeyCode::Char('g') => scheduler.resume(Instant::now()),
        KeyCode::Char(' ') => {
            if let PrintOutcome::Refused = station.on_print_request(printer) {
                info!("Print key pressed outside tolerance");
            }
        }
        KeyCode::Char(c) => {
            if !station.on_scan_char(c) {
                if let Some(device) = sim {
                    simulator_key(c, device);
                }
            }
        }
        _ => {}
    }
    Flow::Continue
}

// Keys that change the simulated device in --simulate mode.
fn simulator_key(c: char, device: &Rangefinder) {
    match c {
        '+' => device.set_distance(device.distance() + SIM_STEP_M),
        '-' => device.set_distance((device.distance() - SIM_STEP_M).max(0.0)),
        'e' => device.override_next_reading("E52"),
        's' => device.override_next_reading("E15"),
        'u' => {
            if device.is_plugged_in() {
                device.unplug();
            } else {
                device.plug_in();
            }
        }
        _ => {}
    }
}

fn band_color(band: Band) -> Color {
    match band {
        Band::Within => Color::Green,
        Band::Near => Color::Yellow,
        Band::Outside => Color::Red,
    }
}

fn value_box<'a>(title: &'a str, value: String) -> Paragraph<'a> {
    Paragraph::new(value)
        .alignment(Alignment::Center)
        .style(Style::default().add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL).title(title))
}

fn draw(frame: &mut Frame, view: &StationView, polling_paused: bool, sim: Option<&Rangefinder>) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.size());

    // Last scan.
    let scan_line = Line::from(vec![
        Span::raw("Work Order: "),
        Span::styled(
            view.order_display().to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("   Length: "),
        Span::styled(
            format_length(view.scan.target_length_inches),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("   Scanning: "),
        Span::raw(view.pending_scan.clone()),
    ]);
    frame.render_widget(
        Paragraph::new(scan_line).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Last Barcode Scanned"),
        ),
        rows[0],
    );

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(rows[1]);
    frame.render_widget(
        value_box("TABLE LENGTH", format_length(view.table_length_inches)),
        columns[0],
    );
    frame.render_widget(
        value_box("OFF BY", format_length(view.verdict.deviation_inches)),
        columns[1],
    );
    frame.render_widget(
        value_box("ORDER LENGTH", format_length(view.scan.target_length_inches)),
        columns[2],
    );

    frame.render_widget(
        Paragraph::new(view.verdict.to_string())
            .alignment(Alignment::Center)
            .style(
                Style::default()
                    .bg(band_color(view.verdict.band))
                    .fg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            )
            .block(Block::default().borders(Borders::ALL)),
        rows[2],
    );

    let print_style = if view.verdict.print_allowed {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default().add_modifier(Modifier::DIM)
    };
    let mut keys = vec![
        Span::raw(" CLEAR (X)   "),
        Span::styled("PRINT (space)", print_style),
        Span::raw("   RESET LASER (L)   POLL (G)   QUIT (Q)"),
    ];
    if sim.is_some() {
        keys.push(Span::raw("   SIM: +/- distance, E/S error, U plug"));
    }
    frame.render_widget(
        Paragraph::new(Line::from(keys)).block(Block::default().borders(Borders::ALL)),
        rows[3],
    );

    let link = match &view.link_state {
        LinkState::Disconnected => String::from("disconnected"),
        LinkState::Connecting => String::from("connecting"),
        LinkState::Connected => String::from("connected"),
        LinkState::Faulted(reason) => format!("faulted: {}", reason),
    };
    let mut status = format!("{}  [laser {}", view.laser_status, link);
    if polling_paused {
        status.push_str(", polling paused");
    }
    status.push(']');
    if let Some(print_status) = &view.print_status {
        status.push_str("  ");
        status.push_str(print_status);
    }
    frame.render_widget(
        Paragraph::new(status).block(Block::default().borders(Borders::ALL).title("Status")),
        rows[4],
    );
}
