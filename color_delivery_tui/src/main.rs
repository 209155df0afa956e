use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use color_delivery_core::{
    Action, EnvConfig, Environment, Object,
    episode::Episode,
    layout::Layout as MapLayout,
    policy::{GreedyPolicy, Policy, RandomPolicy},
    render::{Renderer, save_png},
};
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use std::{
    fs::File,
    io::{self, Stdout},
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyKind {
    /// Drive the agent from the keyboard
    Human,
    /// Uniformly random actions
    Random,
    /// Carry each object straight to its bin
    Greedy,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Layout file to start the first episode from; overrides --size
    #[arg(short, long, value_name = "MAP_FILE")]
    map: Option<PathBuf>,

    /// Grid width and height
    #[arg(long, default_value_t = 2)]
    size: usize,

    /// Colors in play, comma-separated
    #[arg(long, value_delimiter = ',', default_value = "red")]
    colors: Vec<String>,

    /// Steps before an episode is truncated
    #[arg(long, default_value_t = 6)]
    max_steps: usize,

    /// One of correct, pickup, any_delivery, move_object, step_alive
    #[arg(long, default_value = "correct")]
    reward_mode: String,

    /// Seed for placements and the random policy
    #[arg(long)]
    seed: Option<u64>,

    /// Who chooses the actions
    #[arg(long, value_enum, default_value_t = PolicyKind::Human)]
    policy: PolicyKind,

    /// Delay between automatic steps, in milliseconds
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,

    /// Directory to write a PNG frame per step into
    #[arg(long, value_name = "DIR")]
    frames: Option<PathBuf>,

    /// Pixel size of a cell in written frames, 4 to 128
    #[arg(long, default_value_t = 64)]
    cell: u32,

    /// Run episodes without the UI and print one report line per episode
    #[arg(long)]
    headless: bool,

    /// Number of episodes to play in headless mode
    #[arg(long, default_value_t = 1)]
    episodes: usize,

    /// Print headless reports as JSON lines, history included
    #[arg(long)]
    json: bool,

    /// Write logs to this file
    #[arg(long, value_name = "LOG_FILE")]
    log_file: Option<PathBuf>,
}

struct App {
    /// The core simulation environment.
    environment: Environment,
    /// History and running reward of the current episode.
    episode: Episode,
    /// Automatic decision maker; `None` when a human is driving.
    policy: Option<Box<dyn Policy>>,
    renderer: Renderer,
    frames: Option<FrameWriter>,
    /// Number of episodes started so far.
    episode_index: usize,
    /// Flag to control the main loop.
    should_quit: bool,
}

/// Writes rendered frames as `episode_NNN_step_NNN.png`.
struct FrameWriter {
    dir: PathBuf,
}

impl FrameWriter {
    fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create frame directory {}", dir.display()))?;
        Ok(FrameWriter { dir })
    }

    fn write(&self, renderer: &Renderer, environment: &Environment, episode: usize) -> Result<()> {
        let path = self.dir.join(format!(
            "episode_{:03}_step_{:03}.png",
            episode,
            environment.steps()
        ));
        save_png(&renderer.render(environment), &path)
            .with_context(|| format!("Failed to write frame {}", path.display()))
    }
}

impl App {
    fn new(args: &Args) -> Result<Self> {
        let layout = args.map.as_deref().map(load_layout).transpose()?;
        let size = layout.as_ref().map_or(args.size, |layout| layout.size);
        let config = EnvConfig::from_names(size, &args.colors, args.max_steps, &args.reward_mode)?;

        let environment = match (&layout, args.seed) {
            (Some(layout), seed) => {
                let mut environment = Environment::with_layout(config, layout)?;
                if let Some(seed) = seed {
                    environment.reseed(seed);
                }
                environment
            }
            (None, Some(seed)) => Environment::with_seed(config, seed)?,
            (None, None) => Environment::new(config)?,
        };

        let policy: Option<Box<dyn Policy>> = match args.policy {
            PolicyKind::Human => None,
            PolicyKind::Random => Some(Box::new(RandomPolicy::new(args.seed.unwrap_or(0)))),
            PolicyKind::Greedy => Some(Box::new(GreedyPolicy::new())),
        };

        let renderer = Renderer::new(args.cell, 2)?;
        let frames = args.frames.clone().map(FrameWriter::new).transpose()?;

        let app = App {
            environment,
            episode: Episode::new(),
            policy,
            renderer,
            frames,
            episode_index: 0,
            should_quit: false,
        };
        app.write_frame()?;
        Ok(app)
    }

    fn write_frame(&self) -> Result<()> {
        match &self.frames {
            Some(frames) => frames.write(&self.renderer, &self.environment, self.episode_index),
            None => Ok(()),
        }
    }

    /// Applies a keyboard-chosen action.
    fn act(&mut self, action: Action) -> Result<()> {
        if self.episode.apply(&mut self.environment, action).is_some() {
            self.write_frame()?;
        }
        Ok(())
    }

    /// Handles one step of the simulation when a policy is driving.
    fn tick(&mut self) -> Result<()> {
        let Some(policy) = self.policy.as_deref_mut() else {
            return Ok(());
        };
        if self
            .episode
            .advance(&mut self.environment, policy, &self.renderer)
            .is_some()
        {
            self.write_frame()?;
        }
        Ok(())
    }

    /// Starts a fresh episode with new random placements.
    fn reset(&mut self) -> Result<()> {
        self.environment.reset();
        self.episode = Episode::new();
        self.episode_index += 1;
        self.write_frame()
    }

    /// Sets the quit flag.
    fn quit(&mut self) {
        self.should_quit = true;
    }
}

fn load_layout(path: &Path) -> Result<MapLayout> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read map file {}", path.display()))?;
    text.parse()
        .with_context(|| format!("Failed to load layout from {}", path.display()))
}

fn init_logging(log_file: Option<&Path>, headless: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("color_delivery_core=info,color_delivery_tui=info"));

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        // The terminal UI owns stdout and stderr, so without a file nothing is logged.
        None if headless => fmt().with_env_filter(filter).with_writer(io::stderr).init(),
        None => {}
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    init_logging(args.log_file.as_deref(), args.headless)?;

    if args.headless {
        return run_headless(&args);
    }

    // Create the application state before touching the terminal so errors print normally
    let mut app = App::new(&args)?;

    // Set up the terminal
    let mut terminal = setup_terminal()?;

    // Run the main application loop, restoring the terminal even if it fails
    let result = run_app(&mut terminal, &mut app, Duration::from_millis(args.tick_ms));
    restore_terminal(&mut terminal)?;
    result
}

/// Plays episodes without a UI, printing one report per line.
fn run_headless(args: &Args) -> Result<()> {
    if args.policy == PolicyKind::Human {
        bail!("Headless mode needs an automatic policy (--policy random or --policy greedy)");
    }
    let mut app = App::new(args)?;

    for index in 0..args.episodes {
        if index > 0 {
            app.reset()?;
        }
        while !app.episode.is_done() {
            app.tick()?;
        }
        let report = app.episode.report(&app.environment);
        info!(episode = index, %report, "headless episode finished");
        if args.json {
            let line = serde_json::json!({
                "episode": index,
                "report": report,
                "history": app.episode.history(),
            });
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!("{report}");
            println!(
                "history: {}",
                app.episode
                    .history()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
    Ok(())
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?; // Put terminal in raw mode
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?; // Use alternate screen and enable mouse capture
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into) // Map io::Error to anyhow::Error
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn key_action(code: KeyCode) -> Option<Action> {
    match code {
        KeyCode::Up | KeyCode::Char('w') => Some(Action::Up),
        KeyCode::Down | KeyCode::Char('s') => Some(Action::Down),
        KeyCode::Left | KeyCode::Char('a') => Some(Action::Left),
        KeyCode::Right | KeyCode::Char('d') => Some(Action::Right),
        KeyCode::Char('p') => Some(Action::Pick),
        KeyCode::Char('o') => Some(Action::Drop),
        _ => None,
    }
}

/// Runs the main loop of the TUI application.
fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    tick_rate: Duration,
) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        // Draw the UI
        terminal.draw(|f| ui(f, app))?;

        // Calculate timeout for event polling
        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        // Poll for events (keyboard, mouse, etc.)
        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => app.quit(),
                        KeyCode::Char('r') => app.reset()?,
                        code if app.policy.is_none() => {
                            if let Some(action) = key_action(code) {
                                app.act(action)?;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        // Update application state if enough time has passed
        if last_tick.elapsed() >= tick_rate {
            app.tick()?; // Perform simulation step
            last_tick = Instant::now();
        }

        // Exit loop if requested
        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(6),    // Area for the map and history
            Constraint::Length(4), // Area for status
            Constraint::Length(2), // Area for help
        ])
        .split(frame.area());

    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(main_layout[0]);

    // Render the map
    render_map(frame, top[0], &app.environment);

    // Render the action/reward history
    render_history(frame, top[1], &app.episode);

    // Render the episode status
    render_status(frame, main_layout[1], app);

    // Render help text
    let help = if app.policy.is_some() {
        "Press 'r' to reset, 'q' or 'Esc' to quit."
    } else {
        "Arrows/WASD move, 'p' pick, 'o' drop, 'r' reset, 'q' or 'Esc' quit."
    };
    let help_text = Paragraph::new(help)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

fn tui_color(rgb: [u8; 3]) -> Color {
    Color::Rgb(rgb[0], rgb[1], rgb[2])
}

/// Styled label for an object, e.g. a red "red".
fn object_span(object: &Object) -> Span<'static> {
    Span::styled(
        object.color.to_string(),
        Style::default().fg(tui_color(object.color.rgb())).bold(),
    )
}

/// Renders the environment grid onto the frame.
fn render_map(frame: &mut Frame, area: Rect, environment: &Environment) {
    let size = environment.size();
    let agent = environment.agent();

    // Create a representation of the grid, three columns per cell
    let mut lines: Vec<Line> = Vec::with_capacity(size);

    for row in 0..size {
        let mut spans: Vec<Span> = Vec::with_capacity(size);
        for col in 0..size {
            let position = color_delivery_core::Position::new(row, col);

            // Bins tint the cell background
            let mut style = match environment.bin_at(position) {
                Some(bin) => Style::default().bg(tui_color(bin.color.bin_rgb())),
                None => Style::default(),
            };

            let glyph = if position == agent {
                // Agent glyph takes the held object's color
                style = match environment.holding() {
                    Some(held) => style.fg(tui_color(held.color.rgb())).bold(),
                    None => style.fg(Color::White).bold(),
                };
                " @ "
            } else if let Some(object) = environment.object_at(position) {
                style = style.fg(tui_color(object.color.rgb()));
                " ▲ "
            } else {
                " · "
            };
            spans.push(Span::styled(glyph, style));
        }
        lines.push(Line::from(spans));
    }

    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Color Delivery").borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(map_paragraph, area);
}

/// Renders the most recent history entries, newest last.
fn render_history(frame: &mut Frame, area: Rect, episode: &Episode) {
    let visible = area.height.saturating_sub(2) as usize;
    let history = episode.history();
    let items: Vec<ListItem> = history
        .iter()
        .enumerate()
        .skip(history.len().saturating_sub(visible))
        .map(|(i, entry)| {
            let style = if entry.reward > 0.0 {
                Style::default().fg(Color::Green)
            } else if entry.reward < -1.0 {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(Span::styled(
                format!("{:>3}. {}", i + 1, entry),
                style,
            )))
        })
        .collect();

    let history_widget =
        List::new(items).block(Block::default().borders(Borders::ALL).title("History"));
    frame.render_widget(history_widget, area);
}

/// Renders step count, rewards and what the agent is carrying.
fn render_status(frame: &mut Frame, area: Rect, app: &App) {
    let environment = &app.environment;
    let config = environment.config();

    let mut carrying = vec![Span::raw("Holding: ")];
    match environment.holding() {
        Some(object) => carrying.push(object_span(object)),
        None => carrying.push(Span::raw("nothing")),
    }
    carrying.push(Span::raw("  Delivered: "));
    for object in environment.objects().iter().filter(|o| o.is_delivered()) {
        carrying.push(object_span(object));
        carrying.push(Span::raw(" "));
    }

    let outcome = if !app.episode.is_done() {
        Span::raw("running")
    } else if environment.all_delivered() {
        Span::styled("done: all delivered", Style::default().fg(Color::Green).bold())
    } else {
        Span::styled("done: out of steps", Style::default().fg(Color::Red).bold())
    };

    let lines = vec![
        Line::from(vec![
            Span::raw(format!(
                "Episode {}  Step {}/{}  Mode {}  Last {:+.1}  Total {:+.1}  ",
                app.episode_index + 1,
                environment.steps(),
                config.max_steps,
                config.reward_mode,
                app.episode.last_reward(),
                app.episode.total_reward(),
            )),
            outcome,
        ]),
        Line::from(carrying),
    ];

    let status = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"));
    frame.render_widget(status, area);
}
