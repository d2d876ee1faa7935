//! CLI command implementations.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::accelerometer;
use crate::colors;
use crate::config::AppConfig;
use crate::controller::{Controller, Refusal, SaveJob, Trigger};
use crate::display::{DisplayLoop, PreviewSink};
use crate::exit_codes::ExitCode;
use crate::experiment::{next_plot_number, ExperimentError, ExperimentStore};
use crate::level::LevelGate;
use crate::session::{CaptureSession, SaveError, SaveRequestChannel, SavedFrame};
use plotcam_common::WorkerStatus;

/// How often the run loop checks on the worker.
const WORKER_POLL: Duration = Duration::from_millis(500);

/// Options of the `run` command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub experiment: Option<String>,
    pub plot_number: Option<u32>,
}

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    fn error(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", colors::error(msg));
        }
    }

    fn warning(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", colors::warning(msg));
        }
    }

    /// Human-readable line, suppressed in JSON and quiet modes.
    fn line(&self, msg: &str) {
        if !self.json && !self.quiet {
            println!("{}", msg);
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("{}", colors::error(&format!("Cannot encode output: {}", e))),
    }
}

fn open_store(config: &AppConfig, out: Output) -> Result<ExperimentStore, ExitCode> {
    ExperimentStore::new(&config.experiments_dir).map_err(|e| {
        out.error(&e.to_string());
        ExitCode::from(&e)
    })
}

/// Create a new experiment.
pub fn new_experiment(config: &AppConfig, name: &str, out: Output) -> ExitCode {
    let store = match open_store(config, out) {
        Ok(store) => store,
        Err(code) => return code,
    };

    match store.create(name) {
        Ok(experiment) => {
            if out.json {
                print_json(&serde_json::json!({
                    "status": "created",
                    "name": experiment.name(),
                    "path": experiment.path(),
                }));
            } else if !out.quiet {
                println!(
                    "{} {}",
                    colors::success("Created experiment:"),
                    colors::path(&experiment.path().display().to_string())
                );
            }
            ExitCode::Success
        }
        Err(e) => {
            out.error(&e.to_string());
            ExitCode::from(&e)
        }
    }
}

/// List experiments under the experiments root.
pub fn list(config: &AppConfig, out: Output) -> ExitCode {
    let store = match open_store(config, out) {
        Ok(store) => store,
        Err(code) => return code,
    };

    let experiments = match store.list() {
        Ok(experiments) => experiments,
        Err(e) => {
            out.error(&e.to_string());
            return ExitCode::from(&e);
        }
    };

    if out.json {
        print_json(&experiments);
    } else if experiments.is_empty() {
        if !out.quiet {
            println!(
                "{}",
                colors::dim(&format!(
                    "No experiments in {}.",
                    store.root().display()
                ))
            );
        }
    } else {
        let name_width = experiments
            .iter()
            .map(|e| e.name.len())
            .max()
            .unwrap_or(4)
            .max(4);

        println!(
            "{}  {}  {}",
            colors::pad_left("NAME", name_width, colors::header),
            colors::pad_left("VALID", 5, colors::header),
            colors::header("CAPTURES")
        );
        println!(
            "{}  {}  {}",
            "-".repeat(name_width),
            "-".repeat(5),
            "-".repeat(8)
        );

        for experiment in experiments {
            let valid = if experiment.valid {
                colors::yes()
            } else {
                colors::no()
            };
            // pad before colouring; yes/no are at most 3 chars
            let padding = " ".repeat(5 - if experiment.valid { 3 } else { 2 });
            println!(
                "{:<name_width$}  {}{}  {}",
                experiment.name,
                valid,
                padding,
                colors::number(&experiment.captures.to_string())
            );
        }
    }
    ExitCode::Success
}

#[derive(Debug, Serialize)]
struct ExperimentInfo {
    name: String,
    path: std::path::PathBuf,
    records: usize,
    captures: usize,
    last_plot: Option<u32>,
    next_plot: u32,
}

/// Validate an experiment and show where a resumed session would continue.
pub fn info(config: &AppConfig, name: &str, out: Output) -> ExitCode {
    let store = match open_store(config, out) {
        Ok(store) => store,
        Err(code) => return code,
    };

    let result = store.open(name).and_then(|experiment| {
        let metadata = experiment.open_metadata()?;
        Ok(ExperimentInfo {
            name: experiment.name().to_string(),
            path: experiment.path().to_path_buf(),
            records: metadata.len(),
            captures: experiment.capture_count(),
            last_plot: metadata.last_index(),
            next_plot: next_plot_number(&metadata),
        })
    });

    let info = match result {
        Ok(info) => info,
        Err(e) => {
            out.error(&e.to_string());
            return ExitCode::from(&e);
        }
    };

    if out.json {
        print_json(&info);
    } else if !out.quiet {
        let pad = config.plot_number_padding;
        println!("{}  {}", colors::bold("Experiment:"), info.name);
        println!(
            "{}        {}",
            colors::bold("Path:"),
            colors::path(&info.path.display().to_string())
        );
        println!(
            "{}     {}",
            colors::bold("Records:"),
            colors::number(&info.records.to_string())
        );
        println!(
            "{}    {}",
            colors::bold("Captures:"),
            colors::number(&info.captures.to_string())
        );
        let last = info
            .last_plot
            .map(|n| crate::metadata::pad_plot_number(n, pad))
            .unwrap_or_else(|| "-".to_string());
        println!("{}   {}", colors::bold("Last plot:"), last);
        println!(
            "{}   {}",
            colors::bold("Next plot:"),
            colors::number(&crate::metadata::pad_plot_number(info.next_plot, pad))
        );
    }
    ExitCode::Success
}

/// Result of a save task, delivered back to the run loop.
type SaveOutcome = (SaveJob, Result<SavedFrame, SaveError>);

fn spawn_save(
    channel: Arc<SaveRequestChannel>,
    job: SaveJob,
    done: mpsc::UnboundedSender<SaveOutcome>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = channel
            .request_save(&job.experiment_path, &job.base_name)
            .await;
        let _ = done.send((job, result));
    })
}

/// Wait for SIGINT (and SIGTERM on Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Cannot install signal handlers: {}", e);
                return std::future::pending().await;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

const PROMPT_HELP: &str = "Enter: take picture   o NAME: open   n NAME: new   g N: go to plot   s: status   q: quit";

/// Operator session state for the `run` loop.
struct RunState {
    store: ExperimentStore,
    controller: Controller,
    channel: Arc<SaveRequestChannel>,
    done_tx: mpsc::UnboundedSender<SaveOutcome>,
    in_flight: Option<JoinHandle<()>>,
    out: Output,
}

impl RunState {
    fn issue(&mut self, job: SaveJob) {
        debug!("Queueing image <{}> to be saved", job.base_name);
        self.in_flight = Some(spawn_save(
            Arc::clone(&self.channel),
            job,
            self.done_tx.clone(),
        ));
    }

    fn take_picture(&mut self) {
        match self.controller.take_picture() {
            Ok(Trigger::Fire(job)) => self.issue(job),
            Ok(Trigger::Deferred) => self
                .out
                .line(&colors::info("Waiting until the camera is level...")),
            Err(Refusal::NoExperiment) => self
                .out
                .warning("No experiment open. Use 'o NAME' or 'n NAME' first."),
            Err(refusal) => self.out.warning(&format!("Cannot take picture: {}", refusal)),
        }
    }

    fn finish_save(&mut self, job: SaveJob, result: Result<SavedFrame, SaveError>) {
        self.in_flight = None;
        match result {
            Ok(saved) => match self.controller.complete_save(&job, chrono::Local::now()) {
                Ok(record) => {
                    if self.out.json {
                        println!(
                            "{}",
                            serde_json::json!({
                                "event": "saved",
                                "plot": record.number,
                                "color_path": saved.color_path,
                                "depth_path": saved.depth_path,
                                "xpos": record.xpos,
                                "ypos": record.ypos,
                            })
                        );
                    } else if !self.out.quiet {
                        // Terminal bell doubles as the capture alert.
                        print!("\x07");
                        println!(
                            "{} {}  {} {}",
                            colors::success("Saved"),
                            colors::path(&saved.color_path.display().to_string()),
                            colors::dim("next plot"),
                            colors::number(&self.controller.plot_label())
                        );
                    }
                }
                Err(e) => {
                    error!("Saved {} but metadata failed: {}", job.base_name, e);
                    self.out
                        .error(&format!("Image saved but metadata was not written: {}", e));
                }
            },
            Err(e) => {
                self.controller.fail_save();
                self.out.error(&format!("Picture {} not saved: {}", job.base_name, e));
            }
        }
    }

    fn open(&mut self, name: &str, create: bool, plot_number: Option<u32>) -> Result<(), ExperimentError> {
        let experiment = if create {
            self.store.create(name)?
        } else {
            self.store.open(name)?
        };
        self.controller.open_experiment(experiment, plot_number)?;
        self.out.line(&format!(
            "{} {}  {} {}",
            colors::success("Experiment"),
            colors::bold(name),
            colors::dim("plot"),
            colors::number(&self.controller.plot_label())
        ));
        Ok(())
    }

    fn status(&self, session: &CaptureSession) {
        let ring = session.ring();
        let frames = ring.latest().map_or(0, |(seq, _)| seq);
        let experiment = self
            .controller
            .experiment()
            .map(|e| e.name().to_string())
            .unwrap_or_else(|| "-".to_string());
        let gate = self.controller.gate();
        let tilt = gate.latest();

        if self.out.json {
            println!(
                "{}",
                serde_json::json!({
                    "event": "status",
                    "experiment": experiment,
                    "plot": self.controller.plot_label(),
                    "worker": session.worker_status().to_string(),
                    "frames": frames,
                    "saving": self.controller.is_in_flight(),
                    "waiting_for_level": gate.is_waiting(),
                    "xpos": tilt.x,
                    "ypos": tilt.y,
                })
            );
            return;
        }
        println!(
            "{} {}  {} {}  {} {}",
            colors::bold("experiment:"),
            experiment,
            colors::bold("plot:"),
            colors::number(&self.controller.plot_label()),
            colors::bold("worker:"),
            colors::worker_status(session.worker_status())
        );
        println!(
            "{} {}  {} {}  {} ({:.3}, {:.3})",
            colors::bold("frames:"),
            colors::number(&frames.to_string()),
            colors::bold("saving:"),
            if self.controller.is_in_flight() {
                colors::yes()
            } else {
                colors::no()
            },
            colors::level(gate.is_level()),
            tilt.x,
            tilt.y
        );
    }
}

/// Run an interactive capture session.
pub async fn run(config: Arc<AppConfig>, options: RunOptions, log_level: &str, out: Output) -> ExitCode {
    let store = match open_store(&config, out) {
        Ok(store) => store,
        Err(code) => return code,
    };

    let session = match CaptureSession::start(&config, log_level) {
        Ok(session) => session,
        Err(e) => {
            out.error(&e.to_string());
            return ExitCode::from(&e);
        }
    };

    let mut sensor = accelerometer::attach(&config.accelerometer);
    let gate = if sensor.is_some() {
        LevelGate::new(config.level_tolerance)
    } else {
        LevelGate::disabled()
    };

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut state = RunState {
        store,
        controller: Controller::new(gate, config.plot_number_padding),
        channel: session.channel(),
        done_tx,
        in_flight: None,
        out,
    };

    if let Some(name) = options.experiment.as_deref() {
        if let Err(e) = state.open(name, false, options.plot_number) {
            out.error(&e.to_string());
            let code = ExitCode::from(&e);
            session.shutdown().await;
            return code;
        }
    } else if let Some(plot_number) = options.plot_number {
        // Nothing is in flight before the loop starts.
        let _ = state.controller.set_plot_number(plot_number);
    }

    match state.channel.ping().await {
        Ok(rtt) => debug!("Capture worker answered in {:?}", rtt),
        Err(e) => out.warning(&format!("Camera unavailable: {}", e)),
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let display_loop = DisplayLoop::new(Arc::clone(session.ring()), config.display_fps);
    debug!("Refreshing the preview every {:?}", display_loop.interval());
    let display_task = tokio::spawn(display_loop.run(PreviewSink::new(config.vr_layout), stop_rx));

    let mut sample_timer =
        tokio::time::interval(Duration::from_millis(config.accelerometer.period_ms));
    sample_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut worker_timer = tokio::time::interval(WORKER_POLL);
    worker_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    out.line(&colors::dim(PROMPT_HELP));
    let mut last_level: Option<bool> = None;
    let mut reported_status = WorkerStatus::Starting;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                out.line("");
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Cannot read operator input: {}", e);
                        break;
                    }
                };
                let line = line.trim();
                let (command, arg) = match line.split_once(char::is_whitespace) {
                    Some((command, arg)) => (command, Some(arg.trim())),
                    None => (line, None),
                };
                match (command, arg) {
                    ("" | "p", None) => state.take_picture(),
                    ("s", None) => state.status(&session),
                    ("q", None) => break,
                    ("o", Some(name)) | ("n", Some(name)) => {
                        if state.controller.is_in_flight() {
                            out.warning("Wait for the current picture to finish saving.");
                        } else if let Err(e) = state.open(name, command == "n", None) {
                            out.error(&e.to_string());
                        }
                    }
                    ("g", Some(number)) => match number.parse::<u32>() {
                        Ok(number) => match state.controller.set_plot_number(number) {
                            Ok(()) => out.line(&format!("Plot # {}", colors::number(&state.controller.plot_label()))),
                            Err(_) => out.warning("Wait for the current picture to finish saving."),
                        },
                        Err(_) => out.warning(&format!("Not a plot number: {}", number)),
                    },
                    _ => out.line(&colors::dim(PROMPT_HELP)),
                }
            }
            _ = sample_timer.tick(), if sensor.is_some() => {
                let Some(device) = sensor.as_mut() else { continue };
                if let Some(job) = state.controller.on_sample(device.sample()) {
                    state.issue(job);
                }
                let level = state.controller.gate().is_level();
                if last_level != Some(level) {
                    last_level = Some(level);
                    out.line(&colors::level(level));
                }
            }
            Some((job, result)) = done_rx.recv() => {
                state.finish_save(job, result);
            }
            _ = worker_timer.tick() => {
                let status = session.worker_status();
                if status != reported_status {
                    reported_status = status;
                    if status.is_terminal() {
                        out.warning(&format!("Capture worker {}", status));
                    }
                }
            }
        }
    }

    // Let an in-flight save finish so its metadata is recorded.
    if let Some(task) = state.in_flight.take() {
        out.line(&colors::dim("Waiting for the last picture to be saved..."));
        let _ = task.await;
        if let Ok((job, result)) = done_rx.try_recv() {
            state.finish_save(job, result);
        }
    }
    if let Err(e) = state.controller.flush() {
        out.error(&format!("Failed to save metadata: {}", e));
    }

    let _ = stop_tx.send(true);
    let stats = match display_task.await {
        Ok(stats) => Some(stats),
        Err(e) => {
            error!("Display loop failed: {}", e);
            None
        }
    };

    drop(state);
    let exit = session.shutdown().await;

    if out.json {
        println!(
            "{}",
            serde_json::json!({
                "event": "stopped",
                "worker": exit.status.to_string(),
                "exit_code": exit.exit_code,
                "killed": exit.killed,
                "display": stats,
            })
        );
    } else if !out.quiet {
        if let Some(stats) = stats {
            println!(
                "{}",
                colors::dim(&format!(
                    "Display: {} frames, {:.2} fps average",
                    stats.rendered,
                    stats.average_fps()
                ))
            );
        }
        println!("{} {}", colors::info("Capture worker:"), exit);
    }
    if !exit.is_clean() {
        warn!("Capture worker did not stop cleanly: {}", exit);
    }
    let _ = std::io::stdout().flush();

    info!("PlotCam says goodbye");
    ExitCode::Success
}

/// Show version information.
pub fn version(json: bool) {
    let version = env!("CARGO_PKG_VERSION");
    if json {
        println!(r#"{{"version": "{}"}}"#, version);
    } else {
        println!("{} {}", colors::bold("plotcam"), version);
    }
}
