//! PlotCam capture worker binary.
//!
//! Spawned by the console with the shared ring name, the stream parameters
//! and an inherited control socket. The exit code mirrors the final
//! [`WorkerStatus`]: 0 stopped, 3 no device, 4 device error, 5 channel error
//! (2 is reserved for argument errors reported by clap).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use plotcam_capture::capture::open_source;
use plotcam_capture::{run_worker, SaveOptions, WorkerConfig};
use plotcam_common::ring::FrameRing;
use plotcam_common::{ImageFormat, Rotation, SourceKind, StreamConfig, WorkerStatus};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "plotcam-capture")]
#[command(about = "PlotCam capture worker (spawned by the console)")]
struct Args {
    /// Name of the shared frame ring created by the console
    #[arg(long)]
    shm_name: String,

    /// File descriptor of the inherited control socket
    #[arg(long)]
    control_fd: i32,

    /// Camera stream width in pixels
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Camera stream height in pixels
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Camera frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Rotation applied for display and saving (none, ccw90)
    #[arg(long, default_value = "ccw90", value_parser = parse_rotation)]
    rotation: Rotation,

    /// Metres per depth unit
    #[arg(long, default_value_t = 0.001)]
    depth_scale: f32,

    /// Colour image format (bmp, png, jpeg)
    #[arg(long, default_value = "bmp", value_parser = parse_image_format)]
    image_format: ImageFormat,

    /// Frame source (synthetic, absent)
    #[arg(long, default_value = "synthetic", value_parser = parse_source)]
    source: SourceKind,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_rotation(s: &str) -> Result<Rotation, String> {
    Rotation::parse(s).ok_or_else(|| format!("unknown rotation '{}'", s))
}

fn parse_image_format(s: &str) -> Result<ImageFormat, String> {
    ImageFormat::parse(s).ok_or_else(|| format!("unknown image format '{}'", s))
}

fn parse_source(s: &str) -> Result<SourceKind, String> {
    SourceKind::parse(s).ok_or_else(|| format!("unknown source '{}'", s))
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr, which the console inherits.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("PlotCam capture worker starting (pid: {})", std::process::id());

    let status = run(args);
    info!("PlotCam capture worker exiting: {}", status);
    ExitCode::from(status.exit_code() as u8)
}

fn run(args: Args) -> WorkerStatus {
    let ring = match FrameRing::attach(&args.shm_name) {
        Ok(ring) => Arc::new(ring),
        Err(e) => {
            error!("Cannot attach frame ring {}: {}", args.shm_name, e);
            return WorkerStatus::ChannelError;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create Tokio runtime: {}", e);
            ring.set_worker_status(WorkerStatus::ChannelError);
            return WorkerStatus::ChannelError;
        }
    };

    let stream = StreamConfig {
        width: args.width,
        height: args.height,
        fps: args.fps,
    };
    let config = WorkerConfig {
        stream,
        save: SaveOptions {
            rotation: args.rotation,
            depth_scale: args.depth_scale,
            image_format: args.image_format,
        },
    };

    runtime.block_on(async {
        let control = match control_stream(args.control_fd) {
            Ok(control) => control,
            Err(e) => {
                error!("Cannot use control fd {}: {}", args.control_fd, e);
                ring.set_worker_status(WorkerStatus::ChannelError);
                return WorkerStatus::ChannelError;
            }
        };

        setup_signal_handlers(Arc::clone(&ring));

        let source = open_source(args.source, stream);
        run_worker(config, ring, control, source).await
    })
}

/// Adopt the control socket inherited from the console.
#[cfg(unix)]
fn control_stream(fd: i32) -> std::io::Result<tokio::net::UnixStream> {
    use std::os::unix::io::FromRawFd;

    if fd < 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "negative file descriptor",
        ));
    }
    // The console hands this descriptor to us exclusively.
    let stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
    stream.set_nonblocking(true)?;
    tokio::net::UnixStream::from_std(stream)
}

#[cfg(not(unix))]
fn control_stream(_fd: i32) -> std::io::Result<tokio::net::UnixStream> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "control channel requires a Unix platform",
    ))
}

/// SIGTERM and SIGINT request an orderly stop through the streaming flag.
fn setup_signal_handlers(ring: Arc<FrameRing>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (sigterm, sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::spawn(async move {
            let (mut sigterm, mut sigint) = (sigterm, sigint);
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                }
            }
            ring.set_streaming(false);
        });
    }

    #[cfg(not(unix))]
    {
        drop(ring);
    }
}
