//! hellocl - compute kernel driver
//!
//! Runs the sine, ROT13, modulo and Mandelbrot stages against the selected
//! compute devices and reports one additive status code.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hcl_compute::{Backend, ComputeRuntime, Precision, StatusCode};
use hcl_kernels::Config;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;

mod commands;

#[derive(Parser)]
#[command(name = "hellocl")]
#[command(author, version, about = "Compute kernel driver")]
#[command(long_about = "
Dispatches small compute kernels (sine, ROT13, modulo, Mandelbrot) onto a
compute device through one init / run / status protocol.

Examples:
  hellocl run                              # Reference sequence
  hellocl devices                          # List compute devices
  hellocl rot13 'Hello, World!'
  hellocl sine --count 1024
  hellocl modulo --amount 7,-7 --modulus 3,3
  hellocl mandelbrot -W 80 -H 40           # ASCII preview
  hellocl mandelbrot -o set.pgm --frames 4
  hellocl --software-devices 2 --gpu-count 2 run
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend: auto, software, wgpu
    #[arg(long, global = true)]
    backend: Option<Backend>,

    /// Number of software devices to expose
    #[arg(long, global = true)]
    software_devices: Option<usize>,

    /// Kernel precision: single, double
    #[arg(long, global = true)]
    precision: Option<Precision>,

    /// Queues the Mandelbrot renderer splits rows across
    #[arg(long, global = true)]
    gpu_count: Option<usize>,

    /// Only select devices with this capability
    #[arg(long = "require", global = true)]
    required_capability: Option<String>,

    /// Directory with <name>.wgsl kernel overrides
    #[arg(long, global = true)]
    kernel_dir: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reference sequence of every stage
    Run(RunArgs),

    /// List compute devices and backends
    #[command(visible_alias = "d")]
    Devices,

    /// ROT13-encode text
    Rot13(Rot13Args),

    /// Sine over 0..count
    Sine(SineArgs),

    /// Floored modulo of two lists
    Modulo(ModuloArgs),

    /// Render the Mandelbrot set
    #[command(visible_alias = "m")]
    Mandelbrot(MandelbrotArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Skip the sine stage
    #[arg(long)]
    no_sine: bool,

    /// Print every 101st sine result
    #[arg(long)]
    verbose_sine: bool,

    /// Render on the host instead of a device
    #[arg(long)]
    software_mandelbrot: bool,

    /// Visualizer frames to render
    #[arg(long, default_value = "3")]
    frames: u32,
}

#[derive(Args)]
struct Rot13Args {
    /// Text to encode
    text: String,
}

#[derive(Args)]
struct SineArgs {
    /// Number of elements
    #[arg(short = 'n', long, default_value = "10240")]
    count: usize,

    /// Print every Nth result (0 = none)
    #[arg(short, long, default_value = "0")]
    stride: usize,
}

#[derive(Args)]
struct ModuloArgs {
    /// Dividends (comma separated)
    #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    amount: Vec<f32>,

    /// Divisors (comma separated)
    #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    modulus: Vec<f32>,
}

#[derive(Args)]
struct MandelbrotArgs {
    /// Image width
    #[arg(short = 'W', long, default_value = "350")]
    width: u32,

    /// Image height
    #[arg(short = 'H', long, default_value = "200")]
    height: u32,

    /// Visualizer frames (0 = one-shot render)
    #[arg(short, long, default_value = "0")]
    frames: u32,

    /// Center on the real axis
    #[arg(long, allow_hyphen_values = true)]
    center_x: Option<f64>,

    /// Center on the imaginary axis
    #[arg(long, allow_hyphen_values = true)]
    center_y: Option<f64>,

    /// Complex-plane distance between pixels
    #[arg(long)]
    step: Option<f64>,

    /// Render on the host instead of a device
    #[arg(long)]
    software: bool,

    /// Write a PGM image instead of printing a preview
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path).with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(n) = self.software_devices {
            config.software_devices = n;
        }
        if let Some(precision) = self.precision {
            config.precision = precision;
        }
        if let Some(n) = self.gpu_count {
            config.gpu_count = n;
        }
        if let Some(cap) = &self.required_capability {
            config.required_capability = Some(cap.clone());
        }
        if let Some(dir) = &self.kernel_dir {
            config.kernel_dir = Some(dir.clone());
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Install the tracing subscriber; the guard flushes the log file on drop.
fn init_logging(verbose: u8, log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(filter).with(console).init();
        return Ok(None);
    };

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(std::path::Path::new("."));
    let name = path.file_name().with_context(|| format!("Invalid log file path: {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    let file = fmt::layer().with_ansi(false).with_writer(writer);

    tracing_subscriber::registry().with(filter).with(console).with(file).init();
    Ok(Some(guard))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = init_logging(cli.verbose, cli.log_file.as_ref())?;
    let config = cli.load_config()?;

    let mut runtime = ComputeRuntime::new();
    let result: Result<StatusCode> = match cli.command {
        Commands::Run(args) => commands::run::run(&mut runtime, args, config),
        Commands::Devices => Ok(commands::devices::run(&config)),
        Commands::Rot13(args) => commands::rot13::run(&mut runtime, args, &config),
        Commands::Sine(args) => commands::sine::run(&mut runtime, args, &config),
        Commands::Modulo(args) => commands::modulo::run(&mut runtime, args, &config),
        Commands::Mandelbrot(args) => commands::mandelbrot::run(&mut runtime, args, config),
    };
    let status = result.unwrap_or_else(|e| {
        eprintln!("Error: {e:#}");
        commands::status_of(&e)
    });

    // commands that failed midway leave their context live
    if let Err(e) = runtime.teardown() {
        tracing::warn!(error = %e, "Teardown after failed command");
    }

    // flush the log file before exiting
    drop(guard);
    std::process::exit(status.code());
}
