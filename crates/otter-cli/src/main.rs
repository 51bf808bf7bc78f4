use otter::{Graph, LayoutSession, Preset, SimulationConfig, TickProgress};
use serde::Serialize;
use std::io::{Read, Write};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "OTTER_LOG";

#[derive(Debug)]
enum CliError {
    Usage(&'static str),
    Io(std::io::Error),
    Layout(otter::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Io(err) => write!(f, "I/O error: {err}"),
            CliError::Layout(err) => write!(f, "{err}"),
            CliError::Json(err) => write!(f, "JSON error: {err}"),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<otter::Error> for CliError {
    fn from(value: otter::Error) -> Self {
        Self::Layout(value)
    }
}

impl From<otter::ConfigError> for CliError {
    fn from(value: otter::ConfigError) -> Self {
        Self::Layout(value.into())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
enum Command {
    #[default]
    Layout,
    Stats,
    Presets,
}

#[derive(Debug, Default)]
struct Args {
    command: Command,
    input: Option<String>,
    pretty: bool,
    preset: Option<Preset>,
    auto: bool,
    config: Option<String>,
    strict: bool,
    timeout_ms: Option<u64>,
    progress: bool,
    verbose: bool,
}

fn usage() -> &'static str {
    "otter-cli\n\
\n\
USAGE:\n\
  otter-cli [layout] [--pretty] [--preset <name>|--auto] [--config <path>] [--strict] [--timeout-ms <n>] [--progress] [--verbose] [<path>|-]\n\
  otter-cli stats [--pretty] [<path>|-]\n\
  otter-cli presets [--pretty]\n\
\n\
NOTES:\n\
  - If <path> is omitted or '-', the graph JSON is read from stdin.\n\
  - Presets: small, medium, large, hierarchical, network, performance.\n\
  - --auto picks a preset from the graph statistics; --config fields override the preset.\n\
  - --progress writes one JSON line per tick to stderr.\n\
  - Log verbosity follows OTTER_LOG (default: warn, or debug with --verbose).\n\
"
}

fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut args = Args::default();

    let mut it = argv.iter().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--help" | "-h" => return Err(CliError::Usage(usage())),
            "layout" => args.command = Command::Layout,
            "stats" => args.command = Command::Stats,
            "presets" => args.command = Command::Presets,
            "--pretty" => args.pretty = true,
            "--auto" => args.auto = true,
            "--strict" => args.strict = true,
            "--progress" => args.progress = true,
            "--verbose" | "-v" => args.verbose = true,
            "--preset" => {
                let Some(name) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.preset = Some(name.parse::<Preset>()?);
            }
            "--config" => {
                let Some(path) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.config = Some(path.clone());
            }
            "--timeout-ms" => {
                let Some(ms) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.timeout_ms = Some(ms.parse::<u64>().map_err(|_| CliError::Usage(usage()))?);
            }
            "--" => {
                if let Some(rest) = it.next() {
                    if args.input.is_some() {
                        return Err(CliError::Usage(usage()));
                    }
                    args.input = Some(rest.clone());
                }
                if it.next().is_some() {
                    return Err(CliError::Usage(usage()));
                }
            }
            "-" => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some("-".to_string());
            }
            other if other.starts_with('-') => return Err(CliError::Usage(usage())),
            path => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some(path.to_string());
            }
        }
    }

    if args.auto && args.preset.is_some() {
        return Err(CliError::Usage(usage()));
    }
    Ok(args)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    // A second init (e.g. in tests) is harmless.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn read_input(input: Option<&str>) -> Result<String, CliError> {
    match input {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
    }
}

fn write_json(value: &impl Serialize, pretty: bool) -> Result<(), CliError> {
    let mut out = std::io::stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(&mut out, value)?;
    } else {
        serde_json::to_writer(&mut out, value)?;
    }
    writeln!(out)?;
    Ok(())
}

/// Preset (explicit, inferred, or defaults), then the config file, then command-line overrides.
fn build_config(args: &Args, graph: &Graph) -> Result<SimulationConfig, CliError> {
    let mut config = match args.preset {
        Some(preset) => preset.config(),
        None if args.auto => SimulationConfig::default().optimize_for_graph(&graph.stats()),
        None => SimulationConfig::default(),
    };
    if let Some(path) = args.config.as_deref() {
        let text = std::fs::read_to_string(path)?;
        let partial: otter::PartialSimulationConfig = serde_json::from_str(&text)?;
        config.update(&partial)?;
    }
    if args.strict {
        config.strict_convergence = true;
    }
    if let Some(ms) = args.timeout_ms {
        config.stabilization_timeout_ms = ms;
    }
    Ok(config)
}

fn progress_line(p: &TickProgress) {
    if let Ok(line) = serde_json::to_string(p) {
        eprintln!("{line}");
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresetOut {
    name: &'static str,
    config: SimulationConfig,
}

fn run(args: Args) -> Result<(), CliError> {
    match args.command {
        Command::Presets => {
            let presets: Vec<PresetOut> = Preset::ALL
                .into_iter()
                .map(|p| PresetOut {
                    name: p.name(),
                    config: p.config(),
                })
                .collect();
            write_json(&presets, args.pretty)
        }
        Command::Stats => {
            let text = read_input(args.input.as_deref())?;
            let graph: Graph = serde_json::from_str(&text)?;
            write_json(&graph.stats(), args.pretty)
        }
        Command::Layout => {
            let text = read_input(args.input.as_deref())?;
            let graph: Graph = serde_json::from_str(&text)?;
            let config = build_config(&args, &graph)?;

            let mut session = LayoutSession::new(config)?;
            if args.progress {
                session = session.with_progress(progress_line);
            }
            let result = session.run(&graph)?;
            write_json(&result, args.pretty)
        }
    }
}

fn main() {
    let args = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(v) => v,
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    init_tracing(args.verbose);

    match run(args) {
        Ok(()) => {}
        Err(err @ CliError::Layout(otter::Error::GraphValidation(_))) => {
            eprintln!("{err}");
            std::process::exit(3);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
