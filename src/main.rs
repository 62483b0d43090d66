//! prompty CLI
//!
//! Usage:
//!   prompty [OPTIONS] [FILE]
//!
//! Options:
//!   -d, --data <FILE>         JSON data file
//!   -c, --config <FILE>       Engine configuration (TOML format)
//!   -p, --partial <NAME=PATH> Register a template for include/ref/extends
//!   -s, --strategy <NAME>     Default error strategy
//!   --validate                Check the template instead of rendering it
//!   --messages                Print collected chat messages as JSON
//!   -h, --help                Print help

use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use prompty::validate::has_errors;
use prompty::{Engine, EngineConfig, ErrorStrategy, RenderOptions, Value};

#[derive(Parser)]
#[command(name = "prompty")]
#[command(about = "Render prompty templates against JSON data")]
struct Cli {
    /// Template file ("-" or omitted reads from stdin)
    input: Option<PathBuf>,

    /// JSON data file
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Engine configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Register a named template, e.g. `footer=partials/footer.prompty`
    #[arg(short, long = "partial", value_name = "NAME=PATH")]
    partials: Vec<String>,

    /// Default error strategy: throw, default, remove, keepraw or log
    #[arg(short, long)]
    strategy: Option<ErrorStrategy>,

    /// Report validation issues instead of rendering
    #[arg(long)]
    validate: bool,

    /// Print the collected chat messages as JSON instead of the text output
    #[arg(long)]
    messages: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, String> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .map_err(|e| format!("loading config '{}': {}", path.display(), e))?,
        None => EngineConfig::default(),
    };
    if let Some(strategy) = cli.strategy {
        config = config.with_error_strategy(strategy);
    }
    let engine = Engine::builder().config(config).build().map_err(|e| e.to_string())?;

    for partial in &cli.partials {
        let (name, path) = partial
            .split_once('=')
            .ok_or_else(|| format!("partial '{}' must be NAME=PATH", partial))?;
        let source = read_file(Path::new(path))?;
        engine.register_template(name, &source).map_err(|e| match e {
            prompty::Error::Parse(err) => err.format(&source, path),
            other => format!("partial '{}': {}", name, other),
        })?;
    }

    let (source, filename) = match cli.input.as_deref() {
        Some(path) if path != Path::new("-") => (read_file(path)?, path.display().to_string()),
        _ => {
            if io::stdin().is_terminal() {
                return Err("no template given (pass a FILE or pipe one on stdin)".to_string());
            }
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| format!("reading from stdin: {}", e))?;
            (buffer, "<stdin>".to_string())
        }
    };

    if cli.validate {
        let issues = engine
            .validate(&source)
            .map_err(|err| err.format(&source, &filename))?;
        for issue in &issues {
            println!("{}: {}", filename, issue);
        }
        return Ok(if has_errors(&issues) {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let data = match &cli.data {
        Some(path) => serde_json::from_str::<Value>(&read_file(path)?)
            .map_err(|e| format!("parsing data '{}': {}", path.display(), e))?,
        None => Value::Null,
    };

    let template = engine
        .parse_named(&filename, &source)
        .map_err(|err| err.format(&source, &filename))?;
    let rendered = template
        .render(data, &RenderOptions::default())
        .map_err(|e| e.to_string())?;

    if cli.messages {
        let json = serde_json::to_string_pretty(&rendered.messages).map_err(|e| e.to_string())?;
        println!("{}", json);
    } else {
        print!("{}", rendered.output);
    }
    Ok(ExitCode::SUCCESS)
}

fn read_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("reading file '{}': {}", path.display(), e))
}
