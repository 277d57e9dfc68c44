//! `scpictl`: drive an instrument through its subsystem definitions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scpi_subsystem::command::Operation;
use scpi_subsystem::config::{Settings, DEFAULT_SETTINGS_PATH};
use scpi_subsystem::subsystem::load_definitions;
use scpi_subsystem::{transport, Attachment, Device, ScpiResult, SubsystemId, Value};

#[derive(Parser)]
#[command(
    name = "scpictl",
    version,
    about = "Drive SCPI instruments from declarative subsystem definitions"
)]
struct Cli {
    /// Settings file
    #[arg(short, long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Extra definition files, merged after the configured ones
    #[arg(short, long = "definitions")]
    definitions: Vec<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print mounted subsystems and their accessors
    Describe,
    /// Read an accessor, e.g. `get source[1] frequency`
    Get { path: String, accessor: String },
    /// Write a value, e.g. `set source[1] frequency "100 mHz"`
    Set {
        path: String,
        accessor: String,
        value: String,
    },
    /// Send an action accessor, e.g. `call system reset`
    Call { path: String, accessor: String },
    /// List the valid keys of a choice accessor
    Choices { path: String, accessor: String },
    /// Query and parse `*IDN?`
    Identify,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        settings.application.log_level = level;
        settings.validate()?;
    }
    init_tracing(&settings.application.log_level);

    let mut definitions = settings
        .load_definitions()
        .context("loading configured definition files")?;
    for path in &cli.definitions {
        definitions.extend(
            load_definitions(path)
                .with_context(|| format!("loading definitions from {}", path.display()))?,
        );
    }

    let link = transport::open(&settings.transport).context("opening transport")?;
    let mut device = Device::from_boxed(link);
    settings
        .mount_all(&mut device, &definitions)
        .context("attaching configured subsystems")?;
    info!(subsystems = ?device.child_names(), "device ready");

    match cli.cmd {
        Cmd::Describe => describe(&device)?,
        Cmd::Get { path, accessor } => {
            let id = device.find(&path)?;
            let value = device
                .read(id, &accessor)
                .with_context(|| format!("reading {}.{}", path, accessor))?;
            println!("{}", value);
        }
        Cmd::Set {
            path,
            accessor,
            value,
        } => {
            let id = device.find(&path)?;
            device
                .write(id, &accessor, Value::parse_literal(&value))
                .with_context(|| format!("writing {}.{}", path, accessor))?;
        }
        Cmd::Call { path, accessor } => {
            let id = device.find(&path)?;
            device
                .trigger(id, &accessor)
                .with_context(|| format!("calling {}.{}", path, accessor))?;
        }
        Cmd::Choices { path, accessor } => {
            let id = device.find(&path)?;
            for key in device.choices(id, &accessor)? {
                println!("{}", key);
            }
        }
        Cmd::Identify => println!("{}", device.identify()?),
    }
    Ok(())
}

fn describe(device: &Device) -> ScpiResult<()> {
    for name in device.child_names() {
        if let Some(attachment) = device.child(name) {
            print_attachment(device, name, attachment, 0)?;
        }
    }
    Ok(())
}

fn print_attachment(
    device: &Device,
    name: &str,
    attachment: &Attachment,
    depth: usize,
) -> ScpiResult<()> {
    let indent = "  ".repeat(depth);
    match attachment {
        Attachment::Single(id) => {
            println!("{}{}", indent, name);
            print_instance(device, *id, depth + 1)
        }
        Attachment::Channels(channels) => {
            for (channel, id) in channels.iter() {
                println!("{}{}[{}]", indent, name, channel);
                print_instance(device, id, depth + 1)?;
            }
            Ok(())
        }
    }
}

fn print_instance(device: &Device, id: SubsystemId, depth: usize) -> ScpiResult<()> {
    let indent = "  ".repeat(depth);
    let node = device.resolve(id)?;
    for accessor in node.template().accessors() {
        let kind = match accessor.operation() {
            Operation::Property { .. } => "read/write",
            Operation::Query(_) => "read",
            Operation::Write(_) | Operation::SplitWrite { .. } => "write",
            Operation::Action(_) => "action",
            Operation::Choices => "choices",
        };
        println!("{}.{} ({})", indent, accessor.name(), kind);
    }
    for child in node.child_names() {
        if let Some(attachment) = node.child(child) {
            print_attachment(device, child, attachment, depth)?;
        }
    }
    Ok(())
}
