use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use mc_link::config::Config;
use mc_link::protocol::{Dispatcher, Frame, IdentityValidator, Register, Transmit, write_value};
use mc_link::transport::SlcanPort;

#[derive(Parser)]
#[command(name = "mc-link", about = "Motor controller CAN link")]
struct Cli {
    /// JSON config file; flags below override it
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Serial port of the CAN adapter
    #[arg(long, global = true)]
    port: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the link: identity handshake, then dispatch and publish
    Run {
        /// Fault if identity replies take longer than this
        #[arg(long)]
        identity_timeout_ms: Option<u64>,

        /// Log signals without publishing them
        #[arg(long)]
        no_publish: bool,
    },
    /// Read one register and print the decoded reply
    Read {
        #[arg(value_parser = parse_u8)]
        register: u8,

        #[arg(long, default_value_t = 500)]
        timeout_ms: u64,
    },
    /// Write a 2 or 4 byte value to a register
    Write {
        #[arg(value_parser = parse_u8)]
        register: u8,

        #[arg(value_parser = parse_u32)]
        value: u32,

        #[arg(long, default_value_t = 2)]
        width: usize,
    },
    /// Decode a frame given as hex bytes, without touching the bus
    Decode { bytes: Vec<String> },
}

fn parse_u32(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("{}: {}", text, e))
}

fn parse_u8(text: &str) -> Result<u8, String> {
    let value = parse_u32(text)?;
    u8::try_from(value).map_err(|_| format!("{} does not fit in a byte", text))
}

type BoxError = mc_link::runtime::BoxError;

fn load_config(cli: &Cli) -> Result<Config, BoxError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = &cli.port {
        config.port = port.clone();
    }
    Ok(config)
}

fn decode(bytes: &[String], config: &Config) -> Result<(), BoxError> {
    let raw = bytes
        .iter()
        .map(|b| u8::from_str_radix(b.trim_start_matches("0x"), 16))
        .collect::<Result<Vec<u8>, _>>()?;
    let frame = Frame::new(&raw)?;

    let mut signals = Vec::new();
    let dispatcher = Dispatcher::new(IdentityValidator::new(config.identity()));
    let register = dispatcher.dispatch(&frame, &mut signals)?;
    println!("{}", register);
    for signal in &signals {
        println!("{}", serde_json::to_string(signal)?);
    }
    Ok(())
}

async fn execute(cli: Cli) -> Result<(), BoxError> {
    let mut config = load_config(&cli)?;

    match cli.command {
        Command::Run {
            identity_timeout_ms,
            no_publish,
        } => {
            if identity_timeout_ms.is_some() {
                config.identity_timeout_ms = identity_timeout_ms;
            }
            if no_publish {
                config.publish = false;
            }
            mc_link::runtime::run(config).await
        }
        Command::Read {
            register,
            timeout_ms,
        } => {
            let Register::Known(id) = Register::from(register) else {
                return Err(format!("0x{:02X} is not a readable register", register).into());
            };
            let (frame, signals) = tokio::task::spawn_blocking(move || {
                mc_link::runtime::read_register(&config, id, Duration::from_millis(timeout_ms))
            })
            .await??;
            println!("{:?}", frame);
            for signal in &signals {
                println!("{}", serde_json::to_string(signal)?);
            }
            Ok(())
        }
        Command::Write {
            register,
            value,
            width,
        } => {
            let frame = write_value(register, value, width)?;
            let mut adapter = SlcanPort::open(
                &config.port,
                config.baudrate,
                config.bitrate,
                config.tx_id,
                config.rx_id,
            )?;
            adapter.transmit(frame)?;
            println!("Sent {:?}", frame);
            Ok(())
        }
        Command::Decode { bytes } => decode(&bytes, &config),
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug for frame traces)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = execute(Cli::parse()).await {
        eprintln!("mc-link error: {}", e);
        std::process::exit(1);
    }
}
