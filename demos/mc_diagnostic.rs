// Controller diagnostic: READ-ONLY check of the CAN link
//
// Only sends read requests - nothing is written to the controller.
// Use this first before running the link.
//
// Usage: cargo run --example mc_diagnostic -- [port]
// Example: cargo run --example mc_diagnostic -- /dev/ttyACM0

use mc_link::config::Config;
use mc_link::messages::Signal;
use mc_link::protocol::RegisterId;
use mc_link::runtime::read_register;
use std::time::Duration;

const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    // Get port from args or use default
    let mut config = Config::default();
    if let Some(port) = std::env::args().nth(1) {
        config.port = port;
    }

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           Motor Controller Diagnostic (READ-ONLY)            ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Serial port: {}", config.port);
    println!(
        "CAN: {} bit/s, tx 0x{:03X}, rx 0x{:03X}",
        config.bitrate, config.tx_id, config.rx_id
    );
    println!();

    let steps = [
        ("Serial number", RegisterId::SerialNumber),
        ("Firmware version", RegisterId::FirmwareVersion),
        ("Status", RegisterId::Status),
    ];

    let mut healthy = true;
    for (i, (name, register)) in steps.into_iter().enumerate() {
        println!("Step {}: Reading {}...", i + 1, name);
        match read_register(&config, register, REPLY_TIMEOUT) {
            Ok((frame, signals)) => {
                println!("  Reply: {:?}", frame);
                if signals.is_empty() {
                    println!("  ✓ No active conditions");
                }
                for signal in signals {
                    healthy &= matches!(signal, Signal::IdentityOk { .. });
                    println!("  {}", describe(&signal));
                }
            }
            Err(e) => {
                healthy = false;
                println!("  ✗ {}", e);
            }
        }
        println!();
    }

    if healthy {
        println!("Controller identity verified and no errors reported.");
        println!("Next step: cargo run -- run");
    } else {
        println!("⚠ Problems found - check wiring, CAN ids and the expected identity.");
    }
    Ok(())
}

fn describe(signal: &Signal) -> String {
    match signal {
        Signal::IdentityOk { field, value } => format!("✓ {:?} = 0x{:X}", field, value),
        Signal::IdentityMismatch {
            field,
            expected,
            actual,
        } => format!("✗ {:?} = 0x{:X} (expected 0x{:X})", field, actual, expected),
        Signal::Shutdown { errors } => format!("✗ ERRORS: {:?}", errors),
        Signal::Suspend { warnings } => format!("⚠ WARNINGS: {:?}", warnings),
        Signal::IdentityTimeout { missing } => format!("✗ No reply for {:?}", missing),
    }
}
