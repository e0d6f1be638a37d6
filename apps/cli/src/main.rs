use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand};
use linux_embedded_hal::I2cdev;
use tracing::{error, info};
use xdfu_core::protocol::exchange;
use xdfu_core::session::{FirmwareConfig, SessionConfig, run_update};
use xdfu_core::{I2cTransport, TracingObserver, payload::sha256_hex};

#[derive(Parser, Debug)]
#[command(author, version, about = "XMOS companion controller DFU tool", long_about = None)]
struct Args {
    /// TOML session configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// I2C character device (e.g. /dev/i2c-1)
    #[arg(long)]
    bus: Option<String>,

    /// 7-bit device address, decimal or 0x-prefixed hex
    #[arg(long, value_parser = parse_address)]
    address: Option<u8>,

    /// Firmware image to install
    #[arg(long)]
    firmware: Option<PathBuf>,

    /// Version carried by the firmware image (major.minor.patch)
    #[arg(long)]
    firmware_version: Option<xdfu_core::FirmwareVersion>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the device and update it if it runs another version
    Flash {
        /// Update even if the versions already match
        #[arg(long)]
        force: bool,
    },
    /// Print the firmware version the device reports
    Version,
    /// Print one DFU status response
    Status,
    /// Print the microphone mute switch state
    MuteState,
    /// Print the voice-to-noise ratio reading
    Vnr,
    /// Mute or unmute the speaker output
    #[command(group(ArgGroup::new("mode").required(true).args(["mute", "unmute"])))]
    Speaker {
        #[arg(long)]
        mute: bool,
        #[arg(long)]
        unmute: bool,
    },
    /// Print size and digest of a firmware image
    Inspect { firmware: PathBuf },
    /// Write a default configuration file
    InitConfig { path: PathBuf },
}

fn parse_address(s: &str) -> Result<u8, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    }
    .map_err(|e| format!("invalid address {s:?}: {e}"))?;
    if value > 0x7F {
        return Err(format!("address {value:#x} is not a 7-bit address"));
    }
    Ok(value)
}

/// Config file (or defaults) with command-line overrides applied.
fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(bus) = &args.bus {
        config.bus = bus.clone();
    }
    if let Some(address) = args.address {
        config.address = address;
    }

    match (&args.firmware, args.firmware_version) {
        (Some(path), Some(version)) => {
            config.firmware = Some(FirmwareConfig {
                path: path.clone(),
                version,
                sha256: None,
            });
        }
        (Some(path), None) => {
            let Some(fw) = config.firmware.as_mut() else {
                bail!("--firmware requires --firmware-version");
            };
            fw.path = path.clone();
            fw.sha256 = None;
        }
        (None, Some(version)) => {
            let Some(fw) = config.firmware.as_mut() else {
                bail!("--firmware-version requires a firmware image");
            };
            fw.version = version;
        }
        (None, None) => {}
    }

    config.validate()?;
    Ok(config)
}

fn open_transport(config: &SessionConfig) -> Result<I2cTransport<I2cdev>> {
    let bus = I2cdev::new(&config.bus).with_context(|| format!("opening {}", config.bus))?;
    info!(bus = %config.bus, address = format_args!("{:#04x}", config.address), "Opened bus");
    Ok(I2cTransport::new(bus, config.address))
}

fn run(args: Args) -> Result<()> {
    match &args.command {
        Command::Inspect { firmware } => {
            let data = std::fs::read(firmware)
                .with_context(|| format!("reading {}", firmware.display()))?;
            let max_xfer = session_config(&args)?.timing.max_xfer;
            println!("size:   {} bytes", data.len());
            println!("blocks: {} of {} bytes", data.len().div_ceil(max_xfer), max_xfer);
            println!("sha256: {}", sha256_hex(&data));
            return Ok(());
        }
        Command::InitConfig { path } => {
            SessionConfig::default().save_to_file(path)?;
            info!(path = %path.display(), "Wrote default configuration");
            return Ok(());
        }
        _ => {}
    }

    let config = session_config(&args)?;
    let mut transport = open_transport(&config)?;

    match args.command {
        Command::Flash { force } => {
            if config.firmware.is_none() && force {
                bail!("--force requires a firmware image");
            }
            let mut device = config.build_device(transport)?;
            device.subscribe(Arc::new(TracingObserver));
            let version = run_update(&mut device, config.tick_interval(), force)?;
            println!("{version}");
        }
        Command::Version => {
            println!("{}", exchange::get_version(&mut transport)?);
        }
        Command::Status => {
            let status = exchange::get_status(&mut transport)?;
            println!("state:     {}", status.state);
            println!("status:    {}", status.status);
            println!("next poll: {} ms", status.next_poll.as_millis());
        }
        Command::MuteState => {
            let muted = exchange::mic_mute_state(&mut transport)?;
            println!("{}", if muted { "muted" } else { "unmuted" });
        }
        Command::Vnr => {
            println!("{}", exchange::read_vnr(&mut transport)?);
        }
        Command::Speaker { mute, .. } => {
            exchange::set_speaker_mute(&mut transport, mute)?;
        }
        Command::Inspect { .. } | Command::InitConfig { .. } => {}
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x42"), Ok(0x42));
        assert_eq!(parse_address("66"), Ok(66));
        assert!(parse_address("0x80").is_err());
        assert!(parse_address("bus").is_err());
    }

    #[test]
    fn test_firmware_flags_override() {
        let args = Args::parse_from([
            "xdfu",
            "--bus",
            "/dev/i2c-7",
            "--firmware",
            "fw.bin",
            "--firmware-version",
            "1.2.3",
            "flash",
        ]);
        let config = session_config(&args).unwrap();
        assert_eq!(config.bus, "/dev/i2c-7");
        let fw = config.firmware.unwrap();
        assert_eq!(fw.path, PathBuf::from("fw.bin"));
        assert_eq!(fw.version, xdfu_core::FirmwareVersion::new(1, 2, 3));
    }

    #[test]
    fn test_firmware_without_version_rejected() {
        let args = Args::parse_from(["xdfu", "--firmware", "fw.bin", "flash"]);
        assert!(session_config(&args).is_err());
    }

    #[test]
    fn test_vnr_subcommand() {
        let args = Args::try_parse_from(["xdfu", "--address", "0x42", "vnr"]).unwrap();
        assert!(matches!(args.command, Command::Vnr));
        assert_eq!(args.address, Some(0x42));
    }

    #[test]
    fn test_speaker_requires_mode() {
        assert!(Args::try_parse_from(["xdfu", "speaker"]).is_err());
        let args = Args::try_parse_from(["xdfu", "speaker", "--mute"]).unwrap();
        assert!(matches!(args.command, Command::Speaker { mute: true, .. }));
    }
}
