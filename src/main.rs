use anyhow::{Context, Result};
use clap::Parser;
use dnw::config::{self, Config};
use dnw::device::{UsbChannel, UsbId};
use dnw::transfer::{self, Progress};
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// USB bulk-transfer utility for Samsung devices.
#[derive(Parser, Debug)]
#[command(name = "dnw", version)]
struct Opt {
    /// Download ADDRESS the payload is loaded at
    #[arg(short, long, short_alias = 'A', default_value = "0xc0008000", value_parser = parse_int::<u32>)]
    address: u32,

    /// USB transfer block SIZE in bytes
    #[arg(short, long, short_alias = 'B', default_value_t = config::DEFAULT_CHUNK_SIZE, value_parser = parse_block_size)]
    block_size: NonZeroUsize,

    /// USB configuration VALUE
    #[arg(short, long = "config", short_alias = 'C', default_value_t = config::DEFAULT_CONFIGURATION, value_parser = parse_int::<u8>)]
    configuration: u8,

    /// USB VENDOR:PRODUCT device ID, in hexadecimal
    #[arg(short, long, short_alias = 'D', default_value_t = config::DEFAULT_DEVICE)]
    device: UsbId,

    /// USB bulk OUT endpoint ADDRESS
    #[arg(short, long, short_alias = 'E', default_value_t = config::DEFAULT_ENDPOINT, value_parser = parse_int::<u8>)]
    endpoint: u8,

    /// USB interface NUMBER
    #[arg(short, long, short_alias = 'I', default_value_t = config::DEFAULT_INTERFACE, value_parser = parse_int::<u8>)]
    interface: u8,

    /// Turn off progress and status messages
    #[arg(short, long, short_alias = 'Q')]
    quiet: bool,

    /// USB transfer timeout DURATION in milliseconds
    #[arg(short, long, short_alias = 'T', default_value_t = 3000, value_parser = parse_int::<u64>)]
    timeout: u64,

    /// File to download
    file: PathBuf,
}

impl Opt {
    fn config(&self) -> Config {
        Config {
            load_address: self.address,
            chunk_size: self.block_size,
            device: self.device,
            configuration: self.configuration,
            interface: self.interface,
            endpoint: self.endpoint,
            timeout: Duration::from_millis(self.timeout),
            quiet: self.quiet,
        }
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer.
fn parse_int<T: TryFrom<u64>>(s: &str) -> Result<T, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| e.to_string())?;

    T::try_from(value).map_err(|_| format!("{s} is out of range"))
}

fn parse_block_size(s: &str) -> Result<NonZeroUsize, String> {
    NonZeroUsize::new(parse_int(s)?).ok_or_else(|| "block size must be at least 1".to_owned())
}

fn main() -> Result<()> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or("DNW_LOG", if opt.quiet { "warn" } else { "info" })
            .write_style("DNW_LOG_STYLE"),
    )
    .init();

    run(&opt.config(), &opt.file)
}

fn run(config: &Config, path: &Path) -> Result<()> {
    // Both the channel and the image are dropped, and so released, on every return path.
    let channel = UsbChannel::open(config.device, config.configuration, config.interface)
        .context("cannot open target USB device")?;

    let image = config
        .image_builder()
        .build(path)
        .with_context(|| format!("cannot read {}", path.display()))?;

    if !config.quiet {
        println!("Writing data...");
    }

    let result = transfer::download(
        channel,
        image,
        config.transfer_settings(),
        &mut |p: Progress| {
            print!("\r{}%\t {} bytes     ", p.percent(), p.sent);
            let _ = std::io::stdout().flush();
        },
    );

    if !config.quiet {
        // Finish the progress line
        println!();
    }
    result.context("USB transfer failed")?;

    if !config.quiet {
        println!("Done!");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_match_config_defaults() {
        let opt = Opt::try_parse_from(["dnw", "u-boot.bin"]).unwrap();
        assert_eq!(opt.config(), Config::default());
        assert_eq!(opt.file, PathBuf::from("u-boot.bin"));
    }

    #[test]
    fn cli_accepts_original_option_spellings() {
        let opt = Opt::try_parse_from([
            "dnw", "-A", "0x30000000", "-b", "1024", "-d", "5345:1234", "-E", "3", "-t", "500",
            "-q", "zImage",
        ])
        .unwrap();
        let config = opt.config();

        assert_eq!(config.load_address, 0x3000_0000);
        assert_eq!(config.chunk_size.get(), 1024);
        assert_eq!(
            config.device,
            UsbId {
                vid: 0x5345,
                pid: 0x1234
            }
        );
        assert_eq!(config.endpoint, 3);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert!(config.quiet);
    }

    #[test]
    fn quiet_takes_no_argument() {
        let opt = Opt::try_parse_from(["dnw", "--quiet", "1"]).unwrap();
        assert!(opt.quiet);
        assert_eq!(opt.file, PathBuf::from("1"));
    }

    #[test]
    fn cli_rejects_bad_values() {
        assert!(Opt::try_parse_from(["dnw", "-b", "0", "f"]).is_err());
        assert!(Opt::try_parse_from(["dnw", "-e", "256", "f"]).is_err());
        assert!(Opt::try_parse_from(["dnw", "-d", "04e8", "f"]).is_err());
        assert!(Opt::try_parse_from(["dnw"]).is_err());
    }

    #[test]
    fn int_parser_accepts_decimal_and_hex() {
        assert_eq!(parse_int::<u32>("3221258240"), Ok(0xc000_8000));
        assert_eq!(parse_int::<u32>("0xC0008000"), Ok(0xc000_8000));
        assert!(parse_int::<u8>("0x100").is_err());
        assert!(parse_int::<u8>("two").is_err());
    }
}
