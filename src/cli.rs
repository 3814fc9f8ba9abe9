//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};

/// Parse a string as a hex or decimal u8
pub fn parse_u8(s: &str) -> Result<u8, String> {
    if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u8::from_str_radix(bin, 2).map_err(|e| format!("Invalid binary value: {}", e))
    } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u8>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Bytes given on the command line as a hex string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

/// Parse a hex string such as `112233`, `11:22:33` or `0x11,0x22`
pub fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let digits: String = s
        .split([',', ':', ' '])
        .map(|p| p.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();

    if !digits.is_ascii() {
        return Err(format!("Invalid hex string '{}'", s));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits in '{}'", s));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("Invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(HexBytes)
}

#[derive(Parser)]
#[command(name = "spiadapter")]
#[command(author, version, about = "USB SPI adapter tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Adapter serial port, a connection string
    /// (dev=<port>,timeout=<secs>,retries=<n>,cooldown=<ms>) or "dummy"
    #[arg(short, long)]
    pub port: String,

    /// Serial read timeout in seconds
    #[arg(long, default_value_t = 1.0)]
    pub timeout: f64,

    /// Number of connection handshake attempts
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub retries: u32,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show adapter identity and limits
    Info,

    /// Re-run the connection handshake
    Ping {
        /// Number of attempts
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        tries: u32,
    },

    /// Perform an SPI transaction and print the bytes read
    Transfer {
        /// Bytes to write, as hex (e.g. 112233 or 11:22:33)
        #[arg(value_parser = parse_hex_bytes)]
        data: Option<HexBytes>,

        /// Number of 0x00 bytes to clock out after the data
        #[arg(short, long, default_value_t = 0)]
        extra: usize,

        /// Chip select (0-3)
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
        cs: u8,

        /// SPI mode (0-3)
        #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
        mode: u8,

        /// SPI clock in Hz, rounded to a multiple of 25 kHz
        #[arg(short, long, default_value_t = 1_000_000,
              value_parser = clap::value_parser!(u32).range(25_000..=4_000_000))]
        speed: u32,

        /// Don't return the bytes read on MISO
        #[arg(long)]
        no_read: bool,
    },

    /// Auxiliary pin operations
    #[command(subcommand)]
    Aux(AuxCommands),
}

#[derive(Subcommand)]
pub enum AuxCommands {
    /// Set the mode of a pin
    Mode {
        /// Pin index (0-7)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=7))]
        pin: u8,

        /// New pin mode
        mode: PinModeArg,
    },

    /// Read all pins, or a single pin
    Read {
        /// Pin index (0-7)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=7))]
        pin: Option<u8>,
    },

    /// Write pins under a mask
    Write {
        /// Pin values (decimal, 0x hex or 0b binary)
        #[arg(value_parser = parse_u8)]
        values: u8,

        /// Pins to update, others keep their state
        #[arg(long, default_value = "0xFF", value_parser = parse_u8)]
        mask: u8,
    },

    /// Write a single pin
    Set {
        /// Pin index (0-7)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=7))]
        pin: u8,

        /// Pin value (0 or 1)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        value: u8,
    },
}

/// Auxiliary pin mode as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PinModeArg {
    InputPulldown,
    InputPullup,
    Output,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_u8() {
        assert_eq!(parse_u8("255"), Ok(255));
        assert_eq!(parse_u8("0x3C"), Ok(0x3C));
        assert_eq!(parse_u8("0b1010"), Ok(0b1010));
        assert!(parse_u8("256").is_err());
        assert!(parse_u8("0xZZ").is_err());
    }

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("112233"), Ok(HexBytes(vec![0x11, 0x22, 0x33])));
        assert_eq!(parse_hex_bytes("11:22:33"), Ok(HexBytes(vec![0x11, 0x22, 0x33])));
        assert_eq!(parse_hex_bytes("0xaa,0xBB"), Ok(HexBytes(vec![0xAA, 0xBB])));
        assert_eq!(parse_hex_bytes(""), Ok(HexBytes(vec![])));
        assert!(parse_hex_bytes("123").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn test_transfer_args() {
        let cli = Cli::try_parse_from([
            "spiadapter", "-p", "dummy", "transfer", "112233", "--extra", "2", "--speed",
            "100000",
        ])
        .unwrap();
        assert_eq!(cli.port, "dummy");
        match cli.command {
            Commands::Transfer {
                data,
                extra,
                cs,
                mode,
                speed,
                no_read,
            } => {
                assert_eq!(data, Some(HexBytes(vec![0x11, 0x22, 0x33])));
                assert_eq!((extra, cs, mode, speed, no_read), (2, 0, 0, 100_000, false));
            }
            _ => panic!("expected transfer"),
        }
    }

    #[test]
    fn test_out_of_range_args_rejected() {
        assert!(Cli::try_parse_from(["spiadapter", "-p", "x", "transfer", "--cs", "4"]).is_err());
        assert!(
            Cli::try_parse_from(["spiadapter", "-p", "x", "transfer", "--speed", "5000000"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["spiadapter", "-p", "x", "aux", "set", "8", "1"]).is_err());
        assert!(Cli::try_parse_from(["spiadapter", "-p", "x", "--retries", "0", "info"]).is_err());
    }

    #[test]
    fn test_aux_mode_arg() {
        let cli =
            Cli::try_parse_from(["spiadapter", "-p", "x", "aux", "mode", "3", "input-pullup"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Aux(AuxCommands::Mode {
                pin: 3,
                mode: PinModeArg::InputPullup
            })
        ));
    }
}
