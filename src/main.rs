//! spiadapter - Command line tool for the USB SPI adapter
//!
//! Opens a link to the adapter over its virtual serial port (or to the
//! built-in emulator with `--port dummy`) and runs a single operation:
//! identity query, SPI transaction or auxiliary pin access.

mod cli;
mod commands;

use clap::Parser;
use cli::{AuxCommands, Cli, Commands};
use spiadapter_link::LinkOptions;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let timeout = Duration::try_from_secs_f64(cli.timeout)
        .ok()
        .filter(|t| !t.is_zero())
        .ok_or_else(|| format!("Invalid timeout: {}", cli.timeout))?;
    let options = LinkOptions {
        timeout,
        handshake_attempts: cli.retries,
        ..Default::default()
    };

    let mut link = commands::open_link(&cli.port, options)?;

    let result = match cli.command {
        Commands::Info => {
            commands::run_info(&link);
            Ok(())
        }
        Commands::Ping { tries } => commands::run_ping(&mut link, tries),
        Commands::Transfer {
            data,
            extra,
            cs,
            mode,
            speed,
            no_read,
        } => commands::run_transfer(
            &mut link,
            &data.unwrap_or_default().0,
            extra,
            cs,
            mode,
            speed,
            !no_read,
        ),
        Commands::Aux(subcmd) => match subcmd {
            AuxCommands::Mode { pin, mode } => commands::aux::cmd_mode(&mut link, pin, mode),
            AuxCommands::Read { pin } => commands::aux::cmd_read(&mut link, pin),
            AuxCommands::Write { values, mask } => {
                commands::aux::cmd_write(&mut link, values, mask)
            }
            AuxCommands::Set { pin, value } => commands::aux::cmd_set(&mut link, pin, value != 0),
        },
    };

    link.close();
    result
}
