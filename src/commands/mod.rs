//! CLI command implementations
//!
//! Every command runs against an already opened [`AdapterLink`]. The link
//! is opened over a boxed transport so the serial port and the emulator
//! share the same code paths.

pub mod aux;

use spiadapter_link::{
    byte_to_speed, speed_to_byte, AdapterConnection, AdapterLink, LinkOptions, SerialTransport,
    SpiMode, SpiTransfer, Transport,
};

/// Link type used by the CLI
pub type Link = AdapterLink<Box<dyn Transport>>;

/// Result type of CLI commands
pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Open a link on a serial port, a connection string or the emulator
pub fn open_link(port: &str, options: LinkOptions) -> Result<Link, Box<dyn std::error::Error>> {
    #[cfg(feature = "dummy")]
    if port == "dummy" {
        log::info!("Using built-in adapter emulator");
        let transport: Box<dyn Transport> = Box::new(spiadapter_dummy::DummyAdapter::new_default());
        return Ok(AdapterLink::open(transport, &options)?);
    }

    let conn = AdapterConnection::parse_with(port, options)?;
    let transport: Box<dyn Transport> =
        Box::new(SerialTransport::open(&conn.device, conn.options.timeout)?);
    Ok(AdapterLink::open(transport, &conn.options)?)
}

/// Format bytes as space separated hex
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print adapter identity and limits
pub fn run_info(link: &Link) {
    let info = link.info();
    println!("Adapter info:");
    println!("  Identity:        {}", format_hex(&info.raw));
    println!("  Protocol:        version {}", info.version);
    println!(
        "  Max transaction: {} bytes",
        info.max_transaction_size()
    );
    println!("  Reserved:        {}", format_hex(info.reserved()));
}

/// Re-run the connection handshake
pub fn run_ping(link: &mut Link, tries: u32) -> CmdResult {
    if link.test_connection(tries)? {
        println!("Adapter responding");
        Ok(())
    } else {
        Err("Adapter not responding to echo probes".into())
    }
}

/// Perform one SPI transaction and print the bytes read
pub fn run_transfer(
    link: &mut Link,
    data: &[u8],
    extra: usize,
    cs: u8,
    mode: u8,
    speed: u32,
    read: bool,
) -> CmdResult {
    let max = link.max_transaction_size();
    if data.len() + extra > max {
        return Err(format!(
            "Transaction of {} bytes exceeds adapter maximum of {} bytes",
            data.len() + extra,
            max
        )
        .into());
    }
    let mode = SpiMode::from_number(mode).ok_or_else(|| format!("Invalid SPI mode: {}", mode))?;
    log::debug!("SPI mode {} (CPOL={}, CPHA={})", mode.bits(), mode.cpol(), mode.cpha());

    let actual = byte_to_speed(speed_to_byte(speed));
    if actual != speed {
        log::info!("SPI speed {} Hz rounded to {} Hz", speed, actual);
    }

    let xfer = SpiTransfer::new(data)
        .extra_bytes(extra)
        .cs(cs)
        .mode(mode)
        .speed_hz(speed)
        .read(read);
    let miso = link.send(&xfer)?;

    if read {
        println!("{}", format_hex(&miso));
    } else {
        println!("OK, {} byte(s) written", xfer.total_len());
    }
    Ok(())
}
