//! Adapter link implementation
//!
//! This module provides the main `AdapterLink` struct. It owns the
//! transport, runs the connection handshake and implements the
//! command/response protocol on top of it.

use crate::error::{AdapterError, Result};
use crate::protocol::*;
use crate::transport::Transport;

use std::time::Duration;

/// Options used when opening a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Transport read timeout
    pub timeout: Duration,
    /// Number of echo handshake passes to try before giving up
    pub handshake_attempts: u32,
    /// Pause between handshake passes, lets a stale command time out on the adapter
    pub handshake_cooldown: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            handshake_attempts: 3,
            handshake_cooldown: Duration::from_millis(300),
        }
    }
}

/// Connection to an SPI adapter
///
/// A value of this type only exists after the echo handshake and the
/// identity check both passed. The transport is owned for the lifetime of
/// the link and closed when the link is dropped.
pub struct AdapterLink<T: Transport> {
    /// Transport layer (serial port or emulator)
    transport: T,
    /// Identity reported by the adapter
    info: AdapterInfo,
    /// Cooldown used by [`AdapterLink::test_connection`]
    handshake_cooldown: Duration,
}

impl<T: Transport> AdapterLink<T> {
    /// Open a link over the given transport
    ///
    /// This performs initialization:
    /// 1. Echo handshake, retried up to `handshake_attempts` times
    /// 2. Identity query and signature check
    ///
    /// On failure the transport is dropped before returning. A transport
    /// write failure aborts the handshake without further attempts.
    ///
    /// # Panics
    ///
    /// Panics if `options.handshake_attempts` is zero.
    pub fn open(mut transport: T, options: &LinkOptions) -> Result<Self> {
        assert!(
            options.handshake_attempts > 0,
            "handshake_attempts must be at least 1"
        );
        if !handshake(
            &mut transport,
            options.handshake_attempts,
            options.handshake_cooldown,
        )? {
            return Err(AdapterError::Connection("adapter not detected".into()));
        }
        log::debug!("adapter: Handshake OK");

        let info = query_info(&mut transport)?;
        log::info!(
            "adapter: Connected, protocol version {}, max transaction {} bytes",
            info.version,
            info.max_transaction_size()
        );
        log::debug!("adapter: Identity {:02X?}", info.raw);

        Ok(Self {
            transport,
            info,
            handshake_cooldown: options.handshake_cooldown,
        })
    }

    /// Get adapter identity
    pub fn info(&self) -> &AdapterInfo {
        &self.info
    }

    /// Negotiated protocol version
    pub fn version(&self) -> ProtocolVersion {
        self.info.version
    }

    /// Maximum number of bytes (data + extra) in one SPI transaction
    pub fn max_transaction_size(&self) -> usize {
        self.info.max_transaction_size()
    }

    /// Re-run the echo handshake
    ///
    /// Provided for diagnostics. Returns `Ok(false)` if no pass over the
    /// probe bytes succeeded within `max_tries` attempts.
    ///
    /// # Panics
    ///
    /// Panics if `max_tries` is zero.
    pub fn test_connection(&mut self, max_tries: u32) -> Result<bool> {
        assert!(max_tries > 0, "max_tries must be at least 1");
        handshake(&mut self.transport, max_tries, self.handshake_cooldown)
    }

    /// Perform an SPI transaction
    ///
    /// Returns the bytes read on MISO, exactly `data.len() + extra_bytes` of
    /// them, or an empty vector when read-back is disabled. Skipping the
    /// read-back speeds up large write-only transactions.
    ///
    /// # Panics
    ///
    /// Panics if the request is outside the adapter limits, before anything
    /// is written. See [`SpiTransfer::validate`].
    pub fn send(&mut self, xfer: &SpiTransfer<'_>) -> Result<Vec<u8>> {
        const OP: &str = "SPI send";

        let frame = xfer.encode(self.max_transaction_size());
        log::trace!(
            "adapter: SPI cs={} mode={} speed={} Hz, {} data + {} extra byte(s)",
            xfer.cs,
            xfer.mode.bits(),
            byte_to_speed(speed_to_byte(xfer.speed_hz)),
            xfer.data.len(),
            xfer.extra_bytes
        );
        self.transport.write(&frame)?;

        let resp = read_response(&mut self.transport, OP, SPI_COUNT_SIZE)?;
        let count = u16::from_be_bytes([resp[0], resp[1]]) as usize;
        let expected = xfer.expected_response_len();
        if count != expected {
            return Err(AdapterError::Protocol(format!(
                "{}: response count mismatch, expected {}, got {}",
                OP, expected, count
            )));
        }

        let mut data = vec![0u8; count];
        read_exact(&mut self.transport, OP, &mut data)?;
        Ok(data)
    }

    /// Set the mode of an auxiliary pin
    ///
    /// Returns `Ok(false)` if the adapter refused the request. Transport and
    /// protocol failures are still reported as errors.
    ///
    /// # Panics
    ///
    /// Panics if `pin` is not in 0..=7.
    pub fn set_aux_pin_mode(&mut self, pin: u8, mode: AuxPinMode) -> Result<bool> {
        const OP: &str = "Aux mode";

        self.transport.write(&aux_mode_frame(pin, mode))?;
        match read_response(&mut self.transport, OP, 0) {
            Ok(_) => Ok(true),
            Err(AdapterError::Device { code, .. }) => {
                log::warn!(
                    "adapter: Setting aux pin {} to {:?} failed with error code {}",
                    pin,
                    mode,
                    code
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Read all auxiliary pins as a packed 8-bit value
    pub fn read_aux_pins(&mut self) -> Result<u8> {
        self.transport.write(&[CMD_AUX_READ])?;
        let resp = read_response(&mut self.transport, "Aux read", 1)?;
        Ok(resp[0])
    }

    /// Write auxiliary pins
    ///
    /// Only pins whose bit is set in `mask` are updated from `values`, the
    /// others keep their state.
    pub fn write_aux_pins(&mut self, values: u8, mask: u8) -> Result<()> {
        self.transport.write(&aux_write_frame(values, mask))?;
        read_response(&mut self.transport, "Aux write", 0)?;
        Ok(())
    }

    /// Read a single auxiliary pin
    ///
    /// # Panics
    ///
    /// Panics if `pin` is not in 0..=7.
    pub fn read_aux_pin(&mut self, pin: u8) -> Result<bool> {
        let mask = aux_pin_mask(pin);
        Ok(self.read_aux_pins()? & mask != 0)
    }

    /// Write a single auxiliary pin, other pins are left untouched
    ///
    /// # Panics
    ///
    /// Panics if `pin` is not in 0..=7.
    pub fn write_aux_pin(&mut self, pin: u8, value: bool) -> Result<()> {
        let mask = aux_pin_mask(pin);
        self.write_aux_pins(if value { mask } else { 0 }, mask)
    }

    /// Get the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get the underlying transport mutably
    ///
    /// Bytes written or read directly bypass the protocol and can leave the
    /// adapter out of sync with the link.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Close the link and release the transport
    pub fn close(self) {
        log::debug!("adapter: Closing link");
    }

    /// Close the link and return the transport
    pub fn into_inner(self) -> T {
        self.transport
    }
}

// ---- Protocol implementation ----

/// Run the echo handshake up to `max_tries` times
fn handshake<T: Transport>(transport: &mut T, max_tries: u32, cooldown: Duration) -> Result<bool> {
    for attempt in 0..max_tries {
        if attempt > 0 {
            // Let any pending command on the adapter time out
            std::thread::sleep(cooldown);
            transport.clear_input()?;
            log::debug!("adapter: Handshake attempt {}", attempt + 1);
        }

        let mut ok = true;
        for probe in ECHO_PROBES {
            if !echo(transport, probe)? {
                ok = false;
                break;
            }
        }
        if ok {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Send one echo probe, returns true if the same byte came back
fn echo<T: Transport>(transport: &mut T, probe: u8) -> Result<bool> {
    transport.write(&[CMD_ECHO, probe])?;

    let mut resp = [0u8];
    let n = transport.read(&mut resp)?;
    if n != 1 {
        log::debug!("adapter: No echo for probe 0x{:02X}", probe);
        return Ok(false);
    }
    if resp[0] != probe {
        log::debug!(
            "adapter: Echo mismatch, sent 0x{:02X}, got 0x{:02X}",
            probe,
            resp[0]
        );
        return Ok(false);
    }
    Ok(true)
}

/// Query and validate the adapter identity
fn query_info<T: Transport>(transport: &mut T) -> Result<AdapterInfo> {
    transport.write(&[CMD_INFO])?;
    let payload = read_response(transport, "Adapter info", ADAPTER_INFO_SIZE).map_err(|e| {
        AdapterError::Connection(format!("unexpected adapter identity: {}", e))
    })?;
    AdapterInfo::parse(&payload)
}

/// Read a response and return the OK payload
///
/// Reads the status byte, then either the error code or exactly
/// `ok_resp_size` payload bytes.
fn read_response<T: Transport>(
    transport: &mut T,
    op: &'static str,
    ok_resp_size: usize,
) -> Result<Vec<u8>> {
    let mut status = [0u8];
    read_exact(transport, op, &mut status)?;

    match status[0] {
        STATUS_OK => {
            let mut payload = vec![0u8; ok_resp_size];
            read_exact(transport, op, &mut payload)?;
            Ok(payload)
        }
        STATUS_ERROR => {
            let mut code = [0u8];
            read_exact(transport, op, &mut code)?;
            log::debug!("adapter: {} failed with error code {}", op, code[0]);
            Err(AdapterError::Device { op, code: code[0] })
        }
        other => Err(AdapterError::Protocol(format!(
            "{}: unexpected status flag 0x{:02X}",
            op, other
        ))),
    }
}

/// Read exactly `buf.len()` bytes, a short read is an error
fn read_exact<T: Transport>(transport: &mut T, op: &'static str, buf: &mut [u8]) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let got = transport.read(buf)?;
    if got != buf.len() {
        return Err(AdapterError::ShortRead {
            op,
            expected: buf.len(),
            got,
        });
    }
    Ok(())
}
