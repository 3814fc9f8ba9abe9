//! spiadapter-dummy - In-memory SPI adapter emulator for testing
//!
//! This crate provides a dummy adapter that runs the adapter's command
//! parser in memory and implements [`Transport`], so an [`AdapterLink`]
//! can be opened on it without real hardware.
//!
//! [`AdapterLink`]: spiadapter_link::AdapterLink

use std::collections::VecDeque;

use spiadapter_link::error::{DeviceErrorCode, Result};
use spiadapter_link::protocol::*;
use spiadapter_link::Transport;

/// Configuration for the dummy adapter
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Protocol version byte reported by the identity command
    pub version: u8,
    /// Transaction buffer size enforced by the emulated firmware
    pub max_transaction_size: usize,
    /// Bytes 4..7 of the identity payload
    pub reserved: [u8; 3],
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            version: 0x03,
            max_transaction_size: 256,
            reserved: [0; 3],
        }
    }
}

impl DummyConfig {
    /// Configuration of a 1024-byte buffer adapter
    pub fn v4() -> Self {
        Self {
            version: 0x04,
            max_transaction_size: 1024,
            ..Default::default()
        }
    }

    /// The identity payload the adapter reports
    pub fn identity(&self) -> [u8; ADAPTER_INFO_SIZE] {
        let [a, b, c] = ADAPTER_SIGNATURE;
        let [r0, r1, r2] = self.reserved;
        [a, b, c, self.version, r0, r1, r2]
    }
}

/// A device on the emulated SPI bus
///
/// The buffer holds the MOSI bytes on entry and must hold the MISO bytes
/// on return, like a full duplex in-place transfer.
pub trait SpiDevice {
    fn transfer(&mut self, cs: u8, mode: SpiMode, buf: &mut [u8]);
}

/// MISO wired to MOSI
#[derive(Debug, Default, Clone, Copy)]
pub struct Loopback;

impl SpiDevice for Loopback {
    fn transfer(&mut self, _cs: u8, _mode: SpiMode, _buf: &mut [u8]) {}
}

impl<F: FnMut(u8, SpiMode, &mut [u8])> SpiDevice for F {
    fn transfer(&mut self, cs: u8, mode: SpiMode, buf: &mut [u8]) {
        self(cs, mode, buf)
    }
}

/// A completed SPI transaction as seen by the emulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiRecord {
    pub cs: u8,
    pub mode: SpiMode,
    pub speed_byte: u8,
    pub read: bool,
    /// Bytes clocked out, including the zero-filled extra bytes
    pub mosi: Vec<u8>,
}

/// Dummy SPI adapter
///
/// Emulates the adapter firmware: bytes written are parsed as commands as
/// soon as a command is complete, responses are queued for `read`.
/// Unknown opcodes are ignored, like the firmware does.
pub struct DummyAdapter {
    config: DummyConfig,
    device: Box<dyn SpiDevice>,
    /// Bytes of a command not yet complete
    rx: Vec<u8>,
    /// Response bytes waiting to be read
    tx: VecDeque<u8>,
    written: Vec<u8>,
    transactions: Vec<SpiRecord>,
    pin_modes: [AuxPinMode; AUX_PIN_COUNT as usize],
    output_latch: u8,
    /// Externally driven input levels and which pins are driven
    input_levels: u8,
    input_driven: u8,
    // Fault injection
    pending_error: Option<u8>,
    pending_status: Option<u8>,
    corrupt_echoes: usize,
    mute: bool,
}

impl DummyAdapter {
    /// Create a new dummy adapter with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        Self {
            config,
            device: Box::new(Loopback),
            rx: Vec::new(),
            tx: VecDeque::new(),
            written: Vec::new(),
            transactions: Vec::new(),
            pin_modes: [AuxPinMode::InputPulldown; AUX_PIN_COUNT as usize],
            output_latch: 0,
            input_levels: 0,
            input_driven: 0,
            pending_error: None,
            pending_status: None,
            corrupt_echoes: 0,
            mute: false,
        }
    }

    /// Create a new dummy adapter with default configuration (version 3, 256 bytes)
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Attach a device to the SPI bus
    pub fn with_device(mut self, device: impl SpiDevice + 'static) -> Self {
        self.device = Box::new(device);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// All bytes written by the host so far
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Forget the recorded host bytes
    pub fn clear_written(&mut self) {
        self.written.clear();
    }

    /// SPI transactions performed so far
    pub fn transactions(&self) -> &[SpiRecord] {
        &self.transactions
    }

    /// Number of response bytes not yet read by the host
    pub fn pending_reply_len(&self) -> usize {
        self.tx.len()
    }

    /// Current mode of an aux pin
    ///
    /// # Panics
    ///
    /// Panics if `pin` is not in 0..=7.
    pub fn pin_mode(&self, pin: u8) -> AuxPinMode {
        aux_pin_mask(pin);
        self.pin_modes[pin as usize]
    }

    /// Output latch of the aux pins
    pub fn output_latch(&self) -> u8 {
        self.output_latch
    }

    /// Drive an input pin externally, `None` leaves it to its pull resistor
    pub fn set_input_level(&mut self, pin: u8, level: Option<bool>) {
        let mask = aux_pin_mask(pin);
        match level {
            Some(high) => {
                self.input_driven |= mask;
                if high {
                    self.input_levels |= mask;
                } else {
                    self.input_levels &= !mask;
                }
            }
            None => self.input_driven &= !mask,
        }
    }

    /// Reply to the next status-bearing command with `E code`
    pub fn inject_error(&mut self, code: u8) {
        self.pending_error = Some(code);
    }

    /// Reply to the next status-bearing command with a bare status byte
    pub fn inject_status(&mut self, status: u8) {
        self.pending_status = Some(status);
    }

    /// Return a wrong byte for the next `count` echo commands
    pub fn corrupt_echoes(&mut self, count: usize) {
        self.corrupt_echoes = count;
    }

    /// Stop replying to commands, the host sees read timeouts
    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
    }

    /// Packed level of all aux pins as the firmware would sample them
    pub fn pin_levels(&self) -> u8 {
        let mut levels = 0u8;
        for pin in 0..AUX_PIN_COUNT {
            let mask = 1u8 << pin;
            let high = match self.pin_modes[pin as usize] {
                AuxPinMode::Output => self.output_latch & mask != 0,
                _ if self.input_driven & mask != 0 => self.input_levels & mask != 0,
                AuxPinMode::InputPullup => true,
                AuxPinMode::InputPulldown => false,
            };
            if high {
                levels |= mask;
            }
        }
        levels
    }

    // ---- Command parser ----

    /// Run every complete command in the receive buffer
    fn process(&mut self) {
        while let Some(&opcode) = self.rx.first() {
            let needed = match opcode {
                CMD_ECHO => 2,
                CMD_INFO | CMD_AUX_READ => 1,
                CMD_AUX_MODE | CMD_AUX_WRITE => 3,
                CMD_SPI_SEND => 1 + SPI_HEADER_SIZE,
                _ => {
                    log::trace!("dummy: Ignoring unknown command byte 0x{:02X}", opcode);
                    self.rx.remove(0);
                    continue;
                }
            };
            if self.rx.len() < needed {
                return;
            }

            let consumed = match opcode {
                CMD_ECHO => {
                    self.handle_echo(self.rx[1]);
                    2
                }
                CMD_SPI_SEND => match self.handle_spi() {
                    Some(n) => n,
                    // Waiting for data bytes
                    None => return,
                },
                _ => {
                    let cmd: Vec<u8> = self.rx[..needed].to_vec();
                    self.handle_simple(&cmd);
                    needed
                }
            };
            self.rx.drain(..consumed);
        }
    }

    fn handle_echo(&mut self, byte: u8) {
        let reply = if self.corrupt_echoes > 0 {
            self.corrupt_echoes -= 1;
            !byte
        } else {
            byte
        };
        self.reply(&[reply]);
    }

    /// Emit an injected fault in place of the next status-bearing reply,
    /// returns true if the command must not be executed
    fn take_fault(&mut self) -> bool {
        if let Some(status) = self.pending_status.take() {
            self.reply(&[status]);
            true
        } else if let Some(code) = self.pending_error.take() {
            self.reply(&[STATUS_ERROR, code]);
            true
        } else {
            false
        }
    }

    fn reply_ok(&mut self, payload: &[u8]) {
        let mut buf = Vec::with_capacity(1 + payload.len());
        buf.push(STATUS_OK);
        buf.extend_from_slice(payload);
        self.reply(&buf);
    }

    fn reply(&mut self, bytes: &[u8]) {
        if self.mute {
            return;
        }
        self.tx.extend(bytes);
    }

    fn handle_simple(&mut self, cmd: &[u8]) {
        if self.take_fault() {
            return;
        }
        match cmd[0] {
            CMD_INFO => {
                let identity = self.config.identity();
                self.reply_ok(&identity);
            }
            CMD_AUX_READ => {
                let levels = self.pin_levels();
                self.reply_ok(&[levels]);
            }
            CMD_AUX_WRITE => {
                let (values, mask) = (cmd[1], cmd[2]);
                self.output_latch = (self.output_latch & !mask) | (values & mask);
                self.reply_ok(&[]);
            }
            CMD_AUX_MODE => {
                let (pin, mode) = (cmd[1], cmd[2]);
                if pin >= AUX_PIN_COUNT {
                    self.reply(&[STATUS_ERROR, DeviceErrorCode::ADDRESS_OUT_OF_RANGE]);
                    return;
                }
                match AuxPinMode::from_byte(mode) {
                    Some(mode) => {
                        self.pin_modes[pin as usize] = mode;
                        self.reply_ok(&[]);
                    }
                    None => self.reply(&[STATUS_ERROR, DeviceErrorCode::OTHER]),
                }
            }
            _ => unreachable!("not a simple command"),
        }
    }

    /// Handle an SPI command, returns the number of bytes consumed or
    /// `None` if the data bytes have not all arrived yet
    fn handle_spi(&mut self) -> Option<usize> {
        let header = &self.rx[1..1 + SPI_HEADER_SIZE];
        let config = SpiConfig::unpack(header[0]);
        let speed_byte = header[1];
        let data_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let extra = u16::from_be_bytes([header[4], header[5]]) as usize;
        let max = self.config.max_transaction_size;

        // The firmware rejects the header and drops back to command mode
        let status = if data_len > max {
            Some(DeviceErrorCode::DATA_COUNT_OUT_OF_RANGE)
        } else if extra > max {
            Some(DeviceErrorCode::EXTRA_COUNT_OUT_OF_RANGE)
        } else if data_len + extra > max {
            Some(DeviceErrorCode::TOTAL_COUNT_OUT_OF_RANGE)
        } else {
            None
        };
        if let Some(code) = status {
            log::debug!("dummy: Rejecting SPI header, error {}", code);
            self.reply(&[STATUS_ERROR, code]);
            return Some(1 + SPI_HEADER_SIZE);
        }

        let frame_len = 1 + SPI_HEADER_SIZE + data_len;
        if self.rx.len() < frame_len {
            return None;
        }

        if self.take_fault() {
            return Some(frame_len);
        }

        let mut buf = vec![0u8; data_len + extra];
        buf[..data_len].copy_from_slice(&self.rx[1 + SPI_HEADER_SIZE..frame_len]);
        let mosi = buf.clone();

        self.device.transfer(config.cs, config.mode, &mut buf);
        log::trace!(
            "dummy: SPI cs={} mode={} speed byte {}, {} byte(s)",
            config.cs,
            config.mode.bits(),
            speed_byte,
            buf.len()
        );
        self.transactions.push(SpiRecord {
            cs: config.cs,
            mode: config.mode,
            speed_byte,
            read: config.read,
            mosi,
        });

        let count = if config.read { buf.len() } else { 0 };
        let mut payload = Vec::with_capacity(SPI_COUNT_SIZE + count);
        payload.extend_from_slice(&(count as u16).to_be_bytes());
        payload.extend_from_slice(&buf[..count]);
        self.reply_ok(&payload);

        Some(frame_len)
    }
}

impl Default for DummyAdapter {
    fn default() -> Self {
        Self::new_default()
    }
}

impl Transport for DummyAdapter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.written.extend_from_slice(data);
        self.rx.extend_from_slice(data);
        self.process();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.tx.len());
        for (dst, src) in buf.iter_mut().zip(self.tx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<()> {
        self.tx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiadapter_link::{AdapterError, AdapterLink, ErrorKind, LinkOptions, ProtocolVersion};
    use std::time::Duration;

    fn fast_options() -> LinkOptions {
        LinkOptions {
            handshake_cooldown: Duration::ZERO,
            ..Default::default()
        }
    }

    fn open(adapter: DummyAdapter) -> AdapterLink<DummyAdapter> {
        AdapterLink::open(adapter, &fast_options()).unwrap()
    }

    #[test]
    fn test_end_to_end_transaction() {
        let device = |_cs: u8, _mode: SpiMode, buf: &mut [u8]| {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = 0xA0 + i as u8;
            }
        };
        let mut link = open(DummyAdapter::new_default().with_device(device));
        assert_eq!(link.info().raw, [b'S', b'P', b'I', 0x03, 0, 0, 0]);
        link.transport_mut().clear_written();

        let data = [0x11, 0x22, 0x33];
        let xfer = SpiTransfer::new(&data)
            .extra_bytes(2)
            .cs(0)
            .mode(SpiMode::Mode0)
            .speed_hz(100_000)
            .read(true);
        let miso = link.send(&xfer).unwrap();
        assert_eq!(miso, [0xA0, 0xA1, 0xA2, 0xA3, 0xA4]);

        let adapter = link.transport();
        assert_eq!(
            adapter.written(),
            [b's', 0b10000, 4, 0, 3, 0, 2, 0x11, 0x22, 0x33]
        );
        let record = adapter.transactions().last().unwrap();
        assert_eq!(record.mosi, [0x11, 0x22, 0x33, 0x00, 0x00]);
        assert_eq!(record.speed_byte, 4);
        assert_eq!(adapter.pending_reply_len(), 0);
    }

    #[test]
    fn test_loopback_and_write_only() {
        let mut link = open(DummyAdapter::new_default());
        let data: Vec<u8> = (0..=255).collect();

        let miso = link.send(&SpiTransfer::new(&data)).unwrap();
        assert_eq!(miso, data);

        let miso = link
            .send(&SpiTransfer::new(&data).read(false).mode(SpiMode::Mode3).cs(2))
            .unwrap();
        assert!(miso.is_empty());

        let adapter = link.into_inner();
        let record = adapter.transactions().last().unwrap();
        assert_eq!(record.cs, 2);
        assert_eq!(record.mode, SpiMode::Mode3);
        assert!(!record.read);
        assert_eq!(adapter.pending_reply_len(), 0);
    }

    #[test]
    fn test_v4_adapter_allows_larger_transactions() {
        let mut link = open(DummyAdapter::new(DummyConfig::v4()));
        assert_eq!(link.version(), ProtocolVersion::V4);
        assert_eq!(link.max_transaction_size(), 1024);

        let data = vec![0x5A; 1000];
        let miso = link.send(&SpiTransfer::new(&data).extra_bytes(24)).unwrap();
        assert_eq!(miso.len(), 1024);
        assert!(miso[1000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_firmware_rejects_oversize_header() {
        // Adapter claims version 4 but only has a 256-byte buffer
        let config = DummyConfig {
            version: 0x04,
            max_transaction_size: 256,
            ..Default::default()
        };
        let mut link = open(DummyAdapter::new(config));

        let data = vec![0x00; 300];
        let err = link.send(&SpiTransfer::new(&data)).unwrap_err();
        assert_eq!(
            err.device_code(),
            Some(DeviceErrorCode::DATA_COUNT_OUT_OF_RANGE)
        );
    }

    #[test]
    fn test_device_error() {
        let mut link = open(DummyAdapter::new_default());
        link.transport_mut().inject_error(0x07);

        let data = [0x01, 0x02];
        let err = link.send(&SpiTransfer::new(&data)).unwrap_err();
        assert!(matches!(err, AdapterError::Device { code: 7, .. }));
        assert_eq!(link.transport().pending_reply_len(), 0);

        // The error is recoverable, a retry goes through
        assert_eq!(link.send(&SpiTransfer::new(&data)).unwrap(), data);
    }

    #[test]
    fn test_bad_status_byte() {
        let mut link = open(DummyAdapter::new_default());
        link.transport_mut().inject_status(0x58);

        let err = link.read_aux_pins().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        // Nothing else was sent after the bogus status byte
        assert_eq!(link.transport().pending_reply_len(), 0);
    }

    #[test]
    fn test_timeout_is_transport_error() {
        let mut link = open(DummyAdapter::new_default());
        link.transport_mut().set_mute(true);
        let err = link.write_aux_pin(4, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_identity_error_reply() {
        let mut adapter = DummyAdapter::new_default();
        adapter.inject_error(DeviceErrorCode::OTHER);
        let err = AdapterLink::open(adapter, &fast_options()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_handshake_recovers_from_bad_echo() {
        let mut adapter = DummyAdapter::new_default();
        adapter.corrupt_echoes(1);
        let link = open(adapter);
        let adapter = link.into_inner();
        // One failed probe, then a full pass of four probes, then identity
        let echoes = adapter
            .written()
            .chunks(2)
            .take_while(|c| c[0] == CMD_ECHO)
            .count();
        assert_eq!(echoes, 5);
    }

    #[test]
    fn test_handshake_gives_up() {
        let mut adapter = DummyAdapter::new_default();
        adapter.corrupt_echoes(100);
        let err = AdapterLink::open(adapter, &fast_options()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_mute_adapter_not_detected() {
        let mut adapter = DummyAdapter::new_default();
        adapter.set_mute(true);
        let err = AdapterLink::open(adapter, &fast_options()).err().unwrap();
        assert!(matches!(err, AdapterError::Connection(_)));
    }

    #[test]
    fn test_identity_mismatch() {
        let config = DummyConfig {
            version: 0x02,
            ..Default::default()
        };
        let err = AdapterLink::open(DummyAdapter::new(config), &fast_options())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_aux_mask_semantics() {
        let mut link = open(DummyAdapter::new_default());
        for pin in 0..AUX_PIN_COUNT {
            assert!(link.set_aux_pin_mode(pin, AuxPinMode::Output).unwrap());
        }

        link.write_aux_pins(0b1111_0000, 0xFF).unwrap();
        let before = link.read_aux_pins().unwrap();
        assert_eq!(before, 0b1111_0000);

        let (values, mask) = (0b0101_0101, 0b0011_1100);
        link.write_aux_pins(values, mask).unwrap();
        let after = link.read_aux_pins().unwrap();
        assert_eq!(after & !mask, before & !mask);
        assert_eq!(after & mask, values & mask);
        assert_eq!(after, 0b1101_0100);
    }

    #[test]
    fn test_aux_single_pin_helpers() {
        let mut link = open(DummyAdapter::new_default());
        assert!(link.set_aux_pin_mode(0, AuxPinMode::Output).unwrap());
        assert!(link.set_aux_pin_mode(1, AuxPinMode::InputPullup).unwrap());
        assert!(link.set_aux_pin_mode(2, AuxPinMode::InputPulldown).unwrap());

        link.write_aux_pin(0, true).unwrap();
        assert!(link.read_aux_pin(0).unwrap());
        assert!(link.read_aux_pin(1).unwrap());
        assert!(!link.read_aux_pin(2).unwrap());

        link.write_aux_pin(0, false).unwrap();
        assert!(!link.read_aux_pin(0).unwrap());

        let adapter = link.transport_mut();
        adapter.set_input_level(1, Some(false));
        adapter.set_input_level(2, Some(true));
        assert_eq!(adapter.pin_mode(1), AuxPinMode::InputPullup);
        assert!(!link.read_aux_pin(1).unwrap());
        assert!(link.read_aux_pin(2).unwrap());
    }

    #[test]
    #[should_panic(expected = "aux pin 8 out of range")]
    fn test_pin_mode_rejects_bad_pin() {
        DummyAdapter::new_default().pin_mode(8);
    }

    #[test]
    fn test_aux_mode_refused() {
        let mut link = open(DummyAdapter::new_default());
        link.transport_mut().inject_error(DeviceErrorCode::OTHER);
        assert!(!link.set_aux_pin_mode(3, AuxPinMode::Output).unwrap());
        assert_eq!(link.transport().pin_mode(3), AuxPinMode::InputPulldown);

        assert!(link.set_aux_pin_mode(3, AuxPinMode::Output).unwrap());
        assert_eq!(link.transport().pin_mode(3), AuxPinMode::Output);
    }

    #[test]
    fn test_parser_handles_split_writes() {
        let mut adapter = DummyAdapter::new_default();
        adapter.write(&[b's', 0b10000]).unwrap();
        adapter.write(&[40, 0, 2]).unwrap();
        adapter.write(&[0, 1, 0xAB]).unwrap();
        assert_eq!(adapter.pending_reply_len(), 0);
        adapter.write(&[0xCD, b'a']).unwrap();

        let mut buf = [0u8; 8];
        let n = adapter.read(&mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(buf, [b'K', 0, 3, 0xAB, 0xCD, 0x00, b'K', 0x00]);
    }

    #[test]
    fn test_unknown_command_ignored() {
        let mut adapter = DummyAdapter::new_default();
        adapter.write(&[b'x', b'e', 0x42]).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(adapter.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0x42);
    }
}
