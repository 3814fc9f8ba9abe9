//! Auxiliary pin commands

use super::{CmdResult, Link};
use crate::cli::PinModeArg;
use spiadapter_link::AuxPinMode;

impl From<PinModeArg> for AuxPinMode {
    fn from(mode: PinModeArg) -> Self {
        match mode {
            PinModeArg::InputPulldown => AuxPinMode::InputPulldown,
            PinModeArg::InputPullup => AuxPinMode::InputPullup,
            PinModeArg::Output => AuxPinMode::Output,
        }
    }
}

pub fn cmd_mode(link: &mut Link, pin: u8, mode: PinModeArg) -> CmdResult {
    if !link.set_aux_pin_mode(pin, mode.into())? {
        return Err(format!("Adapter refused mode {:?} for aux pin {}", mode, pin).into());
    }
    println!("Aux pin {} set to {:?}", pin, mode);
    Ok(())
}

pub fn cmd_read(link: &mut Link, pin: Option<u8>) -> CmdResult {
    match pin {
        Some(pin) => {
            let value = link.read_aux_pin(pin)?;
            println!("{}", value as u8);
        }
        None => {
            let values = link.read_aux_pins()?;
            println!("{:#010b}", values);
        }
    }
    Ok(())
}

pub fn cmd_write(link: &mut Link, values: u8, mask: u8) -> CmdResult {
    link.write_aux_pins(values, mask)?;
    log::debug!("Wrote aux pins {:#010b} under mask {:#010b}", values, mask);
    Ok(())
}

pub fn cmd_set(link: &mut Link, pin: u8, value: bool) -> CmdResult {
    link.write_aux_pin(pin, value)?;
    Ok(())
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::commands::open_link;
    use spiadapter_link::LinkOptions;

    #[test]
    fn test_aux_commands_against_emulator() {
        let options = LinkOptions {
            handshake_cooldown: std::time::Duration::ZERO,
            ..Default::default()
        };
        let mut link = open_link("dummy", options).unwrap();
        cmd_mode(&mut link, 0, PinModeArg::Output).unwrap();
        cmd_set(&mut link, 0, true).unwrap();
        assert!(link.read_aux_pin(0).unwrap());
        cmd_write(&mut link, 0x00, 0x01).unwrap();
        cmd_read(&mut link, None).unwrap();
        cmd_read(&mut link, Some(0)).unwrap();
        assert!(!link.read_aux_pin(0).unwrap());
    }
}
