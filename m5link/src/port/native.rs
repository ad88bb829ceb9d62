//! [`Port`] backed by the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{INITIAL_READ_TIMEOUT, Port, PortEnumerator, PortInfo, SerialConfig},
    },
    log::trace,
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits},
    std::{
        io::{self, Read, Write},
        time::Duration,
    },
};

/// An open serial device. `None` once closed.
pub struct NativePort {
    device: Option<Box<dyn SerialPort>>,
    name: String,
}

impl NativePort {
    /// Open `config.port_name` as 8N1 without flow control.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let device = serialport::new(&config.port_name, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(INITIAL_READ_TIMEOUT)
            .open()?;
        trace!("{}: opened at {} baud", config.port_name, config.baud_rate);

        Ok(Self {
            device: Some(device),
            name: config.port_name.clone(),
        })
    }

    fn device(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.device
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(device) = self.device.as_mut() {
            device.set_timeout(timeout)?;
        }
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(device) = self.device.as_mut() {
            device.clear(ClearBuffer::Input)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("{}: DTR -> {level}", self.name);
        let device = self.device.as_mut().ok_or(Error::NotConnected)?;
        Ok(device.write_data_terminal_ready(level)?)
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("{}: RTS -> {level}", self.name);
        let device = self.device.as_mut().ok_or(Error::NotConnected)?;
        Ok(device.write_request_to_send(level)?)
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle releases the device
        self.device = None;
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.device()?.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.device()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.device()?.flush()
    }
}

/// Port listing through `serialport::available_ports`.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;
        Ok(ports.into_iter().map(port_info).collect())
    }
}

fn port_info(port: serialport::SerialPortInfo) -> PortInfo {
    let mut info = PortInfo {
        name: port.port_name,
        vid: None,
        pid: None,
        manufacturer: None,
        product: None,
        serial_number: None,
    };
    if let SerialPortType::UsbPort(usb) = port.port_type {
        info.vid = Some(usb.vid);
        info.pid = Some(usb.pid);
        info.manufacturer = usb.manufacturer;
        info.product = usb.product;
        info.serial_number = usb.serial_number;
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration doesn't panic without hardware
        let _ = NativePortEnumerator::list_ports();
    }

    #[test]
    fn test_usb_port_info_keeps_ids() {
        let info = port_info(serialport::SerialPortInfo {
            port_name: "/dev/ttyUSB0".to_string(),
            port_type: SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x10C4,
                pid: 0xEA60,
                serial_number: Some("01".to_string()),
                manufacturer: Some("Silicon Labs".to_string()),
                product: Some("CP2104".to_string()),
            }),
        });
        assert_eq!(info.vid, Some(0x10C4));
        assert_eq!(info.pid, Some(0xEA60));
        assert_eq!(info.product.as_deref(), Some("CP2104"));
        assert_eq!(info.serial_number.as_deref(), Some("01"));
    }

    #[test]
    fn test_non_usb_port_info_has_no_ids() {
        let info = port_info(serialport::SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::Unknown,
        });
        assert_eq!(info.name, "/dev/ttyS0");
        assert!(info.vid.is_none());
        assert!(info.manufacturer.is_none());
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/m5link-does-not-exist", 115200);
        assert!(NativePort::open(&config).is_err());
    }
}
