/*!
Serial device access.

Links never talk to the OS directly: they go through a [`SerialBackend`],
which the bridge binary backs with the `serialport` crate and the tests
back with [`mock::MockSerial`].
*/

use regex::Regex;
use serialport::{ClearBuffer, SerialPortType};
use std::io::{self, Read, Write};
use std::time::Duration;

/// An enumerated serial device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Path passed to `open`, e.g. `/dev/ttyACM1`
    pub path: String,
    /// Human readable description used for discovery
    pub description: String,
}

/// Settings applied when a port is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: shared::protocol::DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// Byte stream of an open port
pub trait PortIo: Read + Write + Send {}

impl<T: Read + Write + Send> PortIo for T {}

/// Source of serial devices
pub trait SerialBackend: Send + Sync {
    /// Enumerate the devices currently present
    fn list_devices(&self) -> io::Result<Vec<DeviceInfo>>;

    /// Open `path` with flushed input and output buffers
    fn open(&self, path: &str, settings: &PortSettings) -> io::Result<Box<dyn PortIo>>;
}

/// First device whose description matches `pattern`
pub fn find_device<'a>(devices: &'a [DeviceInfo], pattern: &Regex) -> Option<&'a DeviceInfo> {
    devices.iter().find(|d| pattern.is_match(&d.description))
}

/// Description of a USB serial port: product name plus the interface label.
///
/// Composite devices expose one port per interface under the same product
/// name, so the interface label is what tells them apart.
fn describe_usb(port_name: &str, product: Option<String>, interface: Option<String>) -> String {
    let product = product.unwrap_or_else(|| port_name.to_string());
    match interface {
        Some(interface) if !interface.is_empty() => format!("{} - {}", product, interface),
        _ => product,
    }
}

/// USB interface label of a tty, from sysfs
#[cfg(target_os = "linux")]
fn usb_interface(port_name: &str) -> Option<String> {
    let name = std::path::Path::new(port_name).file_name()?;
    let path = std::path::Path::new("/sys/class/tty").join(name).join("device/interface");
    let label = std::fs::read_to_string(path).ok()?;
    Some(label.trim().to_string())
}

#[cfg(not(target_os = "linux"))]
fn usb_interface(_port_name: &str) -> Option<String> {
    None
}

/// Serial ports of the host, through the `serialport` crate
pub struct SystemSerial;

impl SerialBackend for SystemSerial {
    fn list_devices(&self) -> io::Result<Vec<DeviceInfo>> {
        let ports = serialport::available_ports()?;

        Ok(ports
            .into_iter()
            .map(|port| {
                let description = match port.port_type {
                    SerialPortType::UsbPort(usb) => describe_usb(
                        &port.port_name,
                        usb.product.or(usb.manufacturer),
                        usb_interface(&port.port_name),
                    ),
                    _ => port.port_name.clone(),
                };
                DeviceInfo {
                    path: port.port_name,
                    description,
                }
            })
            .collect())
    }

    fn open(&self, path: &str, settings: &PortSettings) -> io::Result<Box<dyn PortIo>> {
        let port = serialport::new(path, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()?;
        port.clear(ClearBuffer::All)?;
        Ok(Box::new(port))
    }
}
