use log::{debug, info, warn};
use rusb::{DeviceHandle, GlobalContext};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// A USB vendor ID and product ID pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// Parse a `VENDOR:PRODUCT` pair, both halves in hexadecimal (e.g. `04E8:1234`).
impl FromStr for UsbId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s.split_once(':').ok_or(ParseIdError::MissingSeparator)?;
        let parse = |half: &str| {
            let half = half.trim();
            let digits = half
                .strip_prefix("0x")
                .or_else(|| half.strip_prefix("0X"))
                .unwrap_or(half);
            u16::from_str_radix(digits, 16).map_err(|_| ParseIdError::BadHex(half.to_owned()))
        };

        Ok(UsbId {
            vid: parse(vid)?,
            pid: parse(pid)?,
        })
    }
}

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum ParseIdError {
    #[error("expected VENDOR:PRODUCT")]
    MissingSeparator,

    #[error("\"{0}\" is not a 16-bit hexadecimal ID")]
    BadHex(String),
}

/// The one device primitive a download needs: a blocking write to a bulk OUT endpoint. Returns
/// how many bytes the device accepted, which may be fewer than `data.len()`.
pub trait BulkWrite {
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;
}

impl<T: BulkWrite + ?Sized> BulkWrite for &mut T {
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        (**self).write_bulk(endpoint, data, timeout)
    }
}

/// An opened device with its interface claimed. The interface is released when the channel is
/// closed or dropped, whichever comes first.
pub struct UsbChannel {
    handle: DeviceHandle<GlobalContext>,
    interface: u8,
    claimed: bool,
}

impl UsbChannel {
    /// Open the first device on any bus matching `id`, select `configuration` and claim
    /// `interface`.
    pub fn open(id: UsbId, configuration: u8, interface: u8) -> Result<Self, Error> {
        let devices = rusb::devices().map_err(|e| Error::DeviceOpen {
            source: e,
            action: "enumerating USB devices",
        })?;

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!(
                        "Skipping device {:03}:{:03}: {e}",
                        device.bus_number(),
                        device.address()
                    );
                    continue;
                }
            };

            if descriptor.vendor_id() != id.vid || descriptor.product_id() != id.pid {
                continue;
            }

            info!(
                "Target USB device found at bus {:03} address {:03}",
                device.bus_number(),
                device.address()
            );

            let mut handle = device.open().map_err(|e| Error::DeviceOpen {
                source: e,
                action: "opening USB device",
            })?;

            // On failure from here on, `handle` is dropped and the device closed.
            handle
                .set_active_configuration(configuration)
                .map_err(|e| Error::DeviceOpen {
                    source: e,
                    action: "setting configuration",
                })?;
            handle
                .claim_interface(interface)
                .map_err(|e| Error::DeviceOpen {
                    source: e,
                    action: "claiming interface",
                })?;

            return Ok(Self {
                handle,
                interface,
                claimed: true,
            });
        }

        Err(Error::DeviceNotFound(id))
    }

    /// Release the claimed interface. Calling this more than once is harmless.
    pub fn close(&mut self) {
        if !self.claimed {
            return;
        }
        self.claimed = false;

        if let Err(e) = self.handle.release_interface(self.interface) {
            warn!("Failed to release interface {}: {e}", self.interface);
        }
    }
}

impl BulkWrite for UsbChannel {
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.write_bulk(endpoint, data, timeout)
    }
}

impl Drop for UsbChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Errors that can happen while getting hold of the target device.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("target USB device {0} not found")]
    DeviceNotFound(UsbId),

    #[error("USB error while {action}")]
    DeviceOpen {
        source: rusb::Error,
        action: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_displays_as_lowercase_hex() {
        let id = UsbId {
            vid: 0x04e8,
            pid: 0xABCD,
        };
        assert_eq!(id.to_string(), "04e8:abcd");
    }

    #[test]
    fn id_parses_hex_pair() {
        assert_eq!(
            "04E8:1234".parse::<UsbId>(),
            Ok(UsbId {
                vid: 0x04e8,
                pid: 0x1234
            })
        );
        assert_eq!(
            "0x5345:0x1234".parse::<UsbId>(),
            Ok(UsbId {
                vid: 0x5345,
                pid: 0x1234
            })
        );
    }

    #[test]
    fn id_rejects_malformed_input() {
        assert_eq!(
            "04e81234".parse::<UsbId>(),
            Err(ParseIdError::MissingSeparator)
        );
        assert_eq!(
            "04e8:xyz".parse::<UsbId>(),
            Err(ParseIdError::BadHex("xyz".to_owned()))
        );
        assert_eq!(
            "10000:1234".parse::<UsbId>(),
            Err(ParseIdError::BadHex("10000".to_owned()))
        );
    }
}
