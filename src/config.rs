use crate::device::UsbId;
use crate::image::ImageBuilder;
use crate::transfer::TransferSettings;
use std::num::NonZeroUsize;
use std::time::Duration;

pub const DEFAULT_ADDRESS: u32 = 0xc000_8000;
pub const DEFAULT_CHUNK_SIZE: NonZeroUsize = NonZeroUsize::new(512).unwrap();
pub const DEFAULT_DEVICE: UsbId = UsbId {
    vid: 0x04e8,
    pid: 0x1234,
};
pub const DEFAULT_CONFIGURATION: u8 = 1;
pub const DEFAULT_INTERFACE: u8 = 0;
pub const DEFAULT_ENDPOINT: u8 = 0x02;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Everything needed to push one image to one device.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Address the boot loader will place the payload at.
    pub load_address: u32,
    /// Maximum number of bytes handed to a single bulk write.
    pub chunk_size: NonZeroUsize,
    pub device: UsbId,
    pub configuration: u8,
    pub interface: u8,
    pub endpoint: u8,
    /// Per-chunk bulk write timeout.
    pub timeout: Duration,
    /// Suppress progress reporting.
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            load_address: DEFAULT_ADDRESS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            device: DEFAULT_DEVICE,
            configuration: DEFAULT_CONFIGURATION,
            interface: DEFAULT_INTERFACE,
            endpoint: DEFAULT_ENDPOINT,
            timeout: DEFAULT_TIMEOUT,
            quiet: false,
        }
    }
}

impl Config {
    pub fn image_builder(&self) -> ImageBuilder {
        ImageBuilder::new(self.load_address)
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            endpoint: self.endpoint,
            timeout: self.timeout,
            chunk_size: self.chunk_size,
            quiet: self.quiet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_samsung_boot_rom() {
        let config = Config::default();
        assert_eq!(config.load_address, 0xc0008000);
        assert_eq!(config.chunk_size.get(), 512);
        assert_eq!(config.device.to_string(), "04e8:1234");
        assert_eq!(config.configuration, 1);
        assert_eq!(config.interface, 0);
        assert_eq!(config.endpoint, 2);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(!config.quiet);
    }

    #[test]
    fn settings_are_derived_from_config() {
        let config = Config {
            load_address: 0x3000_0000,
            chunk_size: NonZeroUsize::new(64).unwrap(),
            endpoint: 0x03,
            quiet: true,
            ..Config::default()
        };

        assert_eq!(config.image_builder().load_address(), 0x3000_0000);

        let settings = config.transfer_settings();
        assert_eq!(settings.endpoint, 0x03);
        assert_eq!(settings.chunk_size.get(), 64);
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert!(settings.quiet);
    }
}
