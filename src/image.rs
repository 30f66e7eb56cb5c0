use byteorder::{ByteOrder, LE, WriteBytesExt};
use log::info;
use std::collections::TryReserveError;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use thiserror::Error;

/// Load address followed by total image length, both little-endian u32.
pub const HEADER_SIZE: usize = 8;
/// Little-endian u16 sum of the payload bytes.
pub const FOOTER_SIZE: usize = 2;
pub const FRAMING_SIZE: usize = HEADER_SIZE + FOOTER_SIZE;

/// A complete image as the boot loader expects it: header, payload, checksum footer. Cannot be
/// modified once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireImage {
    bytes: Vec<u8>,
}

impl WireImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total length including framing. Always the payload length plus [FRAMING_SIZE].
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Never true; the framing alone is 10 bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..self.bytes.len() - FOOTER_SIZE]
    }

    pub fn load_address(&self) -> u32 {
        LE::read_u32(&self.bytes[0..4])
    }

    pub fn declared_length(&self) -> u32 {
        LE::read_u32(&self.bytes[4..8])
    }

    pub fn checksum(&self) -> u16 {
        LE::read_u16(&self.bytes[self.bytes.len() - FOOTER_SIZE..])
    }
}

/// The sum of all bytes, modulo 2^16.
pub fn checksum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(b.into()))
}

/// Frames payloads for a fixed load address.
#[derive(Copy, Clone, Debug)]
pub struct ImageBuilder {
    load_address: u32,
}

impl ImageBuilder {
    pub fn new(load_address: u32) -> Self {
        Self { load_address }
    }

    pub fn load_address(&self) -> u32 {
        self.load_address
    }

    /// Read the whole file at `path` and frame it.
    pub fn build(&self, path: &Path) -> Result<WireImage, Error> {
        let mut file = File::open(path).map_err(|e| Error::FileIoError {
            source: e,
            action: "opening file",
        })?;
        let len = file
            .metadata()
            .map_err(|e| Error::FileIoError {
                source: e,
                action: "getting file size",
            })?
            .len();

        let image = self.build_from_reader(&mut file, len)?;

        info!("Filename : {}", path.display());
        info!("Filesize : {len} bytes");
        info!("Checksum : {:#06x}", image.checksum());

        Ok(image)
    }

    /// Frame exactly `len` bytes read from `source`. Running out early is an I/O error; anything
    /// past `len` is left unread.
    pub fn build_from_reader(&self, source: &mut impl Read, len: u64) -> Result<WireImage, Error> {
        let total = len
            .checked_add(FRAMING_SIZE as u64)
            .filter(|&t| t <= u32::MAX as u64)
            .ok_or(Error::ImageTooLarge { payload_len: len })?;
        let total_usize =
            usize::try_from(total).map_err(|_| Error::ImageTooLarge { payload_len: len })?;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(total_usize)
            .map_err(|e| Error::AllocationError {
                source: e,
                size: total_usize,
            })?;

        // Reserve the header, filled in once the payload is in place.
        bytes.resize(HEADER_SIZE, 0u8);

        let read = source
            .take(len)
            .read_to_end(&mut bytes)
            .map_err(|e| Error::FileIoError {
                source: e,
                action: "reading file",
            })?;
        if read as u64 != len {
            return Err(Error::FileIoError {
                source: std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("expected {len} bytes, got {read}"),
                ),
                action: "reading file",
            });
        }

        let sum = checksum(&bytes[HEADER_SIZE..]);

        LE::write_u32(&mut bytes[0..4], self.load_address);
        LE::write_u32(&mut bytes[4..8], total as u32);
        bytes.write_u16::<LE>(sum).unwrap(); // Writing to a Vec can't fail
        debug_assert_eq!(bytes.len(), total_usize);

        Ok(WireImage { bytes })
    }
}

/// All errors that can happen while building an image.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("file I/O error while {action}")]
    FileIoError {
        source: std::io::Error,
        action: &'static str,
    },

    #[error("cannot allocate {size} bytes for image")]
    AllocationError {
        source: TryReserveError,
        size: usize,
    },

    #[error("file too large: {payload_len} bytes plus framing overflows the 32-bit length field")]
    ImageTooLarge { payload_len: u64 },
}
