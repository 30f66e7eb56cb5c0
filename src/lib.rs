/// Tunables for a single download, with the defaults Samsung boot ROMs expect.
pub mod config;

/// Find and open the target USB device, and write to its bulk endpoint.
pub mod device;

/// Build the framed image (address/length header, payload, checksum footer) sent to the device.
pub mod image;

/// Stream a framed image to the device in bounded chunks, reporting progress.
pub mod transfer;
