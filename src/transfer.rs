use crate::device::BulkWrite;
use crate::image::WireImage;
use log::{debug, trace};
use std::num::NonZeroUsize;
use std::time::Duration;
use thiserror::Error;

/// How the image is pushed to the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransferSettings {
    /// Bulk OUT endpoint address.
    pub endpoint: u8,
    /// Timeout for each chunk, not for the whole transfer.
    pub timeout: Duration,
    pub chunk_size: NonZeroUsize,
    /// Don't notify the progress observer.
    pub quiet: bool,
}

/// How far a transfer has got, reported after every accepted chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub sent: usize,
    pub total: usize,
}

impl Progress {
    /// Percentage complete, rounded down.
    pub fn percent(&self) -> u64 {
        self.sent as u64 * 100 / self.total as u64
    }
}

/// Receives a [Progress] update each time a chunk is accepted by the device.
pub trait ProgressObserver {
    fn update(&mut self, progress: Progress);
}

impl<F: FnMut(Progress)> ProgressObserver for F {
    fn update(&mut self, progress: Progress) {
        self(progress)
    }
}

/// Where a [Session] is in the transfer. `Complete` and `Failed` are terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Sending { offset: usize },
    Complete,
    Failed { offset: usize },
}

/// A single push of one image over one channel. Both are owned for the session's lifetime and
/// released when it is dropped. There is no way to resume a failed session; build a new one
/// (with a freshly opened channel) instead.
pub struct Session<C: BulkWrite> {
    channel: C,
    image: WireImage,
    settings: TransferSettings,
    state: State,
}

impl<C: BulkWrite> Session<C> {
    pub fn new(channel: C, image: WireImage, settings: TransferSettings) -> Self {
        Self {
            channel,
            image,
            settings,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn total(&self) -> usize {
        self.image.len()
    }

    /// Bytes not yet accepted by the device. A failed session counts the failed chunk as
    /// remaining.
    pub fn remaining(&self) -> usize {
        match self.state {
            State::Idle => self.total(),
            State::Sending { offset } | State::Failed { offset } => self.total() - offset,
            State::Complete => 0,
        }
    }

    /// Send the next chunk and return the resulting state. The first error moves the session
    /// to [State::Failed] for good.
    pub fn step(&mut self, observer: &mut impl ProgressObserver) -> Result<State, Error> {
        let offset = match self.state {
            State::Idle => 0,
            State::Sending { offset } => offset,
            State::Complete | State::Failed { .. } => return Err(Error::SessionFinished),
        };

        let total = self.total();
        let requested = self.settings.chunk_size.get().min(total - offset);
        let chunk = &self.image.as_bytes()[offset..offset + requested];

        let written = match self.channel.write_bulk(
            self.settings.endpoint,
            chunk,
            self.settings.timeout,
        ) {
            Ok(n) if n == requested => n,
            Ok(n) => {
                self.state = State::Failed { offset };
                return Err(Error::ShortWrite {
                    offset,
                    requested,
                    written: n,
                });
            }
            Err(rusb::Error::Timeout) => {
                self.state = State::Failed { offset };
                return Err(Error::TransferTimeout { offset });
            }
            Err(e) => {
                self.state = State::Failed { offset };
                return Err(Error::DeviceIoError { source: e, offset });
            }
        };

        let sent = offset + written;
        trace!("Sent chunk at {offset:#x} ({written} bytes)");

        self.state = if sent == total {
            State::Complete
        } else {
            State::Sending { offset: sent }
        };

        if !self.settings.quiet {
            observer.update(Progress { sent, total });
        }

        Ok(self.state)
    }

    /// Send chunks until the whole image has been accepted or one of them fails. Consumes the
    /// session, so the image and channel are released on either outcome.
    pub fn run(mut self, observer: &mut impl ProgressObserver) -> Result<(), Error> {
        debug!(
            "Sending {} bytes to endpoint {:#04x} in chunks of {}",
            self.total(),
            self.settings.endpoint,
            self.settings.chunk_size
        );

        loop {
            if self.step(observer)? == State::Complete {
                return Ok(());
            }
        }
    }
}

/// Push `image` through `channel` in one go. See [Session::run].
pub fn download(
    channel: impl BulkWrite,
    image: WireImage,
    settings: TransferSettings,
    observer: &mut impl ProgressObserver,
) -> Result<(), Error> {
    Session::new(channel, image, settings).run(observer)
}

/// All errors that can end a transfer. Each carries the offset of the chunk that failed, which
/// is also the number of bytes the device accepted before it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("USB transfer timed out after {offset} bytes")]
    TransferTimeout { offset: usize },

    #[error("USB transfer failed after {offset} bytes: device accepted {written} of {requested}")]
    ShortWrite {
        offset: usize,
        requested: usize,
        written: usize,
    },

    #[error("USB transaction error after {offset} bytes")]
    DeviceIoError { source: rusb::Error, offset: usize },

    #[error("transfer session has already finished")]
    SessionFinished,
}

impl Error {
    /// Bytes successfully sent before the failure, if the failure happened mid-transfer.
    pub fn offset(&self) -> Option<usize> {
        match *self {
            Error::TransferTimeout { offset }
            | Error::ShortWrite { offset, .. }
            | Error::DeviceIoError { offset, .. } => Some(offset),
            Error::SessionFinished => None,
        }
    }
}
