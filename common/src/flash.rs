use crate::error::FlashError;

/// Writable firmware storage.
///
/// A session mutably borrows its writer, so at most one session exists at a
/// time and nothing else can touch the update slot while it is open.
pub trait FlashWriter {
    type Session<'a>: FlashSession
    where
        Self: 'a;

    /// Reserves an update slot for an image of exactly `expected_size` bytes.
    fn open(&mut self, expected_size: u64) -> Result<Self::Session<'_>, FlashError>;
}

/// An image write in progress. Implementations must guarantee that a session
/// which is aborted, or dropped without [`FlashSession::commit`], never
/// becomes bootable.
pub trait FlashSession {
    /// Returns how many bytes were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, FlashError>;

    fn abort(self) -> Result<(), FlashError>;

    /// Validates the image and marks it as the next boot image.
    fn commit(self) -> Result<(), FlashError>;
}
