//! Mailbox session abstraction.
//!
//! The poll loop owns exactly one session and drives it synchronously from a
//! blocking worker. `email` holds the IMAP-over-TLS implementation.

pub mod email;

pub use email::ImapSession;

use crate::error::SessionError;

/// Capabilities the poll loop needs from a mailbox.
///
/// Identifiers are opaque strings; the IMAP implementation uses UIDs so
/// they survive expunges within a cycle.
pub trait MailboxSession: Send {
    /// Open a folder for the following calls.
    fn select(&mut self, mailbox: &str) -> Result<(), SessionError>;

    /// Identifiers matching an IMAP search criterion, oldest first.
    fn search(&mut self, criterion: &str) -> Result<Vec<String>, SessionError>;

    /// Full raw message bytes.
    fn fetch(&mut self, id: &str) -> Result<Vec<u8>, SessionError>;

    /// Copy to `folder`, flag the original `\Deleted`, expunge.
    fn move_to(&mut self, id: &str, folder: &str) -> Result<(), SessionError>;

    fn logout(&mut self) -> Result<(), SessionError>;
}
