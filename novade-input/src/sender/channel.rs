// src/sender/channel.rs
use std::fmt;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use tracing::debug;

use super::receiver::InputReceiver;
use crate::error::InputError;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A per-surface delivery endpoint.
///
/// Backed by a `SOCK_SEQPACKET` pair so each message keeps its boundaries. The
/// server end stays here; the client end is handed to the surface's owner once.
pub struct InputChannel {
    id: ChannelId,
    name: String,
    server: OwnedFd,
    client: Mutex<Option<OwnedFd>>,
    disconnected: AtomicBool,
}

impl fmt::Debug for InputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputChannel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

impl InputChannel {
    pub fn new(name: impl Into<String>) -> Result<Arc<Self>, InputError> {
        let (server, client) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )?;
        let channel = Arc::new(Self {
            id: ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            server,
            client: Mutex::new(Some(client)),
            disconnected: AtomicBool::new(false),
        });
        debug!("InputChannel: Created channel {} '{}'", channel.id, channel.name);
        Ok(channel)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn server_fd(&self) -> BorrowedFd<'_> {
        self.server.as_fd()
    }

    /// Hands out the client end. Returns `None` once it has been taken.
    pub fn take_client_fd(&self) -> Option<OwnedFd> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Wraps the client end in an [`InputReceiver`].
    pub fn take_receiver(&self) -> Option<InputReceiver> {
        self.take_client_fd().map(|fd| InputReceiver::new(self.id, fd))
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_ids_are_distinct_and_client_end_is_taken_once() {
        let a = InputChannel::new("a").unwrap();
        let b = InputChannel::new("b").unwrap();
        assert!(b.id() > a.id());
        assert!(a.take_client_fd().is_some());
        assert!(a.take_client_fd().is_none());
        assert!(a.take_receiver().is_none());
        assert!(!a.is_disconnected());
    }
}
