// src/sender/receiver.rs
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{recv, send, MsgFlags};
use polling::{Event, Events, Poller};
use tracing::{trace, warn};

use super::channel::ChannelId;
use crate::error::InputError;
use crate::events::NormalizedEvent;
use crate::wire::{self, Message, MAX_MESSAGE_SIZE};

/// Client end of an input channel.
pub struct InputReceiver {
    channel: ChannelId,
    fd: OwnedFd,
}

impl InputReceiver {
    pub fn new(channel: ChannelId, fd: OwnedFd) -> Self {
        Self { channel, fd }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Returns the next event without blocking, or `None` when nothing is queued.
    ///
    /// # Errors
    ///
    /// `ChannelDisconnected` once the server end is closed.
    pub fn receive(&self) -> Result<Option<(u32, NormalizedEvent)>, InputError> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        loop {
            match recv(self.fd.as_raw_fd(), &mut buf, MsgFlags::MSG_DONTWAIT) {
                Ok(0) => return Err(InputError::ChannelDisconnected(self.channel.0)),
                Ok(n) => match wire::decode_message(&buf[..n])? {
                    Message::Event { sequence_id, event } => {
                        trace!("InputReceiver: Received sequence {} on channel {}", sequence_id, self.channel);
                        return Ok(Some((sequence_id, event)));
                    }
                    Message::Finished { sequence_id, .. } => {
                        warn!(
                            "InputReceiver: Unexpected acknowledgement {} on channel {}",
                            sequence_id, self.channel
                        );
                    }
                },
                Err(Errno::EAGAIN) => return Ok(None),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        }
    }

    /// Acknowledges `sequence_id`.
    pub fn finish(&self, sequence_id: u32, consumed: bool) -> Result<(), InputError> {
        let bytes = wire::encode_finished(sequence_id, consumed)?;
        send(
            self.fd.as_raw_fd(),
            &bytes,
            MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL,
        )?;
        Ok(())
    }

    /// Blocks until an event is readable or `timeout` elapses; returns whether one is.
    pub fn wait(&self, timeout: Duration) -> Result<bool, InputError> {
        let poller = Poller::new()?;
        // SAFETY: the descriptor outlives the poller, which is dropped at the end of this call.
        unsafe {
            poller.add(self.fd.as_raw_fd(), Event::readable(0))?;
        }
        let mut events = Events::new();
        let ready = poller.wait(&mut events, Some(timeout))?;
        poller.delete(self.fd.as_fd())?;
        Ok(ready > 0)
    }
}

impl AsFd for InputReceiver {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::InputChannel;

    #[test]
    fn test_empty_channel_yields_none_and_wait_times_out() {
        let channel = InputChannel::new("idle").unwrap();
        let receiver = channel.take_receiver().unwrap();
        assert_eq!(receiver.channel(), channel.id());
        assert!(receiver.receive().unwrap().is_none());
        assert!(!receiver.wait(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn test_closed_server_end_reports_disconnect() {
        let channel = InputChannel::new("closing").unwrap();
        let receiver = channel.take_receiver().unwrap();
        drop(channel);
        assert!(matches!(
            receiver.receive(),
            Err(InputError::ChannelDisconnected(_))
        ));
    }
}
