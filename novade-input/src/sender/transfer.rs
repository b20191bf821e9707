// src/sender/transfer.rs
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use calloop::RegistrationToken;
use nix::errno::Errno;
use nix::sys::socket::{recv, send, MsgFlags};
use std::os::fd::AsRawFd;
use tracing::{trace, warn};

use super::channel::{ChannelId, InputChannel};
use crate::error::InputError;
use crate::events::NormalizedEvent;
use crate::wire::{self, Message, MAX_MESSAGE_SIZE};

/// One dispatched event awaiting its acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct SendEntry {
    sequence_id: u32,
    channel: ChannelId,
    event: NormalizedEvent,
}

impl SendEntry {
    pub fn sequence_id(&self) -> u32 {
        self.sequence_id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn event(&self) -> &NormalizedEvent {
        &self.event
    }
}

/// Outcome of a publish attempt.
pub(crate) enum Publish {
    Sent(Arc<SendEntry>),
    /// The channel's buffer is full; only this entry is lost.
    Failed(Arc<SendEntry>, Errno),
    /// The peer is gone; the transfer must be torn down.
    Broken(Arc<SendEntry>, Errno),
}

/// What a drain of the acknowledgement descriptor produced.
#[derive(Default)]
pub(crate) struct Drained {
    pub acknowledged: Vec<(Arc<SendEntry>, bool)>,
    pub closed: bool,
}

struct TransferState {
    next_sequence: u32,
    pending: BTreeMap<u32, Arc<SendEntry>>,
    torn_down: bool,
    registration: Option<RegistrationToken>,
}

impl TransferState {
    /// Never yields 0 and never an id that is still pending.
    fn allocate_sequence_id(&mut self) -> u32 {
        loop {
            let id = self.next_sequence;
            self.next_sequence = match self.next_sequence.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Live delivery state of one channel.
pub(crate) struct Transfer {
    channel: Arc<InputChannel>,
    state: Mutex<TransferState>,
}

impl Transfer {
    pub fn new(channel: Arc<InputChannel>) -> Self {
        Self {
            channel,
            state: Mutex::new(TransferState {
                next_sequence: 1,
                pending: BTreeMap::new(),
                torn_down: false,
                registration: None,
            }),
        }
    }

    #[cfg(test)]
    fn starting_at(channel: Arc<InputChannel>, next_sequence: u32) -> Self {
        let transfer = Self::new(channel);
        transfer.lock().next_sequence = next_sequence;
        transfer
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channel(&self) -> &Arc<InputChannel> {
        &self.channel
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.lock().torn_down
    }

    pub fn set_registration(&self, token: RegistrationToken) {
        self.lock().registration = Some(token);
    }

    pub fn take_registration(&self) -> Option<RegistrationToken> {
        self.lock().registration.take()
    }

    /// Assigns the next sequence id, queues the entry and writes it to the channel.
    ///
    /// The write happens under the lock so channel order matches sequence order.
    pub fn publish(&self, event: NormalizedEvent) -> Result<Publish, InputError> {
        let mut state = self.lock();
        if state.torn_down {
            return Err(InputError::ChannelDisconnected(self.channel.id().0));
        }
        let sequence_id = state.allocate_sequence_id();
        let bytes = wire::encode_event(sequence_id, &event)?;
        let entry = Arc::new(SendEntry {
            sequence_id,
            channel: self.channel.id(),
            event,
        });
        state.pending.insert(sequence_id, entry.clone());

        let flags = MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL;
        match send(self.channel.server_fd().as_raw_fd(), &bytes, flags) {
            Ok(_) => {
                trace!("Transfer: Sent sequence {} on channel {}", sequence_id, self.channel.id());
                Ok(Publish::Sent(entry))
            }
            Err(errno @ (Errno::EAGAIN | Errno::ENOBUFS | Errno::EINTR)) => {
                state.pending.remove(&sequence_id);
                Ok(Publish::Failed(entry, errno))
            }
            Err(errno) => {
                state.pending.remove(&sequence_id);
                Ok(Publish::Broken(entry, errno))
            }
        }
    }

    /// Reads every available acknowledgement record.
    pub fn drain_acknowledgements(&self) -> Drained {
        let mut drained = Drained::default();
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        loop {
            match recv(self.channel.server_fd().as_raw_fd(), &mut buf, MsgFlags::MSG_DONTWAIT) {
                Ok(0) => {
                    drained.closed = true;
                    return drained;
                }
                Ok(n) => match wire::decode_message(&buf[..n]) {
                    Ok(Message::Finished { sequence_id, consumed }) => {
                        match self.lock().pending.remove(&sequence_id) {
                            Some(entry) => drained.acknowledged.push((entry, consumed)),
                            None => trace!(
                                "Transfer: Ignoring acknowledgement for unknown sequence {} on channel {}",
                                sequence_id,
                                self.channel.id()
                            ),
                        }
                    }
                    Ok(Message::Event { sequence_id, .. }) => warn!(
                        "Transfer: Client on channel {} sent an event ({}) instead of an acknowledgement",
                        self.channel.id(),
                        sequence_id
                    ),
                    Err(e) => warn!("Transfer: Malformed record on channel {}: {}", self.channel.id(), e),
                },
                Err(Errno::EAGAIN) => return drained,
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    warn!("Transfer: Reading channel {} failed: {}", self.channel.id(), errno);
                    drained.closed = true;
                    return drained;
                }
            }
        }
    }

    /// Marks the transfer dead and hands back every entry still pending.
    pub fn tear_down(&self) -> Vec<Arc<SendEntry>> {
        let mut state = self.lock();
        state.torn_down = true;
        self.channel.mark_disconnected();
        std::mem::take(&mut state.pending).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{KeyAction, KeyEvent, Modifiers, Timestamp};

    fn key(code: u32) -> NormalizedEvent {
        NormalizedEvent::key(
            Timestamp(1),
            Modifiers::empty(),
            KeyEvent {
                action: KeyAction::Down,
                key_code: code,
                scan_code: code,
            },
        )
    }

    fn sent(publish: Publish) -> Arc<SendEntry> {
        match publish {
            Publish::Sent(entry) => entry,
            _ => panic!("publish did not succeed"),
        }
    }

    #[test]
    fn test_sequence_ids_increase_and_skip_zero_on_wrap() {
        let channel = InputChannel::new("wrap").unwrap();
        let transfer = Transfer::starting_at(channel, u32::MAX - 1);
        let ids: Vec<u32> = (0..3)
            .map(|i| sent(transfer.publish(key(i)).unwrap()).sequence_id())
            .collect();
        assert_eq!(ids, vec![u32::MAX - 1, u32::MAX, 1]);
        assert_eq!(transfer.pending_count(), 3);
    }

    #[test]
    fn test_pending_id_is_not_reused_after_wrap() {
        let channel = InputChannel::new("reuse").unwrap();
        let transfer = Transfer::new(channel);
        let first = sent(transfer.publish(key(1)).unwrap());
        assert_eq!(first.sequence_id(), 1);
        transfer.lock().next_sequence = 1;
        let second = sent(transfer.publish(key(2)).unwrap());
        assert_eq!(second.sequence_id(), 2);
    }

    #[test]
    fn test_tear_down_returns_pending_and_rejects_later_sends() {
        let channel = InputChannel::new("teardown").unwrap();
        let transfer = Transfer::new(channel.clone());
        sent(transfer.publish(key(1)).unwrap());
        sent(transfer.publish(key(2)).unwrap());

        let failed = transfer.tear_down();
        assert_eq!(failed.len(), 2);
        assert!(channel.is_disconnected());
        assert!(matches!(
            transfer.publish(key(3)),
            Err(InputError::ChannelDisconnected(_))
        ));
    }
}
