//! Sequence-numbered delivery of events to client channels.
//!
//! [`InputSender::send_event`] writes an event to a channel and keeps a
//! [`SendEntry`] pending until the client acknowledges its sequence id. The
//! acknowledgement side of every channel is watched on the owning thread's
//! main loop, registered through the [`ServerActionQueue`]. Outcomes reach the
//! [`InputSendObserver`]:
//!
//! - `send_succeeded` when an acknowledgement arrives,
//! - `send_failed` when a write fails or the channel is torn down,
//! - `client_blocked` whenever a send starts while the channel already has
//!   `backpressure_threshold` or more events pending. The notification is
//!   advisory and the send still goes ahead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use calloop::generic::Generic;
use calloop::{Interest, Mode, PostAction};
use tracing::{debug, error, info, warn};

use crate::error::InputError;
use crate::events::NormalizedEvent;
use crate::runtime::ServerActionQueue;

pub mod channel;
pub mod receiver;
pub mod transfer;

pub use channel::{ChannelId, InputChannel};
pub use receiver::InputReceiver;
pub use transfer::SendEntry;

use transfer::{Publish, Transfer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputResponse {
    Consumed,
    NotConsumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The client closed its end or the channel became unreadable.
    ClientDisconnected,
    /// The channel was removed by the compositor.
    ChannelRemoved,
    /// Writing the event failed; the channel stays usable.
    Transport(nix::errno::Errno),
}

/// Receives delivery outcomes. Acknowledgement and teardown notifications run
/// on the main loop thread, write failures on the sending thread.
pub trait InputSendObserver: Send + Sync {
    fn send_succeeded(&self, entry: &SendEntry, response: InputResponse);
    fn send_failed(&self, entry: &SendEntry, reason: FailureReason);
    fn client_blocked(&self, event: &NormalizedEvent, channel: ChannelId);
}

struct SenderShared {
    observer: Arc<dyn InputSendObserver>,
    queue: ServerActionQueue,
    backpressure_threshold: usize,
    transfers: Mutex<HashMap<ChannelId, Arc<Transfer>>>,
}

impl SenderShared {
    fn transfers(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelId, Arc<Transfer>>> {
        self.transfers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes the transfer for `channel` and fails everything still pending on it.
    fn tear_down(&self, channel: ChannelId, reason: FailureReason) -> Option<Arc<Transfer>> {
        let transfer = {
            let mut transfers = self.transfers();
            let transfer = transfers.remove(&channel)?;
            // Marked while the map is locked so a concurrent send cannot recreate the transfer.
            transfer.channel().mark_disconnected();
            transfer
        };
        let failed = transfer.tear_down();
        info!(
            "InputSender: Channel {} torn down ({:?}), failing {} pending events",
            channel,
            reason,
            failed.len()
        );
        for entry in failed {
            self.observer.send_failed(&entry, reason);
        }
        Some(transfer)
    }
}

/// Delivers events to channels and tracks their acknowledgements.
#[derive(Clone)]
pub struct InputSender {
    shared: Arc<SenderShared>,
}

impl InputSender {
    pub fn new(
        observer: Arc<dyn InputSendObserver>,
        queue: ServerActionQueue,
        backpressure_threshold: usize,
    ) -> Result<Self, InputError> {
        if backpressure_threshold == 0 {
            return Err(InputError::InvalidArgument(
                "backpressure threshold must be positive".to_string(),
            ));
        }
        Ok(Self {
            shared: Arc::new(SenderShared {
                observer,
                queue,
                backpressure_threshold,
                transfers: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Sends `event` on `channel` and returns the pending entry.
    ///
    /// # Errors
    ///
    /// - `ChannelDisconnected` if the channel was torn down, before or during this send.
    /// - `Transport` if the write failed. The observer has already been told
    ///   `send_failed` for the entry.
    /// - `Wire` if the event cannot be encoded.
    pub fn send_event(
        &self,
        event: NormalizedEvent,
        channel: &Arc<InputChannel>,
    ) -> Result<Arc<SendEntry>, InputError> {
        if channel.is_disconnected() {
            return Err(InputError::ChannelDisconnected(channel.id().0));
        }
        let transfer = self.transfer_for(channel)?;

        if transfer.pending_count() >= self.shared.backpressure_threshold {
            warn!(
                "InputSender: Channel {} has {} unacknowledged events",
                channel.id(),
                transfer.pending_count()
            );
            self.shared.observer.client_blocked(&event, channel.id());
        }

        match transfer.publish(event)? {
            Publish::Sent(entry) => Ok(entry),
            Publish::Failed(entry, errno) => {
                warn!(
                    "InputSender: Dropping sequence {} on channel {}: {}",
                    entry.sequence_id(),
                    channel.id(),
                    errno
                );
                self.shared.observer.send_failed(&entry, FailureReason::Transport(errno));
                Err(errno.into())
            }
            Publish::Broken(entry, errno) => {
                error!("InputSender: Writing to channel {} failed: {}", channel.id(), errno);
                self.shared
                    .observer
                    .send_failed(&entry, FailureReason::ClientDisconnected);
                self.shared.tear_down(channel.id(), FailureReason::ClientDisconnected);
                Err(InputError::ChannelDisconnected(channel.id().0))
            }
        }
    }

    /// Forgets `channel`, failing its pending entries with [`FailureReason::ChannelRemoved`].
    pub fn remove_channel(&self, channel: ChannelId) {
        let Some(transfer) = self.shared.tear_down(channel, FailureReason::ChannelRemoved) else {
            debug!("InputSender: Channel {} has no transfer to remove", channel);
            return;
        };
        self.shared.queue.enqueue(move |context| {
            if let Some(token) = transfer.take_registration() {
                context.handle.remove(token);
            }
        });
    }

    /// Number of events sent on `channel` and not yet acknowledged.
    pub fn pending_count(&self, channel: ChannelId) -> usize {
        self.shared
            .transfers()
            .get(&channel)
            .map_or(0, |transfer| transfer.pending_count())
    }

    pub fn channel_count(&self) -> usize {
        self.shared.transfers().len()
    }

    fn transfer_for(&self, channel: &Arc<InputChannel>) -> Result<Arc<Transfer>, InputError> {
        let mut transfers = self.shared.transfers();
        if channel.is_disconnected() {
            return Err(InputError::ChannelDisconnected(channel.id().0));
        }
        if let Some(transfer) = transfers.get(&channel.id()) {
            return Ok(transfer.clone());
        }
        let transfer = Arc::new(Transfer::new(channel.clone()));
        transfers.insert(channel.id(), transfer.clone());
        drop(transfers);

        debug!("InputSender: Created transfer for channel {} '{}'", channel.id(), channel.name());
        self.watch_acknowledgements(transfer.clone());
        Ok(transfer)
    }

    fn watch_acknowledgements(&self, transfer: Arc<Transfer>) {
        let shared = Arc::downgrade(&self.shared);
        self.shared.queue.enqueue(move |context| {
            if transfer.is_torn_down() {
                return;
            }
            let fd = match transfer.channel().server_fd().try_clone_to_owned() {
                Ok(fd) => fd,
                Err(e) => {
                    error!(
                        "InputSender: Cannot watch channel {}: {}",
                        transfer.channel().id(),
                        e
                    );
                    return;
                }
            };
            let source = Generic::new(fd, Interest::READ, Mode::Level);
            let watched = transfer.clone();
            let inserted = context.handle.insert_source(source, move |_, _, _| {
                let Some(shared) = shared.upgrade() else {
                    return Ok(PostAction::Remove);
                };
                if watched.is_torn_down() {
                    return Ok(PostAction::Remove);
                }
                let drained = watched.drain_acknowledgements();
                for (entry, consumed) in &drained.acknowledged {
                    let response = if *consumed {
                        InputResponse::Consumed
                    } else {
                        InputResponse::NotConsumed
                    };
                    shared.observer.send_succeeded(entry, response);
                }
                if drained.closed {
                    shared.tear_down(watched.channel().id(), FailureReason::ClientDisconnected);
                    return Ok(PostAction::Remove);
                }
                Ok(PostAction::Continue)
            });
            match inserted {
                Ok(token) => transfer.set_registration(token),
                Err(e) => error!(
                    "InputSender: Failed to watch channel {}: {}",
                    transfer.channel().id(),
                    e.error
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{KeyAction, KeyEvent, Modifiers, Timestamp};
    use crate::runtime::MainLoop;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        succeeded: Mutex<Vec<(u32, InputResponse)>>,
        failed: Mutex<Vec<(u32, FailureReason)>>,
        blocked: Mutex<usize>,
    }

    impl InputSendObserver for Recorder {
        fn send_succeeded(&self, entry: &SendEntry, response: InputResponse) {
            self.succeeded.lock().unwrap().push((entry.sequence_id(), response));
        }

        fn send_failed(&self, entry: &SendEntry, reason: FailureReason) {
            self.failed.lock().unwrap().push((entry.sequence_id(), reason));
        }

        fn client_blocked(&self, _event: &NormalizedEvent, _channel: ChannelId) {
            *self.blocked.lock().unwrap() += 1;
        }
    }

    fn key() -> NormalizedEvent {
        NormalizedEvent::key(
            Timestamp(5),
            Modifiers::empty(),
            KeyEvent {
                action: KeyAction::Down,
                key_code: 'q' as u32,
                scan_code: 16,
            },
        )
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let main_loop = MainLoop::new().unwrap();
        let result = InputSender::new(Arc::new(Recorder::default()), main_loop.queue(), 0);
        assert!(matches!(result, Err(InputError::InvalidArgument(_))));
    }

    #[test]
    fn test_acknowledgement_completes_entry() {
        let mut main_loop = MainLoop::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let sender = InputSender::new(recorder.clone(), main_loop.queue(), 4).unwrap();
        let channel = InputChannel::new("ack").unwrap();
        let receiver = channel.take_receiver().unwrap();

        let entry = sender.send_event(key(), &channel).unwrap();
        assert_eq!(entry.sequence_id(), 1);
        let (sequence_id, event) = receiver.receive().unwrap().unwrap();
        assert_eq!(sequence_id, 1);
        assert_eq!(event, key());

        receiver.finish(sequence_id, true).unwrap();
        let done = main_loop
            .run_until(Duration::from_secs(2), || !recorder.succeeded.lock().unwrap().is_empty())
            .unwrap();
        assert!(done);
        assert_eq!(*recorder.succeeded.lock().unwrap(), vec![(1, InputResponse::Consumed)]);
        assert_eq!(sender.pending_count(channel.id()), 0);
    }

    #[test]
    fn test_disconnected_channel_gets_no_new_transfer() {
        let main_loop = MainLoop::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let sender = InputSender::new(recorder.clone(), main_loop.queue(), 4).unwrap();
        let channel = InputChannel::new("late").unwrap();
        let _receiver = channel.take_receiver().unwrap();

        channel.mark_disconnected();

        assert!(matches!(
            sender.transfer_for(&channel),
            Err(InputError::ChannelDisconnected(_))
        ));
        assert_eq!(sender.channel_count(), 0);
        assert!(recorder.failed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_channel_fails_pending_entries() {
        let mut main_loop = MainLoop::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let sender = InputSender::new(recorder.clone(), main_loop.queue(), 4).unwrap();
        let channel = InputChannel::new("removed").unwrap();
        let _receiver = channel.take_receiver().unwrap();

        sender.send_event(key(), &channel).unwrap();
        sender.send_event(key(), &channel).unwrap();
        sender.remove_channel(channel.id());
        main_loop.dispatch(Some(Duration::from_millis(10))).unwrap();

        assert_eq!(
            *recorder.failed.lock().unwrap(),
            vec![(1, FailureReason::ChannelRemoved), (2, FailureReason::ChannelRemoved)]
        );
        assert_eq!(sender.channel_count(), 0);
        assert!(matches!(
            sender.send_event(key(), &channel),
            Err(InputError::ChannelDisconnected(_))
        ));
    }
}
