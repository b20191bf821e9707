// src/device/evdev/device.rs
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use super::decoder::{FrameDecoder, InputEventRecord, INPUT_EVENT_SIZE};
use super::{open_nonblocking, DeviceNode};
use crate::config::InputConfig;
use crate::device::settings::{DeviceSettings, SharedDeviceSettings};
use crate::device::{DeviceCapability, InputDevice, InputDeviceIdentifier, InputSink};
use crate::error::InputError;
use crate::runtime::Dispatchable;
use crate::translator::{InputTranslator, TouchAxes};

const READ_BATCH: usize = 64;

struct ReaderState {
    decoder: FrameDecoder,
    translator: InputTranslator,
    sink: Option<Arc<dyn InputSink>>,
    partial: Vec<u8>,
}

/// The readable descriptor of an evdev node plus its per-device decode state.
struct EvdevSource {
    name: String,
    file: File,
    state: Mutex<ReaderState>,
}

impl EvdevSource {
    fn process(&self, state: &mut ReaderState, bytes: &[u8]) {
        state.partial.extend_from_slice(bytes);
        let complete = state.partial.len() - state.partial.len() % INPUT_EVENT_SIZE;
        let records: Vec<InputEventRecord> = state.partial[..complete]
            .chunks_exact(INPUT_EVENT_SIZE)
            .filter_map(InputEventRecord::parse)
            .collect();
        state.partial.drain(..complete);

        for record in &records {
            for raw in state.decoder.feed(record) {
                let events = state.translator.translate(&raw);
                if let Some(sink) = &state.sink {
                    for event in events {
                        sink.handle_input(event);
                    }
                }
            }
        }
    }
}

impl Dispatchable for EvdevSource {
    fn watch_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }

    fn dispatch(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buf = [0u8; INPUT_EVENT_SIZE * READ_BATCH];
        loop {
            match (&self.file).read(&mut buf) {
                Ok(0) => {
                    info!("EvdevDevice: '{}' reached end of stream", self.name);
                    return false;
                }
                Ok(n) => self.process(&mut state, &buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("EvdevDevice: Reading '{}' failed: {}", self.name, e);
                    return false;
                }
            }
        }
    }
}

/// An input device backed by a Linux evdev descriptor.
pub struct EvdevDevice {
    identifier: InputDeviceIdentifier,
    capabilities: DeviceCapability,
    settings: SharedDeviceSettings,
    source: Arc<EvdevSource>,
}

impl EvdevDevice {
    /// Opens `node` read-only and non-blocking.
    pub fn open(node: &DeviceNode, config: &InputConfig) -> Result<Self, InputError> {
        let file = open_nonblocking(&node.path)?;
        Ok(Self::from_file(
            file,
            node.identifier.clone(),
            node.capabilities(),
            node.touch_axes(),
            node.has_multitouch(),
            config,
        ))
    }

    /// Wraps an already open, non-blocking descriptor that yields `input_event` records.
    pub fn from_file(
        file: File,
        identifier: InputDeviceIdentifier,
        capabilities: DeviceCapability,
        touch_axes: Option<TouchAxes>,
        multitouch: bool,
        config: &InputConfig,
    ) -> Self {
        let settings = SharedDeviceSettings::new(DeviceSettings::for_capabilities(
            identifier.name.clone(),
            capabilities,
            config,
        ));
        let translator = InputTranslator::new(
            capabilities,
            settings.clone(),
            config.touch.target_rect(),
            touch_axes,
        );
        debug!(
            "EvdevDevice: '{}' created with {:?}",
            identifier.name, capabilities
        );
        let source = Arc::new(EvdevSource {
            name: identifier.name.clone(),
            file,
            state: Mutex::new(ReaderState {
                decoder: FrameDecoder::new(multitouch),
                translator,
                sink: None,
                partial: Vec::new(),
            }),
        });
        Self {
            identifier,
            capabilities,
            settings,
            source,
        }
    }
}

impl InputDevice for EvdevDevice {
    fn start(&self, sink: Arc<dyn InputSink>) {
        self.source.state.lock().unwrap_or_else(PoisonError::into_inner).sink = Some(sink);
        debug!("EvdevDevice: '{}' started", self.identifier.name);
    }

    fn stop(&self) {
        self.source.state.lock().unwrap_or_else(PoisonError::into_inner).sink = None;
        debug!("EvdevDevice: '{}' stopped", self.identifier.name);
    }

    fn dispatchable(&self) -> Arc<dyn Dispatchable> {
        self.source.clone()
    }

    fn identifier(&self) -> InputDeviceIdentifier {
        self.identifier.clone()
    }

    fn capabilities(&self) -> DeviceCapability {
        self.capabilities
    }

    fn settings(&self) -> SharedDeviceSettings {
        self.settings.clone()
    }
}
