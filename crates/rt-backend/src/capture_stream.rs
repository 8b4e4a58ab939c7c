//! `CaptureStream`: symmetric to [`crate::PlaybackStream`] but feeds a ring
//! buffer instead of calling a render function.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use libspa::param::audio::{AudioFormat, AudioInfoRaw};
use libspa::pod::serialize::PodSerializer;
use libspa::pod::{Object, Pod, Value};
use libspa::utils::{Direction, SpaTypes};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use pipewire::context::Context;
use pipewire::core::Core;
use pipewire::properties::properties;
use pipewire::spa::param::ParamType;
use pipewire::stream::{Stream, StreamFlags, StreamListener, StreamState};
use pipewire::thread_loop::ThreadLoop;

use rt_core::{BackendError, BackendResult, Channels};

use crate::device::DeviceList;
use crate::playback_stream::StreamRequest;
use crate::ring_buffer::{sized_for, RingBuffer};
use crate::{MAX_UPDATE_SIZE, MIN_UPDATE_SIZE};

const MONITOR_PREFIX: &str = "Monitor of ";

struct StateSync {
    state: Mutex<Option<StreamState>>,
    condvar: Condvar,
}

impl StateSync {
    fn new() -> Self {
        Self { state: Mutex::new(None), condvar: Condvar::new() }
    }

    fn set(&self, state: StreamState) {
        *self.state.lock() = Some(state);
        self.condvar.notify_all();
    }

    fn wait_until(&self, mut predicate: impl FnMut(Option<StreamState>) -> bool) {
        let mut guard = self.state.lock();
        while !predicate(*guard) {
            self.condvar.wait(&mut guard);
        }
    }
}

/// Owns a capture stream and the ring buffer its process callback feeds.
pub struct CaptureStream {
    thread_loop: ThreadLoop,
    core: Core,
    stream: Option<Stream>,
    _listener: Option<StreamListener<()>>,
    state_sync: Arc<StateSync>,
    device_name: String,
    ring: Arc<RingBuffer>,
    num_channels: usize,
    frequency: AtomicU32,
    update_size: AtomicU32,
    connected: AtomicBool,
}

impl CaptureStream {
    /// Locate a target source node. A `name` of the form `"Monitor of
    /// <sink-name>"` strips the prefix and matches a non-capture node;
    /// otherwise behaves like [`crate::PlaybackStream::open`] but over
    /// capture-classified nodes.
    pub fn open(
        devices: &DeviceList,
        default_source_dev: Option<&str>,
        name: Option<&str>,
        stream_id: usize,
    ) -> BackendResult<Self> {
        let target_name = match name {
            Some(requested) => {
                if let Some(sink_name) = requested.strip_prefix(MONITOR_PREFIX) {
                    devices
                        .values()
                        .find(|d| !d.is_capture && d.dev_name == sink_name)
                        .map(|d| d.dev_name.clone())
                        .ok_or(BackendError::NoDevice)?
                } else {
                    devices
                        .values()
                        .find(|d| d.is_capture && d.dev_name == requested)
                        .map(|d| d.dev_name.clone())
                        .ok_or(BackendError::NoDevice)?
                }
            }
            None => {
                let preferred = default_source_dev.and_then(|default_name| {
                    devices.values().find(|d| d.is_capture && d.dev_name == default_name)
                });
                preferred
                    .or_else(|| devices.values().find(|d| d.is_capture))
                    .map(|d| d.dev_name.clone())
                    .ok_or(BackendError::NoDevice)?
            }
        };

        let thread_name = format!("rt-backend-capture-{stream_id}");
        let thread_loop = ThreadLoop::new(Some(&thread_name), None)
            .map_err(|e| BackendError::ServerUnavailable(e.to_string()))?;

        thread_loop.lock();
        let core = (|| -> BackendResult<Core> {
            let context = Context::new(&thread_loop)
                .map_err(|e| BackendError::ServerUnavailable(e.to_string()))?;
            context
                .connect(None)
                .map_err(|e| BackendError::ServerUnavailable(e.to_string()))
        })();
        thread_loop.unlock();
        let core = core?;

        Ok(Self {
            thread_loop,
            core,
            stream: None,
            _listener: None,
            state_sync: Arc::new(StateSync::new()),
            device_name: target_name,
            ring: Arc::new(RingBuffer::new(MIN_UPDATE_SIZE as usize * 2)),
            num_channels: 2,
            frequency: AtomicU32::new(0),
            update_size: AtomicU32::new(MIN_UPDATE_SIZE),
            connected: AtomicBool::new(false),
        })
    }

    /// Destroy any prior stream, adopt the device's rate/channels (unless
    /// `request` overrides it), size the ring buffer, and connect a fresh
    /// inactive stream").
    pub fn reset(
        &mut self,
        device_rate: u32,
        device_channels: Channels,
        request: StreamRequest,
    ) -> BackendResult<()> {
        self.thread_loop.lock();
        self.destroy_stream_locked();

        let rate = request.frequency.unwrap_or(device_rate).max(1);
        let channels = request.channels.unwrap_or(device_channels);
        let num_channels = channels.count().unwrap_or(2) as usize;

        let previous_rate = self.frequency.load(Ordering::Relaxed);
        let update_size = if previous_rate > 0 {
            let scaled = (self.update_size.load(Ordering::Relaxed) as u64 * rate as u64
                / previous_rate as u64) as u32;
            scaled.clamp(MIN_UPDATE_SIZE, MAX_UPDATE_SIZE)
        } else {
            self.update_size.load(Ordering::Relaxed).clamp(MIN_UPDATE_SIZE, MAX_UPDATE_SIZE)
        };
        self.update_size.store(update_size, Ordering::Relaxed);
        self.frequency.store(rate, Ordering::Relaxed);
        self.num_channels = num_channels;
        self.ring = Arc::new(sized_for(rate, 2 * update_size, num_channels));

        let props = properties! {
            "media.type" => "Audio",
            "media.category" => "Capture",
            "media.role" => "Production",
            "node.name" => format!("rt-backend-capture-{}", self.device_name),
            "target.object" => self.device_name.clone(),
        };

        let stream = Stream::new(&self.core, "rt-backend-capture", props)
            .map_err(|e| BackendError::DeviceError(e.to_string()));
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                self.thread_loop.unlock();
                return Err(e);
            }
        };

        let state_sync = Arc::clone(&self.state_sync);
        let ring = Arc::clone(&self.ring);

        let listener = stream
            .add_local_listener()
            .state_changed(move |_stream, _old, new, _error| {
                state_sync.set(new);
            })
            .process(move |stream, _user_data| {
                process_capture(stream, &ring, num_channels);
            })
            .register()
            .map_err(|e| BackendError::DeviceError(e.to_string()));
        let listener = match listener {
            Ok(l) => l,
            Err(e) => {
                self.thread_loop.unlock();
                return Err(e);
            }
        };

        let format_pod = build_audio_format_pod(rate, num_channels as u32);
        let connect_result = format_pod.and_then(|bytes| {
            let mut params = [Pod::from_bytes(&bytes).ok_or_else(|| {
                BackendError::PodParseError("failed to build format pod".into())
            })?];
            stream
                .connect(
                    Direction::Input,
                    None,
                    StreamFlags::AUTOCONNECT
                        | StreamFlags::INACTIVE
                        | StreamFlags::MAP_BUFFERS
                        | StreamFlags::RT_PROCESS,
                    &mut params,
                )
                .map_err(|e| BackendError::DeviceError(e.to_string()))
        });

        if let Err(e) = connect_result {
            self.thread_loop.unlock();
            return Err(e);
        }

        self.stream = Some(stream);
        self._listener = Some(listener);

        self.state_sync.wait_until(|state| {
            matches!(state, Some(StreamState::Paused) | Some(StreamState::Error(_)))
        });
        let reached_paused =
            matches!(*self.state_sync.state.lock(), Some(StreamState::Paused));
        self.thread_loop.unlock();

        if !reached_paused {
            warn!("capture stream for {} did not reach Paused state", self.device_name);
            return Err(BackendError::DeviceError(
                "stream did not reach Paused state".into(),
            ));
        }

        debug!(
            "capture stream for {} connected at {rate} Hz, {num_channels} channels, update_size {update_size}, ring capacity {}",
            self.device_name,
            self.ring.capacity()
        );
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    pub fn start(&self) -> BackendResult<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(BackendError::DeviceError("stream not connected".into()));
        };

        self.thread_loop.lock();
        let result = stream.set_active(true).map_err(|e| BackendError::DeviceError(e.to_string()));
        if result.is_ok() {
            self.state_sync
                .wait_until(|state| !matches!(state, Some(StreamState::Paused) | None));
        }
        self.thread_loop.unlock();
        result
    }

    pub fn stop(&self) -> BackendResult<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(BackendError::DeviceError("stream not connected".into()));
        };

        self.thread_loop.lock();
        let result = stream.set_active(false).map_err(|e| BackendError::DeviceError(e.to_string()));
        if result.is_ok() {
            self.state_sync.wait_until(|state| !matches!(state, Some(StreamState::Streaming)));
        }
        self.thread_loop.unlock();
        result
    }

    /// Frames (not raw samples) currently readable without underrunning.
    pub fn available_samples(&self) -> usize {
        self.ring.available_read() / self.num_channels.max(1)
    }

    /// Read `n` frames of interleaved samples into `buf`. Caller must
    /// ensure `n <= available_samples()`.
    pub fn capture_samples(&self, buf: &mut [f32], n: usize) -> usize {
        let samples_wanted = n * self.num_channels;
        let slice = &mut buf[..samples_wanted.min(buf.len())];
        self.ring.pop(slice) / self.num_channels.max(1)
    }

    fn destroy_stream_locked(&mut self) {
        self._listener = None;
        if let Some(stream) = self.stream.take() {
            let _ = stream.disconnect();
        }
        *self.state_sync.state.lock() = None;
        self.connected.store(false, Ordering::Release);
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.thread_loop.lock();
        self.destroy_stream_locked();
        self.thread_loop.stop();
        self.thread_loop.unlock();
    }
}

/// Writes interleaved capture samples into the ring buffer.
fn process_capture(stream: &Stream, ring: &Arc<RingBuffer>, num_channels: usize) {
    let Some(mut buffer) = stream.dequeue_buffer() else {
        return;
    };

    let datas = buffer.datas_mut();
    let Some(plane) = datas.first_mut() else {
        return;
    };

    let offset = plane.chunk().offset() as usize;
    let size = plane.chunk().size() as usize;

    let Some(bytes) = plane.data() else {
        return;
    };

    let sample_bytes = std::mem::size_of::<f32>();
    let start = offset / sample_bytes;
    let count = size / sample_bytes;
    if count == 0 || (start + count) * sample_bytes > bytes.len() {
        return;
    }

    let samples: &[f32] =
        unsafe { std::slice::from_raw_parts(bytes.as_ptr().add(offset) as *const f32, count) };
    ring.push(samples);
    let _ = num_channels;
}

fn build_audio_format_pod(rate: u32, channels: u32) -> BackendResult<Vec<u8>> {
    let mut info = AudioInfoRaw::new();
    info.set_format(AudioFormat::F32P);
    info.set_rate(rate);
    info.set_channels(channels);

    let value = Value::Object(Object {
        type_: SpaTypes::ObjectParamFormat.as_raw(),
        id: ParamType::EnumFormat.as_raw(),
        properties: info.into(),
    });

    PodSerializer::serialize(std::io::Cursor::new(Vec::new()), &value)
        .map(|(cursor, _)| cursor.into_inner())
        .map_err(|_| BackendError::PodParseError("failed to serialize audio format".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_samples_reports_whole_frames() {
        let ring = RingBuffer::new(16);
        ring.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        // Simulate available_samples()'s frame division directly, since
        // constructing a full CaptureStream needs a live server.
        let num_channels = 2;
        assert_eq!(ring.available_read() / num_channels, 3);
    }
}
