//! `PlaybackStream`: one stream bound to a playback device.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
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

use rt_core::{
    frames_to_nanos_saturating, BackendError, BackendResult, Channels, ClockLatency, ClockTime,
    Latency,
};

use crate::device::DeviceList;
use crate::{MAX_UPDATE_SIZE, MIN_UPDATE_SIZE};

/// Application-provided source of render samples, called from the
/// server's real-time thread.
///
/// Must not block, allocate, or panic: the callback runs on the audio
/// server's RT thread.
pub type RenderFn = Box<dyn FnMut(&mut [*mut f32], usize) + Send>;

/// Application-provided mixer clock.
///
/// `read()` returns `(ref_count, ticks, monotonic_nanos)`; the backend
/// retries the read until two consecutive `ref_count`s agree, the way a
/// seqlock guarantees a torn-free snapshot without blocking the writer.
pub trait MixerClock: Send + Sync {
    fn read(&self) -> (u64, i64, i64);
}

fn sample_mixer_stable(mixer: &dyn MixerClock) -> (i64, i64) {
    loop {
        let (ref_before, ticks, now) = mixer.read();
        let (ref_after, _, _) = mixer.read();
        if ref_before == ref_after {
            return (ticks, now);
        }
    }
}

/// Whether the application requested an explicit rate/channel layout
/// instead of adopting the device's preferred values.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamRequest {
    pub frequency: Option<u32>,
    pub channels: Option<Channels>,
}

struct RtState {
    render: RenderFn,
    num_channels: usize,
    update_size: Arc<AtomicU32>,
    /// Preallocated plane-pointer scratch space; never reallocated once the
    /// stream is connected.
    ptrs: Vec<*mut f32>,
}

// SAFETY: `ptrs` only ever holds pointers handed to us by the server for
// the duration of a single process call; it is touched only from the RT
// thread that owns this stream's loop.
unsafe impl Send for RtState {}

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

/// Owns a playback stream bound to one server node, the per-stream
/// cooperative loop that drives it, and the time base used for clock
/// latency reporting.
pub struct PlaybackStream {
    thread_loop: ThreadLoop,
    core: Core,
    stream: Option<Stream>,
    _listener: Option<StreamListener<()>>,
    state_sync: Arc<StateSync>,
    device_name: String,
    time_base: AtomicI64,
    frequency: AtomicU32,
    update_size: Arc<AtomicU32>,
    buffer_size: AtomicU32,
    connected: AtomicBool,
}

impl PlaybackStream {
    /// Locate and bind a target playback node.
    ///
    /// If `name` is `None`, prefers `default_sink_dev`; otherwise falls
    /// back to the first non-capture device. If `name` is given, requires
    /// an exact match on a non-capture device's `dev_name`.
    pub fn open(
        devices: &DeviceList,
        default_sink_dev: Option<&str>,
        name: Option<&str>,
        stream_id: usize,
    ) -> BackendResult<Self> {
        let target = match name {
            Some(requested) => devices
                .values()
                .find(|d| !d.is_capture && d.dev_name == requested)
                .ok_or(BackendError::NoDevice)?,
            None => {
                let preferred = default_sink_dev.and_then(|default_name| {
                    devices.values().find(|d| !d.is_capture && d.dev_name == default_name)
                });
                preferred
                    .or_else(|| devices.values().find(|d| !d.is_capture))
                    .ok_or(BackendError::NoDevice)?
            }
        };

        let device_name = target.dev_name.clone();
        let thread_name = format!("rt-backend-playback-{stream_id}");

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
            device_name,
            time_base: AtomicI64::new(0),
            frequency: AtomicU32::new(0),
            update_size: Arc::new(AtomicU32::new(MIN_UPDATE_SIZE)),
            buffer_size: AtomicU32::new(2 * MIN_UPDATE_SIZE),
            connected: AtomicBool::new(false),
        })
    }

    /// Destroy any prior stream, adopt the device's preferred rate and
    /// channel layout (unless `request` overrides it), and connect a fresh
    /// stream in an inactive state.
    pub fn reset(
        &mut self,
        device_rate: u32,
        device_channels: Channels,
        request: StreamRequest,
        render: RenderFn,
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
        self.buffer_size.store(2 * update_size, Ordering::Relaxed);
        self.frequency.store(rate, Ordering::Relaxed);

        let props = properties! {
            "media.type" => "Audio",
            "media.category" => "Playback",
            "media.role" => "Music",
            "node.name" => format!("rt-backend-playback-{}", self.device_name),
            "target.object" => self.device_name.clone(),
        };

        let stream = Stream::new(&self.core, "rt-backend-playback", props)
            .map_err(|e| BackendError::DeviceError(e.to_string()));
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                self.thread_loop.unlock();
                return Err(e);
            }
        };

        let state_sync = Arc::clone(&self.state_sync);
        let update_size_for_rt = Arc::clone(&self.update_size);
        let rt_state = Arc::new(Mutex::new(RtState {
            render,
            num_channels,
            update_size: update_size_for_rt,
            ptrs: vec![std::ptr::null_mut(); num_channels],
        }));

        let listener = stream
            .add_local_listener()
            .state_changed(move |_stream, _old, new, _error| {
                state_sync.set(new);
            })
            .process(move |stream, _user_data| {
                process_playback(stream, &rt_state);
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
                    Direction::Output,
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
            warn!("playback stream for {} did not reach Paused state", self.device_name);
            return Err(BackendError::DeviceError(
                "stream did not reach Paused state".into(),
            ));
        }

        debug!(
            "playback stream for {} connected at {rate} Hz, {num_channels} channels, update_size {update_size}",
            self.device_name
        );
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    /// Activate the stream and wait until it leaves `Paused`.
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

    /// Deactivate the stream and wait until it leaves `Streaming`.
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

    /// Compute the clock-latency report.
    ///
    /// Falls back to `buffer_size / frequency` while the stream's rate
    /// hasn't settled yet (`rate.denom < 1`).
    pub fn get_clock_latency(&self, mixer: &dyn MixerClock) -> ClockLatency {
        self.thread_loop.lock();
        let time = self.stream.as_ref().map(|s| s.time());
        self.thread_loop.unlock();

        let buffer_size = self.buffer_size.load(Ordering::Relaxed) as u64;
        let frequency = self.frequency.load(Ordering::Relaxed);

        let Some(time) = time else {
            let fallback = frames_to_nanos_saturating(buffer_size, frequency.max(1));
            return ClockLatency { clock_time: ClockTime(0), latency: Latency::from_nanos(fallback) };
        };

        if time.rate.denom < 1 {
            let fallback = frames_to_nanos_saturating(buffer_size, frequency.max(1));
            return ClockLatency { clock_time: ClockTime(time.now), latency: Latency::from_nanos(fallback) };
        }

        let (mixtime_ticks, monoclock) = sample_mixer_stable(mixer);
        let time_base = self.time_base.load(Ordering::Relaxed);

        let latency = compute_clock_latency(
            time_base,
            time.ticks as i64,
            time.rate.num as i64,
            time.rate.denom as i64,
            time.delay,
            time.now,
            mixtime_ticks,
            monoclock,
        );

        ClockLatency { clock_time: ClockTime(mixtime_ticks), latency: Latency::from_nanos(latency) }
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

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.thread_loop.lock();
        self.destroy_stream_locked();
        self.thread_loop.stop();
        self.thread_loop.unlock();
    }
}

/// The real-time process callback: dequeue a buffer, cap render length by
/// the plane's byte capacity, call the application's renderer, publish the
/// written chunk.
fn process_playback(stream: &Stream, rt_state: &Arc<Mutex<RtState>>) {
    let Some(mut buffer) = stream.dequeue_buffer() else {
        return;
    };

    let mut guard = rt_state.lock();
    let update_size = guard.update_size.load(Ordering::Relaxed) as usize;

    let datas = buffer.datas_mut();
    let n_planes = datas.len().min(guard.num_channels);
    if n_planes == 0 {
        return;
    }

    let mut length = update_size;
    for plane in datas.iter().take(n_planes) {
        let cap = (plane.maxsize() as usize / std::mem::size_of::<f32>()).max(1);
        length = length.min(cap);
    }

    for (i, plane) in datas.iter_mut().take(n_planes).enumerate() {
        guard.ptrs[i] = plane
            .data()
            .map(|bytes| bytes.as_mut_ptr() as *mut f32)
            .unwrap_or(std::ptr::null_mut());
    }

    let RtState { render, ptrs, .. } = &mut *guard;
    (render)(&mut ptrs[..n_planes], length);

    for plane in datas.iter_mut().take(n_planes) {
        let chunk = plane.chunk_mut();
        *chunk.offset_mut() = 0;
        *chunk.stride_mut() = std::mem::size_of::<f32>() as i32;
        *chunk.size_mut() = (length * std::mem::size_of::<f32>()) as u32;
    }
}

/// Build a planar-f32 `EnumFormat` POD for the given rate/channel count
/// (the standard pipewire-rs audio format negotiation idiom).
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

/// Pure clock-latency arithmetic, isolated from the pipewire glue so it can
/// be unit-tested.
///
/// All intermediate products are widened to `i128` to avoid overflowing a
/// signed 64-bit nanosecond count, then saturated back into `i64`.
#[allow(clippy::too_many_arguments)]
fn compute_clock_latency(
    time_base: i64,
    ticks: i64,
    rate_num: i64,
    rate_denom: i64,
    delay: i64,
    now: i64,
    mixtime: i64,
    monoclock: i64,
) -> i64 {
    const NANOS_PER_SEC: i128 = 1_000_000_000;

    let sec_part = (ticks as i128 / rate_denom as i128) * rate_num as i128 * NANOS_PER_SEC;
    let frac_part = ((ticks as i128 % rate_denom as i128) * rate_num as i128 * NANOS_PER_SEC)
        / rate_denom as i128;
    let curtic = time_base as i128 + sec_part + frac_part;

    let mut delay_ns = (delay as i128 * rate_num as i128 * NANOS_PER_SEC) / rate_denom as i128;

    if mixtime as i128 > curtic {
        delay_ns += mixtime as i128 - curtic;
    }
    delay_ns -= monoclock as i128 - now as i128;

    delay_ns.clamp(0, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_latency_is_never_negative() {
        let latency = compute_clock_latency(0, 48_000, 1, 48_000, 0, 0, 0, 1_000_000);
        assert!(latency >= 0);
    }

    #[test]
    fn clock_latency_adds_mixer_lead_when_mixer_is_ahead_of_curtic() {
        let base =
            compute_clock_latency(0, 0, 1, 48_000, 1024, 0, /* mixtime */ 0, /* mono */ 0);
        let ahead = compute_clock_latency(
            0, 0, 1, 48_000, 1024, 0, /* mixtime */ 5_000_000, /* mono */ 0,
        );
        assert!(ahead >= base);
    }

    #[test]
    fn clock_latency_subtracts_elapsed_wall_clock() {
        let latency =
            compute_clock_latency(0, 48_000, 1, 48_000, 0, 0, 1_000_000_000, 1_000_000_000);
        assert_eq!(latency, 0);
    }
}
