//! `EventManager`: owns the cooperative event loop and the live device
//! list.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pipewire::context::Context;
use pipewire::core::Core;
use pipewire::registry::{GlobalObject, Registry};
use pipewire::thread_loop::ThreadLoop;
use pipewire::types::ObjectType;

use rt_core::{BackendError, BackendResult};

use crate::device::DeviceList;
use crate::metadata_proxy::MetadataProxy;
use crate::node_proxy::NodeProxy;

/// State mutated only from callbacks dispatched on the loop thread; readers
/// from other threads must hold [`EventManager::lock`] first.
struct SharedState {
    node_proxies: Vec<NodeProxy>,
    metadata_proxy: Option<MetadataProxy>,
}

/// Maintains the authoritative, eventually-consistent device list and
/// default-device names by driving a dedicated thread loop connected to
/// the audio server.
pub struct EventManager {
    thread_loop: ThreadLoop,
    core: Core,
    registry: Registry,
    _registry_listener: pipewire::registry::Listener,
    _core_listener: pipewire::core::Listener,
    devices: Arc<Mutex<DeviceList>>,
    state: Arc<Mutex<SharedState>>,
    init_done: Arc<AtomicBool>,
}

impl EventManager {
    /// Create the loop, connect to the server, subscribe to registry and
    /// core events, issue an initial sync, and start the loop thread.
    pub fn init() -> BackendResult<Self> {
        let thread_loop = ThreadLoop::new(Some("rt-backend-events"), None)
            .map_err(|e| BackendError::ServerUnavailable(e.to_string()))?;

        thread_loop.lock();

        let result = (|| -> BackendResult<_> {
            let context = Context::new(&thread_loop)
                .map_err(|e| BackendError::ServerUnavailable(e.to_string()))?;
            let core = context
                .connect(None)
                .map_err(|e| BackendError::ServerUnavailable(e.to_string()))?;
            let registry = core
                .get_registry()
                .map_err(|e| BackendError::ServerUnavailable(e.to_string()))?;

            let devices = Arc::new(Mutex::new(DeviceList::new()));
            let state = Arc::new(Mutex::new(SharedState {
                node_proxies: Vec::new(),
                metadata_proxy: None,
            }));

            let init_seq = Arc::new(AtomicI32::new(0));
            let init_done = Arc::new(AtomicBool::new(false));

            let core_listener = {
                let init_seq = Arc::clone(&init_seq);
                let init_done = Arc::clone(&init_done);
                core.add_listener_local()
                    .done(move |id, seq| {
                        if id == pipewire::core::PW_ID_CORE
                            && seq.seq() == init_seq.load(Ordering::Acquire)
                        {
                            init_done.store(true, Ordering::Release);
                        }
                    })
                    .register()
            };

            let registry_listener = {
                let state = Arc::clone(&state);
                let devices = Arc::clone(&devices);
                let init_seq = Arc::clone(&init_seq);
                let core_for_sync = core.clone();
                let registry_for_bind = registry.clone();

                registry
                    .add_listener_local()
                    .global(move |global: &GlobalObject<_>| {
                        if is_interesting_global(global) {
                            if let Ok(seq) = core_for_sync.sync(0) {
                                init_seq.store(seq, Ordering::Release);
                            }
                        }
                        match global.type_ {
                            ObjectType::Node => {
                                if let Ok(proxy) =
                                    NodeProxy::bind(&registry_for_bind, global, Arc::clone(&devices))
                                {
                                    state.lock().node_proxies.push(proxy);
                                }
                            }
                            ObjectType::Metadata if is_interesting_global(global) => {
                                if let Ok(proxy) = MetadataProxy::bind(&registry_for_bind, global) {
                                    state.lock().metadata_proxy = Some(proxy);
                                }
                            }
                            _ => {}
                        }
                    })
                    .global_remove({
                        let state = Arc::clone(&state);
                        let devices = Arc::clone(&devices);
                        move |id| {
                            devices.lock().remove(&id);
                            state.lock().node_proxies.retain(|p| p.id() != id);
                        }
                    })
                    .register()
            };

            let initial_seq = core
                .sync(0)
                .map_err(|e| BackendError::ServerUnavailable(e.to_string()))?;
            init_seq.store(initial_seq, Ordering::Release);

            Ok((core, registry, registry_listener, core_listener, devices, state, init_done))
        })();

        let (core, registry, registry_listener, core_listener, devices, state, init_done) =
            match result {
                Ok(v) => v,
                Err(e) => {
                    thread_loop.unlock();
                    return Err(e);
                }
            };

        thread_loop
            .start()
            .map_err(|e| BackendError::ServerUnavailable(e.to_string()))?;
        thread_loop.unlock();

        Ok(Self {
            thread_loop,
            core,
            registry,
            _registry_listener: registry_listener,
            _core_listener: core_listener,
            devices,
            state,
            init_done,
        })
    }

    /// Acquire the loop mutex. Callers holding the lock may safely read
    /// the device list and default-device names, or issue server calls.
    pub fn lock(&self) {
        self.thread_loop.lock();
    }

    /// Release the loop mutex.
    pub fn unlock(&self) {
        self.thread_loop.unlock();
    }

    /// Block until initialization completes. Caller must already hold the
    /// lock (see [`EventManager::lock`]).
    pub fn wait_for_init(&self) {
        while !self.init_done.load(Ordering::Acquire) {
            self.thread_loop.wait();
        }
    }

    pub fn devices(&self) -> DeviceList {
        self.devices.lock().clone()
    }

    pub fn default_sink_dev(&self) -> Option<String> {
        self.state.lock().metadata_proxy.as_ref()?.default_sink_dev()
    }

    pub fn default_source_dev(&self) -> Option<String> {
        self.state.lock().metadata_proxy.as_ref()?.default_source_dev()
    }

    pub(crate) fn core(&self) -> &Core {
        &self.core
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Drop for EventManager {
    fn drop(&mut self) {
        self.thread_loop.lock();
        self.thread_loop.stop();
        self.thread_loop.unlock();
    }
}

/// Whether a registry `global` event introduces an object the manager
/// cares about: audio sink/source nodes, or the `default` metadata object.
fn is_interesting_global(global: &GlobalObject<impl std::fmt::Debug>) -> bool {
    match global.type_ {
        ObjectType::Node => global
            .props
            .as_ref()
            .and_then(|p| p.get("media.class"))
            .map(|class| class.starts_with("Audio/"))
            .unwrap_or(false),
        ObjectType::Metadata => global
            .props
            .as_ref()
            .and_then(|p| p.get("metadata.name"))
            .map(|name| name == "default")
            .unwrap_or(false),
        _ => false,
    }
}
