//! `MetadataProxy`: tracks the `default` metadata object's default
//! sink/source names.

use parking_lot::Mutex;
use pipewire::metadata::{Metadata, MetadataListener};
use pipewire::registry::Registry;
use std::sync::Arc;

use rt_core::{BackendError, BackendResult};

const KEY_DEFAULT_SINK: &str = "default.audio.sink";
const KEY_DEFAULT_SOURCE: &str = "default.audio.source";
const TYPE_JSON: &str = "Spa:String:JSON";

#[derive(Default)]
struct MetadataState {
    default_sink_dev: Option<String>,
    default_source_dev: Option<String>,
}

/// Watches the `default` metadata object for default-device changes.
pub struct MetadataProxy {
    _metadata: Metadata,
    _listener: MetadataListener,
    state: Arc<Mutex<MetadataState>>,
}

impl MetadataProxy {
    pub fn bind(
        registry: &Registry,
        global: &pipewire::registry::GlobalObject<impl std::fmt::Debug>,
    ) -> BackendResult<Self> {
        let metadata: Metadata = registry
            .bind(global)
            .map_err(|e| BackendError::DeviceError(e.to_string()))?;

        let state = Arc::new(Mutex::new(MetadataState::default()));

        let listener = {
            let state = Arc::clone(&state);
            metadata
                .add_listener_local()
                .property(move |subject, key, type_, value| {
                    handle_property(&state, subject, key, type_, value);
                    0
                })
                .register()
        };

        Ok(Self {
            _metadata: metadata,
            _listener: listener,
            state,
        })
    }

    pub fn default_sink_dev(&self) -> Option<String> {
        self.state.lock().default_sink_dev.clone()
    }

    pub fn default_source_dev(&self) -> Option<String> {
        self.state.lock().default_source_dev.clone()
    }
}

/// `subject` is the metadata object's own id (the core) for global
/// defaults; only `key`s we recognize are handled, everything else is
/// ignored.
fn handle_property(
    state: &Arc<Mutex<MetadataState>>,
    subject: u32,
    key: Option<&str>,
    type_: Option<&str>,
    value: Option<&str>,
) {
    if subject != pipewire::core::PW_ID_CORE {
        return;
    }

    let target = match key {
        Some(KEY_DEFAULT_SINK) => Target::Sink,
        Some(KEY_DEFAULT_SOURCE) => Target::Source,
        _ => return,
    };

    let name = match type_ {
        None => None,
        Some(TYPE_JSON) => value.and_then(parse_default_device_name),
        Some(_) => return,
    };

    let mut guard = state.lock();
    match target {
        Target::Sink => guard.default_sink_dev = name,
        Target::Source => guard.default_source_dev = name,
    }
}

enum Target {
    Sink,
    Source,
}

/// Extract the `"name"` field from a default-device JSON payload, e.g.
/// `{"name":"alsa_output.pci-0000_00_1f.3.analog-stereo"}`.
fn parse_default_device_name(json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    value.get("name")?.as_str().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_out_of_default_device_json() {
        let json = r#"{"name":"alsa_output.pci-0000_00_1f.3.analog-stereo"}"#;
        assert_eq!(
            parse_default_device_name(json).as_deref(),
            Some("alsa_output.pci-0000_00_1f.3.analog-stereo")
        );
    }

    #[test]
    fn rejects_malformed_json() {
        assert_eq!(parse_default_device_name("not json"), None);
    }

    #[test]
    fn rejects_json_without_name_field() {
        assert_eq!(parse_default_device_name(r#"{"other":"x"}"#), None);
    }
}
