//! `NodeProxy`: tracks one server node's info and negotiated format
//!.

use parking_lot::Mutex;
use pipewire::node::{Node, NodeInfoRef, NodeListener};
use pipewire::registry::Registry;
use pipewire::spa::param::ParamType;
use std::sync::Arc;

use libspa::param::format::FormatProperties;
use libspa::pod::deserialize::PodDeserializer;
use libspa::pod::{Object, Value, ValueArray};
use libspa::utils::{Choice, ChoiceEnum, ChoiceFlags, ChoiceValue};

use rt_core::{BackendError, BackendResult, Channels};

use crate::device::{match_position_mask, DeviceList, DeviceNode};
use crate::pod::PodValue;
use crate::{MAX_OUTPUT_RATE, MIN_OUTPUT_RATE};

#[derive(Debug, Clone, Default)]
struct NodeState {
    media_class: Option<String>,
    is_headphones: bool,
    name: Option<String>,
    dev_name: Option<String>,
    sample_rate: u32,
    channels: Channels,
    removed: bool,
}

/// A bound proxy for one server node, kept alive for the lifetime of the
/// subscription.
pub struct NodeProxy {
    id: u32,
    _node: Node,
    _listener: NodeListener,
    state: Arc<Mutex<NodeState>>,
}

impl NodeProxy {
    /// Bind a proxy for a `global(id, type=Node)` registry event, subscribe
    /// to `info` and `param(EnumFormat)`.
    pub fn bind(
        registry: &Registry,
        global: &pipewire::registry::GlobalObject<impl std::fmt::Debug>,
        devices: Arc<Mutex<DeviceList>>,
    ) -> BackendResult<Self> {
        let id = global.id;
        let node: Node = registry
            .bind(global)
            .map_err(|e| BackendError::DeviceError(e.to_string()))?;

        let state = Arc::new(Mutex::new(NodeState::default()));

        let listener = {
            let state_for_info = Arc::clone(&state);
            let state_for_param = Arc::clone(&state);
            let devices_for_info = Arc::clone(&devices);
            let devices_for_param = Arc::clone(&devices);

            node.add_listener_local()
                .info(move |info: &NodeInfoRef| {
                    apply_info(&state_for_info, info);
                    sync_device(id, &state_for_info, &devices_for_info);
                })
                .param(move |_seq, id_, _index, _next, param| {
                    if id_ == ParamType::EnumFormat {
                        if let Some(pod) = param {
                            apply_format_param(&state_for_param, pod);
                            sync_device(id, &state_for_param, &devices_for_param);
                        }
                    }
                })
                .register()
        };

        node.subscribe_params(&[ParamType::EnumFormat]);

        Ok(Self {
            id,
            _node: node,
            _listener: listener,
            state,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_playback(&self) -> bool {
        matches!(self.state.lock().media_class.as_deref(), Some("Audio/Sink"))
    }

    pub fn is_capture(&self) -> bool {
        matches!(self.state.lock().media_class.as_deref(), Some("Audio/Source"))
    }

    pub fn is_headphones(&self) -> bool {
        self.state.lock().is_headphones
    }

    pub fn name(&self) -> Option<String> {
        self.state.lock().name.clone()
    }

    pub fn dev_name(&self) -> Option<String> {
        self.state.lock().dev_name.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.state.lock().sample_rate
    }

    pub fn channels(&self) -> Channels {
        self.state.lock().channels
    }

    /// Whether the node's `info` classified it as something other than a
    /// sink or source.
    pub fn should_be_removed(&self) -> bool {
        self.state.lock().removed
    }
}

fn apply_info(state: &Arc<Mutex<NodeState>>, info: &NodeInfoRef) {
    let mut guard = state.lock();
    let props = info.props();

    let media_class = props.and_then(|p| p.get("media.class")).map(str::to_owned);
    guard.removed = !matches!(media_class.as_deref(), Some("Audio/Sink") | Some("Audio/Source"));
    guard.media_class = media_class;

    guard.is_headphones = props
        .and_then(|p| p.get("device.form-factor"))
        .map(|f| f == "headphones" || f == "headset")
        .unwrap_or(false);

    // Display name: node.description, then node.nick, then node.name,
    // then a numbered fallback.
    guard.dev_name = props.and_then(|p| p.get("node.name")).map(str::to_owned);

    guard.name = props
        .and_then(|p| p.get("node.description"))
        .or_else(|| props.and_then(|p| p.get("node.nick")))
        .or_else(|| guard.dev_name.clone())
        .or_else(|| Some(format!("node #{}", info.id())));
}

/// Rebuild this node's entry in the shared device list from its current
/// state, or drop it if `info` classified it as neither sink nor source.
fn sync_device(id: u32, state: &Arc<Mutex<NodeState>>, devices: &Arc<Mutex<DeviceList>>) {
    let guard = state.lock();

    if guard.removed {
        devices.lock().remove(&id);
        return;
    }

    // Wait for a media.class before publishing; an unclassified node isn't
    // known to be a sink or source yet.
    let Some(media_class) = guard.media_class.as_deref() else {
        return;
    };
    let is_capture = media_class == "Audio/Source";

    devices.lock().insert(
        id,
        DeviceNode {
            id,
            name: guard.name.clone().unwrap_or_else(|| format!("node #{id}")),
            dev_name: guard.dev_name.clone().unwrap_or_default(),
            is_capture,
            is_headphones: guard.is_headphones,
            sample_rate: guard.sample_rate,
            channels: guard.channels,
        },
    );
}

fn apply_format_param(state: &Arc<Mutex<NodeState>>, pod: &libspa::pod::Pod) {
    let Some(format) = parse_format_object(pod) else {
        log::warn!("EnumFormat param did not parse as a POD object");
        return;
    };

    let mut guard = state.lock();

    if let Some(choice) = property_int_choice(&format, FormatProperties::AudioRate.as_raw()) {
        let rate_value = PodValue::from_choice(&choice);
        guard.sample_rate = rate_value.resolve_rate(MIN_OUTPUT_RATE, MAX_OUTPUT_RATE);
    }

    if let Some(positions) = property_id_array(&format, FormatProperties::AudioPosition.as_raw()) {
        if let Some(channels) = match_position_mask(&positions) {
            guard.channels = channels;
            return;
        }
    }

    if let Some(choice) = property_int_choice(&format, FormatProperties::AudioChannels.as_raw()) {
        let count = PodValue::from_choice(&choice);
        guard.channels = Channels::from_count(count_from_value(&count) as u32);
    }
}

fn count_from_value(value: &PodValue) -> i32 {
    match value {
        PodValue::None(v) => *v,
        PodValue::Range { default, .. } => *default,
        PodValue::Enum { default, .. } => *default,
    }
}

/// Deserialize a `param(EnumFormat)` POD into its underlying object form.
fn parse_format_object(pod: &libspa::pod::Pod) -> Option<Object> {
    let (_, value) = PodDeserializer::deserialize_any_from::<Value>(pod.as_bytes()).ok()?;
    match value {
        Value::Object(obj) => Some(obj),
        _ => None,
    }
}

fn property_int_choice(object: &Object, key: u32) -> Option<Choice<i32>> {
    object.properties.iter().find(|p| p.key == key).and_then(|p| match &p.value {
        Value::Choice(ChoiceValue::Int(choice)) => Some(choice.clone()),
        Value::Int(v) => Some(Choice(ChoiceFlags::empty(), ChoiceEnum::None(*v))),
        _ => None,
    })
}

/// Read an `Id` array property (the channel-position mask) as raw u32s.
fn property_id_array(object: &Object, key: u32) -> Option<Vec<u32>> {
    object.properties.iter().find(|p| p.key == key).and_then(|p| match &p.value {
        Value::ValueArray(ValueArray::Id(ids)) => {
            Some(ids.iter().map(|id| id.0).collect())
        }
        _ => None,
    })
}
