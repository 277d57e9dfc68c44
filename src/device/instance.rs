//! Subsystem instances and the handles that address them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{ScpiError, ScpiResult};
use crate::subsystem::SubsystemTemplate;

/// Placeholder values of one instance, e.g. `{source: 2, am: 1}`.
pub type Keys = BTreeMap<String, i64>;

/// Non-owning handle to an instance in a [`super::Device`] arena.
///
/// Handles are `Copy` and stay valid until the instance (or one of its
/// ancestors) is detached. A handle is only meaningful for the device that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubsystemId {
    pub(crate) device: u64,
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}.{}", self.device, self.slot, self.generation)
    }
}

/// Who owns an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    /// Mounted directly on the device.
    Device,
    /// Nested under another instance.
    Subsystem(SubsystemId),
}

/// Channels of an indexed subsystem, keyed by channel id.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCollection {
    name: String,
    channels: IndexMap<u32, SubsystemId>,
}

impl ChannelCollection {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: IndexMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, channel: u32, id: SubsystemId) {
        self.channels.insert(channel, id);
    }

    /// Attachment name of the collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle of `channel`. Never creates channels.
    pub fn channel(&self, channel: u32) -> ScpiResult<SubsystemId> {
        self.channels
            .get(&channel)
            .copied()
            .ok_or_else(|| ScpiError::ChannelNotFound {
                subsystem: self.name.clone(),
                channel,
            })
    }

    /// Channel ids in ascending order.
    pub fn channel_ids(&self) -> Vec<u32> {
        self.channels.keys().copied().collect()
    }

    /// `(channel, handle)` pairs in ascending channel order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, SubsystemId)> + '_ {
        self.channels.iter().map(|(ch, id)| (*ch, *id))
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True if the collection holds no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// A named child of a device or instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    /// Non-indexed subsystem.
    Single(SubsystemId),
    /// Indexed subsystem.
    Channels(ChannelCollection),
}

impl Attachment {
    /// The single instance; `Specification` error for a collection.
    pub fn single(&self) -> ScpiResult<SubsystemId> {
        match self {
            Attachment::Single(id) => Ok(*id),
            Attachment::Channels(c) => Err(ScpiError::spec(format!(
                "'{}' is indexed; select a channel",
                c.name()
            ))),
        }
    }

    /// Channel lookup; `Specification` error for a non-indexed subsystem.
    pub fn channel(&self, channel: u32) -> ScpiResult<SubsystemId> {
        match self {
            Attachment::Channels(c) => c.channel(channel),
            Attachment::Single(_) => Err(ScpiError::spec(format!(
                "subsystem is not indexed, cannot select channel {}",
                channel
            ))),
        }
    }

    /// The collection, if indexed.
    pub fn as_channels(&self) -> Option<&ChannelCollection> {
        match self {
            Attachment::Channels(c) => Some(c),
            Attachment::Single(_) => None,
        }
    }

    /// Every instance handle held by this attachment.
    pub fn ids(&self) -> Vec<SubsystemId> {
        match self {
            Attachment::Single(id) => vec![*id],
            Attachment::Channels(c) => c.iter().map(|(_, id)| id).collect(),
        }
    }
}

/// Where to attach a template.
#[derive(Debug, Clone)]
pub enum Target {
    /// Directly on the device.
    Device,
    /// Under one instance.
    Instance(SubsystemId),
    /// Under every channel of a collection.
    Collection(ChannelCollection),
}

impl From<SubsystemId> for Target {
    fn from(id: SubsystemId) -> Self {
        Target::Instance(id)
    }
}

impl From<ChannelCollection> for Target {
    fn from(collection: ChannelCollection) -> Self {
        Target::Collection(collection)
    }
}

/// Per-attach overrides of the template's channel defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceOptions {
    /// Channel count; template default when `None`.
    pub num_channels: Option<u32>,
    /// Numbering base; template default when `None`.
    pub zero_indexed: Option<bool>,
}

impl InstanceOptions {
    /// Override the channel count.
    pub fn channels(mut self, n: u32) -> Self {
        self.num_channels = Some(n);
        self
    }

    /// Override the numbering base.
    pub fn zero_indexed(mut self, zero_indexed: bool) -> Self {
        self.zero_indexed = Some(zero_indexed);
        self
    }
}

/// One live subsystem: a template plus the keys it was created with.
#[derive(Debug)]
pub struct SubsystemInstance {
    pub(crate) template: Arc<SubsystemTemplate>,
    pub(crate) parent: ParentRef,
    pub(crate) channel_index: Option<u32>,
    pub(crate) keys: Keys,
    pub(crate) children: IndexMap<String, Attachment>,
}

impl SubsystemInstance {
    /// Template this instance was built from.
    pub fn template(&self) -> &Arc<SubsystemTemplate> {
        &self.template
    }

    /// Subsystem name.
    pub fn name(&self) -> &str {
        self.template.name()
    }

    /// Owner of this instance.
    pub fn parent(&self) -> ParentRef {
        self.parent
    }

    /// Channel id for members of a collection.
    pub fn channel_index(&self) -> Option<u32> {
        self.channel_index
    }

    /// Inherited keys plus this instance's own index key.
    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Named child attachment.
    pub fn child(&self, name: &str) -> Option<&Attachment> {
        self.children.get(name)
    }

    /// Child attachment names in attach order.
    pub fn child_names(&self) -> Vec<&str> {
        self.children.keys().map(String::as_str).collect()
    }
}
