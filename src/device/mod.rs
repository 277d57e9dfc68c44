//! Devices: the transport owner and the arena of subsystem instances.
//!
//! A [`Device`] owns its [`Transport`] and every [`SubsystemInstance`]
//! attached to it. Instances refer to their parent through a
//! [`SubsystemId`], a generational handle into the device arena, so the
//! ownership graph has no cycles and a detached subtree is detected on the
//! next use of any of its handles.
//!
//! # Dispatch
//!
//! Every accessor call goes through the same steps:
//!
//! 1. resolve the handle (stale link anywhere up the chain: `ParentLifetime`)
//! 2. look up the accessor for the requested direction (`NotSupported`)
//! 3. convert the value, writes only (`Conversion`)
//! 4. fill the command template with the instance keys (`Substitution`)
//! 5. one transport call (`Transport`)
//! 6. convert the reply, reads only (`Conversion`)
//!
//! Nothing is sent unless steps 1 to 4 succeed.

pub mod identity;
pub mod instance;

pub use identity::Identity;
pub use instance::{
    Attachment, ChannelCollection, InstanceOptions, Keys, ParentRef, SubsystemId,
    SubsystemInstance, Target,
};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::command::{Accessor, Operation};
use crate::error::{ScpiError, ScpiResult};
use crate::subsystem::SubsystemTemplate;
use crate::transport::Transport;
use crate::value::Value;

static NEXT_DEVICE_TAG: AtomicU64 = AtomicU64::new(1);

struct Slot {
    generation: u32,
    node: Option<SubsystemInstance>,
}

/// Root of an instance tree; owns the transport.
pub struct Device {
    tag: u64,
    transport: Box<dyn Transport>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    children: IndexMap<String, Attachment>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("tag", &self.tag)
            .field("transport", &self.transport.name())
            .field("instances", &self.live_instances())
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Device {
    /// New device with no subsystems.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    /// New device over an already boxed transport.
    pub fn from_boxed(transport: Box<dyn Transport>) -> Self {
        Self {
            tag: NEXT_DEVICE_TAG.fetch_add(1, Ordering::Relaxed),
            transport,
            slots: Vec::new(),
            free: Vec::new(),
            children: IndexMap::new(),
        }
    }

    /// The transport, for commands outside any subsystem.
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Number of live instances.
    pub fn live_instances(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    /// Subsystem mounted directly on the device.
    pub fn child(&self, name: &str) -> Option<&Attachment> {
        self.children.get(name)
    }

    /// Names of the subsystems mounted on the device, in attach order.
    pub fn child_names(&self) -> Vec<&str> {
        self.children.keys().map(String::as_str).collect()
    }

    // ---- building -------------------------------------------------------

    /// Attach `template` on the device with its default channel layout.
    pub fn mount(&mut self, template: &Arc<SubsystemTemplate>) -> ScpiResult<Attachment> {
        self.attach(Target::Device, template, InstanceOptions::default())?
            .into_iter()
            .next()
            .ok_or_else(|| ScpiError::spec(format!("nothing attached for '{}'", template.name())))
    }

    /// Instantiate `template` under `target`.
    ///
    /// Indexed templates produce a [`ChannelCollection`], numbered from 0 or
    /// 1, and every channel gets the inherited keys plus its own index key.
    /// Nested templates are attached under each new instance with their
    /// own defaults. A [`Target::Collection`] attaches once per channel and
    /// returns one attachment per channel, in channel order.
    ///
    /// `options.num_channels` is ignored for non-indexed templates.
    ///
    /// # Errors
    ///
    /// Nothing is created if any of these fail:
    ///
    /// - `Specification`: zero channels, a subsystem of the same name is
    ///   already attached under a target, or an index key of the template
    ///   is already set by an ancestor
    /// - `ParentLifetime`: a target handle is stale
    pub fn attach(
        &mut self,
        target: Target,
        template: &Arc<SubsystemTemplate>,
        options: InstanceOptions,
    ) -> ScpiResult<Vec<Attachment>> {
        let channels = options
            .num_channels
            .unwrap_or_else(|| template.default_channels());
        if template.is_indexed() && channels == 0 {
            return Err(ScpiError::spec(format!(
                "indexed subsystem '{}' needs at least one channel",
                template.name()
            )));
        }
        let zero_indexed = options
            .zero_indexed
            .unwrap_or_else(|| template.zero_indexed());

        let parents: Vec<ParentRef> = match target {
            Target::Device => vec![ParentRef::Device],
            Target::Instance(id) => vec![ParentRef::Subsystem(id)],
            Target::Collection(collection) => collection
                .iter()
                .map(|(_, id)| ParentRef::Subsystem(id))
                .collect(),
        };

        let mut inherited = Vec::with_capacity(parents.len());
        for parent in &parents {
            let (children, keys) = self.parent_view(*parent)?;
            if children.contains_key(template.name()) {
                return Err(ScpiError::spec(format!(
                    "a subsystem named '{}' is already attached to {}",
                    template.name(),
                    self.describe(*parent)
                )));
            }
            check_key_clash(template, &keys)?;
            inherited.push(keys);
        }

        let mut attached = Vec::with_capacity(parents.len());
        for (parent, keys) in parents.into_iter().zip(inherited) {
            let attachment = self.spawn(parent, &keys, template, channels, zero_indexed);
            info!(
                subsystem = template.name(),
                parent = %self.describe(parent),
                instances = attachment.ids().len(),
                "attached subsystem"
            );
            self.children_mut(parent)?
                .insert(template.name().to_string(), attachment.clone());
            attached.push(attachment);
        }
        Ok(attached)
    }

    /// Remove the attachment `name` under `parent` and destroy its subtree.
    ///
    /// Every handle into the subtree fails with `ParentLifetime` afterwards.
    pub fn detach(&mut self, parent: ParentRef, name: &str) -> ScpiResult<()> {
        let attachment = self
            .children_mut(parent)?
            .shift_remove(name)
            .ok_or_else(|| ScpiError::SubsystemNotFound(name.to_string()))?;
        let mut removed = 0;
        for id in attachment.ids() {
            removed += self.remove_subtree(id);
        }
        info!(subsystem = name, removed, "detached subsystem");
        Ok(())
    }

    fn spawn(
        &mut self,
        parent: ParentRef,
        inherited: &Keys,
        template: &Arc<SubsystemTemplate>,
        channels: u32,
        zero_indexed: bool,
    ) -> Attachment {
        if !template.is_indexed() {
            let id = self.spawn_instance(parent, None, inherited.clone(), template);
            return Attachment::Single(id);
        }

        let range = if zero_indexed {
            0..=channels.saturating_sub(1)
        } else {
            1..=channels
        };
        let mut collection = ChannelCollection::new(template.name());
        for channel in range {
            let mut keys = inherited.clone();
            keys.insert(template.index_key().to_string(), i64::from(channel));
            let id = self.spawn_instance(parent, Some(channel), keys, template);
            collection.insert(channel, id);
        }
        Attachment::Channels(collection)
    }

    fn spawn_instance(
        &mut self,
        parent: ParentRef,
        channel_index: Option<u32>,
        keys: Keys,
        template: &Arc<SubsystemTemplate>,
    ) -> SubsystemId {
        let id = self.insert(SubsystemInstance {
            template: Arc::clone(template),
            parent,
            channel_index,
            keys: keys.clone(),
            children: IndexMap::new(),
        });
        for nested in template.nested() {
            let attachment = self.spawn(
                ParentRef::Subsystem(id),
                &keys,
                nested,
                nested.default_channels(),
                nested.zero_indexed(),
            );
            if let Some(node) = self.slot_mut(id) {
                node.children.insert(nested.name().to_string(), attachment);
            }
        }
        id
    }

    // ---- arena ----------------------------------------------------------

    fn insert(&mut self, node: SubsystemInstance) -> SubsystemId {
        if let Some(slot) = self.free.pop() {
            if let Some(entry) = self.slots.get_mut(slot as usize) {
                entry.node = Some(node);
                return SubsystemId {
                    device: self.tag,
                    slot,
                    generation: entry.generation,
                };
            }
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        SubsystemId {
            device: self.tag,
            slot,
            generation: 0,
        }
    }

    fn slot_mut(&mut self, id: SubsystemId) -> Option<&mut SubsystemInstance> {
        if id.device != self.tag {
            return None;
        }
        self.slots
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    fn remove_subtree(&mut self, id: SubsystemId) -> usize {
        if self.slot_mut(id).is_none() {
            return 0;
        }
        let Some(slot) = self.slots.get_mut(id.slot as usize) else {
            return 0;
        };
        let Some(node) = slot.node.take() else {
            return 0;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot);

        let mut removed = 1;
        for attachment in node.children.values() {
            for child in attachment.ids() {
                removed += self.remove_subtree(child);
            }
        }
        removed
    }

    fn node(&self, id: SubsystemId) -> ScpiResult<&SubsystemInstance> {
        if id.device != self.tag {
            warn!(handle = %id, device = self.tag, "rejected handle from another device");
            return Err(ScpiError::ParentLifetime(format!(
                "handle {} does not belong to this device",
                id
            )));
        }
        self.slots
            .get(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
            .ok_or_else(|| {
                warn!(handle = %id, "rejected stale subsystem handle");
                ScpiError::ParentLifetime(format!("subsystem {} has been detached", id))
            })
    }

    /// Look up a live instance, checking every link up to the device.
    pub fn resolve(&self, id: SubsystemId) -> ScpiResult<&SubsystemInstance> {
        let node = self.node(id)?;
        let mut parent = node.parent;
        while let ParentRef::Subsystem(pid) = parent {
            parent = self
                .node(pid)
                .map_err(|_| {
                    ScpiError::ParentLifetime(format!(
                        "an ancestor of subsystem {} has been detached",
                        id
                    ))
                })?
                .parent;
        }
        Ok(node)
    }

    /// View of one instance for accessor calls.
    pub fn instance(&mut self, id: SubsystemId) -> ScpiResult<InstanceRef<'_>> {
        self.resolve(id)?;
        Ok(InstanceRef { device: self, id })
    }

    fn parent_view(&self, parent: ParentRef) -> ScpiResult<(&IndexMap<String, Attachment>, Keys)> {
        match parent {
            ParentRef::Device => Ok((&self.children, Keys::new())),
            ParentRef::Subsystem(id) => {
                let node = self.resolve(id)?;
                Ok((&node.children, node.keys.clone()))
            }
        }
    }

    fn children_mut(&mut self, parent: ParentRef) -> ScpiResult<&mut IndexMap<String, Attachment>> {
        match parent {
            ParentRef::Device => Ok(&mut self.children),
            ParentRef::Subsystem(id) => {
                self.resolve(id)?;
                self.slot_mut(id)
                    .map(|node| &mut node.children)
                    .ok_or_else(|| ScpiError::ParentLifetime(format!("subsystem {} has been detached", id)))
            }
        }
    }

    fn describe(&self, parent: ParentRef) -> String {
        match parent {
            ParentRef::Device => "the device".to_string(),
            ParentRef::Subsystem(id) => match self.node(id) {
                Ok(node) => match node.channel_index {
                    Some(ch) => format!("'{}[{}]'", node.name(), ch),
                    None => format!("'{}'", node.name()),
                },
                Err(_) => id.to_string(),
            },
        }
    }

    // ---- navigation -----------------------------------------------------

    /// Resolve a dotted path such as `source[2].am`.
    ///
    /// Indexed subsystems need a `[channel]` suffix, non-indexed ones must
    /// not have one.
    pub fn find(&self, path: &str) -> ScpiResult<SubsystemId> {
        let mut children = &self.children;
        let mut found = None;
        let mut walked = String::new();
        for segment in path.split('.') {
            let (name, channel) = parse_segment(segment)?;
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(name);

            let attachment = children
                .get(name)
                .ok_or_else(|| ScpiError::SubsystemNotFound(walked.clone()))?;
            let id = match channel {
                Some(ch) => attachment.channel(ch)?,
                None => attachment.single()?,
            };
            children = &self.resolve(id)?.children;
            found = Some(id);
        }
        found.ok_or_else(|| ScpiError::SubsystemNotFound(path.to_string()))
    }

    // ---- dispatch -------------------------------------------------------

    fn lookup(
        &self,
        id: SubsystemId,
        name: &str,
        operation: &'static str,
    ) -> ScpiResult<(Accessor, Keys)> {
        let node = self.resolve(id)?;
        let accessor = node
            .template
            .accessor(name)
            .cloned()
            .ok_or_else(|| ScpiError::not_supported(&format!("{}.{}", node.name(), name), operation))?;
        Ok((accessor, node.keys.clone()))
    }

    /// Query through accessor `name` of instance `id`.
    pub fn read(&mut self, id: SubsystemId, name: &str) -> ScpiResult<Value> {
        let (accessor, keys) = self.lookup(id, name, "read")?;
        let template = accessor
            .operation()
            .query_template()
            .ok_or_else(|| ScpiError::not_supported(name, "read"))?;
        let parse = accessor
            .converter()
            .query()
            .ok_or_else(|| ScpiError::not_supported(name, "read"))?;
        let command = fill(template, &keys, None)?;
        let reply = self.query_raw(&command)?;
        Ok(parse(&reply)?)
    }

    /// Write `value` through accessor `name` of instance `id`.
    pub fn write(&mut self, id: SubsystemId, name: &str, value: impl Into<Value>) -> ScpiResult<()> {
        let value = value.into();
        let (accessor, keys) = self.lookup(id, name, "write")?;
        let command = match accessor.operation() {
            Operation::Property { write, .. } | Operation::Write(write) => {
                let convert = accessor
                    .converter()
                    .write()
                    .ok_or_else(|| ScpiError::not_supported(name, "write"))?;
                let text = convert(&value)?;
                fill(write, &keys, Some(&text))?
            }
            Operation::SplitWrite { on, off } => {
                fill(if value.is_truthy() { on } else { off }, &keys, None)?
            }
            _ => return Err(ScpiError::not_supported(name, "write")),
        };
        self.write_raw(&command)
    }

    /// Send the no-argument command of action accessor `name`.
    pub fn trigger(&mut self, id: SubsystemId, name: &str) -> ScpiResult<()> {
        let (accessor, keys) = self.lookup(id, name, "trigger")?;
        let Operation::Action(template) = accessor.operation() else {
            return Err(ScpiError::not_supported(name, "trigger"));
        };
        let command = fill(template, &keys, None)?;
        self.write_raw(&command)
    }

    /// Valid keys of a choice accessor (`shape` or `shape_choices`).
    pub fn choices(&self, id: SubsystemId, name: &str) -> ScpiResult<Vec<String>> {
        let (accessor, _) = self.lookup(id, name, "choices")?;
        accessor
            .converter()
            .choices()
            .ok_or_else(|| ScpiError::not_supported(name, "choices"))
    }

    /// Accessor names of instance `id` in declaration order.
    pub fn accessor_names(&self, id: SubsystemId) -> ScpiResult<Vec<String>> {
        let node = self.resolve(id)?;
        Ok(node
            .template
            .accessor_names()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Send a literal query, bypassing subsystems.
    pub fn query_raw(&mut self, command: &str) -> ScpiResult<String> {
        debug!(transport = self.transport.name(), command, "query");
        let reply = self.transport.query(command).map_err(ScpiError::Transport)?;
        debug!(reply = %reply, "reply");
        Ok(reply)
    }

    /// Send a literal command, bypassing subsystems.
    pub fn write_raw(&mut self, command: &str) -> ScpiResult<()> {
        debug!(transport = self.transport.name(), command, "write");
        self.transport.write(command).map_err(ScpiError::Transport)
    }

    /// Query `*IDN?` and parse the reply.
    pub fn identify(&mut self) -> ScpiResult<Identity> {
        let reply = self.query_raw("*IDN?")?;
        Ok(Identity::parse(&reply)?)
    }
}

/// Borrowed view of one instance.
///
/// Holds the device mutably, so it is short-lived: take one per batch of
/// accessor calls.
pub struct InstanceRef<'a> {
    device: &'a mut Device,
    id: SubsystemId,
}

impl InstanceRef<'_> {
    /// Handle of the viewed instance.
    pub fn id(&self) -> SubsystemId {
        self.id
    }

    /// Query through accessor `name`.
    pub fn read(&mut self, name: &str) -> ScpiResult<Value> {
        self.device.read(self.id, name)
    }

    /// Write through accessor `name`.
    pub fn write(&mut self, name: &str, value: impl Into<Value>) -> ScpiResult<()> {
        self.device.write(self.id, name, value)
    }

    /// Fire action accessor `name`.
    pub fn trigger(&mut self, name: &str) -> ScpiResult<()> {
        self.device.trigger(self.id, name)
    }

    /// Valid keys of choice accessor `name`.
    pub fn choices(&self, name: &str) -> ScpiResult<Vec<String>> {
        self.device.choices(self.id, name)
    }

    /// Accessor names in declaration order.
    pub fn accessor_names(&self) -> ScpiResult<Vec<String>> {
        self.device.accessor_names(self.id)
    }

    /// Channel id, for members of a collection.
    pub fn channel_index(&self) -> ScpiResult<Option<u32>> {
        Ok(self.device.resolve(self.id)?.channel_index())
    }

    /// Keys used to fill command templates.
    pub fn keys(&self) -> ScpiResult<Keys> {
        Ok(self.device.resolve(self.id)?.keys().clone())
    }

    /// Named child attachment.
    pub fn child(&self, name: &str) -> ScpiResult<Attachment> {
        self.device
            .resolve(self.id)?
            .child(name)
            .cloned()
            .ok_or_else(|| ScpiError::SubsystemNotFound(name.to_string()))
    }
}

fn check_key_clash(template: &SubsystemTemplate, keys: &Keys) -> ScpiResult<()> {
    if template.is_indexed() && keys.contains_key(template.index_key()) {
        return Err(ScpiError::spec(format!(
            "index key '{}' of subsystem '{}' is already set by an ancestor",
            template.index_key(),
            template.name()
        )));
    }
    template
        .nested()
        .try_for_each(|nested| check_key_clash(nested, keys))
}

fn parse_segment(segment: &str) -> ScpiResult<(&str, Option<u32>)> {
    let segment = segment.trim();
    let (name, channel) = match segment.strip_suffix(']').and_then(|s| s.split_once('[')) {
        Some((name, index)) => {
            let channel = index.trim().parse::<u32>().map_err(|_| {
                ScpiError::spec(format!("invalid channel '{}' in path segment '{}'", index, segment))
            })?;
            (name, Some(channel))
        }
        None => (segment, None),
    };
    if name.is_empty() || name.contains(['[', ']']) {
        return Err(ScpiError::spec(format!("invalid path segment '{}'", segment)));
    }
    Ok((name, channel))
}

/// Fill `template` with the instance keys and, for writes, the value.
fn fill(template: &str, keys: &Keys, value: Option<&str>) -> ScpiResult<String> {
    let mut vars: HashMap<String, String> = keys
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect();
    if let Some(value) = value {
        vars.insert("value".to_string(), value.to_string());
    }
    strfmt::strfmt(template, &vars).map_err(|e| ScpiError::Substitution {
        command: template.to_string(),
        detail: e.to_string(),
    })
}
