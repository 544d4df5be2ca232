//! A keyed collection of items shared by a sender and a receiver.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use heapstream_wire::{is_reserved, is_valid_item_id, MAX_ADDRESS};
use tracing::{debug, trace};

use crate::descriptor::Descriptor;
use crate::dtype::DType;
use crate::error::{HeapError, Result};
use crate::heap::{FrozenHeap, RawItem};
use crate::item::Item;
use crate::ItemId;

/// What has already gone out in a heap for one item.
#[derive(Debug, Clone, Copy, Default)]
struct SentState {
    version: Option<u64>,
    descriptor: bool,
}

/// Items keyed by id.
///
/// On the send side the group also remembers, per item, which version and
/// whether the descriptor were last included in a heap; [`changed_items`]
/// compares against that. On the receive side [`update`] applies heaps.
///
/// [`changed_items`]: ItemGroup::changed_items
/// [`update`]: ItemGroup::update
#[derive(Debug, Clone, Default)]
pub struct ItemGroup {
    items: BTreeMap<ItemId, Item>,
    sent: HashMap<ItemId, SentState>,
}

impl ItemGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new item without a value.
    pub fn add_item(
        &mut self,
        id: ItemId,
        name: impl Into<String>,
        description: impl Into<String>,
        shape: Vec<u64>,
        dtype: DType,
    ) -> Result<&mut Item> {
        self.add_descriptor(Descriptor::new(id, name, description, shape, dtype))
    }

    /// Add a new item from an existing descriptor.
    pub fn add_descriptor(&mut self, descriptor: Descriptor) -> Result<&mut Item> {
        validate_descriptor(&descriptor)?;
        let id = descriptor.id;
        if self.items.contains_key(&id) {
            return Err(HeapError::DuplicateId(id));
        }

        debug!(id, name = %descriptor.name, "item added");
        self.sent.remove(&id);
        Ok(self.items.entry(id).or_insert_with(|| Item::new(descriptor)))
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(&id)
    }

    /// Look up an item by its descriptor name.
    pub fn by_name(&self, name: &str) -> Option<&Item> {
        self.items.values().find(|item| item.name() == name)
    }

    /// Items in id order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.items.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn remove(&mut self, id: ItemId) -> Option<Item> {
        self.sent.remove(&id);
        self.items.remove(&id)
    }

    /// Ids of items holding a value that no heap has carried yet, in id order.
    pub fn changed_items(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|(id, item)| {
                item.value().is_some()
                    && self.sent.get(id).and_then(|state| state.version) != Some(item.version())
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids of items whose descriptor has not been sent yet, in id order.
    pub fn unsent_descriptors(&self) -> Vec<ItemId> {
        self.items
            .keys()
            .filter(|id| !self.sent.get(id).is_some_and(|state| state.descriptor))
            .copied()
            .collect()
    }

    pub(crate) fn mark_value_sent(&mut self, id: ItemId, version: u64) {
        let sent = &mut self.sent.entry(id).or_default().version;
        *sent = Some(sent.map_or(version, |prev| prev.max(version)));
    }

    pub(crate) fn mark_descriptor_sent(&mut self, id: ItemId) {
        self.sent.entry(id).or_default().descriptor = true;
    }

    /// Apply a received heap.
    ///
    /// Descriptors are applied first, creating or replacing items, then
    /// values. The whole heap is validated before anything changes, so a
    /// malformed heap leaves the group untouched. Values for ids that were
    /// never described become raw `u8` items shaped `[len]`.
    ///
    /// Returns the ids whose values were updated, in heap order.
    pub fn update(&mut self, heap: &FrozenHeap) -> Result<Vec<ItemId>> {
        let mut descriptors: BTreeMap<ItemId, &Descriptor> = BTreeMap::new();
        for descriptor in heap.descriptors() {
            validate_descriptor(descriptor)
                .map_err(|err| HeapError::MalformedHeap(format!("heap {}: {err}", heap.cnt())))?;
            descriptors.insert(descriptor.id, descriptor);
        }

        let mut values = Vec::with_capacity(heap.items().len());
        let mut implied_len: HashMap<ItemId, usize> = HashMap::new();
        for raw in heap.items() {
            if is_reserved(raw.id) {
                trace!(id = raw.id, "ignoring protocol item in heap");
                continue;
            }
            let descriptor = descriptors
                .get(&raw.id)
                .copied()
                .or_else(|| self.items.get(&raw.id).map(Item::descriptor));
            let value = match descriptor {
                Some(descriptor) => fit_value(descriptor, raw, heap.cnt())?,
                None => {
                    let len = *implied_len.entry(raw.id).or_insert(raw.value.len());
                    if len != raw.value.len() {
                        return Err(HeapError::MalformedHeap(format!(
                            "heap {}: undescribed item 0x{:x} repeated with different lengths",
                            heap.cnt(),
                            raw.id
                        )));
                    }
                    raw.value.clone()
                }
            };
            values.push((raw.id, value));
        }

        for (id, descriptor) in descriptors {
            let unchanged = self
                .items
                .get(&id)
                .is_some_and(|item| item.descriptor() == descriptor);
            if !unchanged {
                debug!(id, name = %descriptor.name, "descriptor applied");
                self.items.insert(id, Item::new(descriptor.clone()));
            }
        }

        let mut updated = Vec::with_capacity(values.len());
        for (id, value) in values {
            let item = self.items.entry(id).or_insert_with(|| {
                let len = value.len() as u64;
                Item::new(Descriptor::new(id, "", "", vec![len], DType::U8))
            });
            if let Err(err) = item.set_value(value) {
                return Err(HeapError::MalformedHeap(format!("heap {}: {err}", heap.cnt())));
            }
            updated.push(id);
        }
        Ok(updated)
    }
}

fn validate_descriptor(descriptor: &Descriptor) -> Result<()> {
    if !is_valid_item_id(descriptor.id) {
        return Err(HeapError::InvalidId(descriptor.id));
    }
    if descriptor.shape.iter().any(|&dim| dim > MAX_ADDRESS) {
        return Err(HeapError::InvalidShape {
            id: descriptor.id,
            shape: descriptor.shape.clone(),
        });
    }
    Ok(())
}

/// Shape a raw value for its descriptor. Immediate values keep their low
/// bytes.
fn fit_value(descriptor: &Descriptor, raw: &RawItem, cnt: u64) -> Result<Bytes> {
    let expected = descriptor.size_bytes();
    if raw.immediate && expected <= raw.value.len() {
        let lead = raw.value.len() - expected;
        return Ok(raw.value.slice(lead..));
    }
    if raw.value.len() != expected {
        return Err(HeapError::MalformedHeap(format!(
            "heap {cnt}: item 0x{:x} value is {} bytes, descriptor requires {expected}",
            raw.id,
            raw.value.len()
        )));
    }
    Ok(raw.value.clone())
}
