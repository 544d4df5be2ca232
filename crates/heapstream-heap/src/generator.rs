//! Builds heaps from what changed in an item group.

use std::collections::BTreeSet;

use tracing::trace;

use crate::group::ItemGroup;
use crate::heap::{Heap, HeapItem};
use crate::ItemId;

/// How often descriptors are repeated after their first transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptorCadence {
    /// Each descriptor goes out once, in the first heap after its item was added.
    #[default]
    Never,
    /// Every n-th heap carries all descriptors. `EveryNth(0)` behaves as `Never`.
    EveryNth(u64),
}

/// Turns item group changes into heaps.
///
/// The first heap built after an item is added carries its descriptor; each
/// heap carries the values that changed since the previous heap.
#[derive(Debug, Clone, Default)]
pub struct HeapGenerator {
    cadence: DescriptorCadence,
    heaps_built: u64,
    reissue: bool,
}

impl HeapGenerator {
    pub fn new(cadence: DescriptorCadence) -> Self {
        Self {
            cadence,
            heaps_built: 0,
            reissue: false,
        }
    }

    pub fn cadence(&self) -> DescriptorCadence {
        self.cadence
    }

    /// Force every descriptor into the next heap.
    pub fn request_descriptors(&mut self) {
        self.reissue = true;
    }

    /// Build a heap with unsent descriptors and changed values, and mark its
    /// contents as sent.
    pub fn get_heap(&mut self, group: &mut ItemGroup) -> Heap {
        self.build_heap(group, &[])
    }

    /// Build a heap, additionally forcing the descriptors of
    /// `include_descriptors_for`, and mark its contents as sent.
    pub fn build_heap(
        &mut self,
        group: &mut ItemGroup,
        include_descriptors_for: &[ItemId],
    ) -> Heap {
        let heap = self.prepare_heap(group, include_descriptors_for);
        self.commit(group, &heap);
        heap
    }

    /// Build the next heap without marking anything as sent.
    ///
    /// Descriptors come first, then values in id order. Pass the heap to
    /// [`commit`](Self::commit) once it has been handed to a stream, so a
    /// failed send leaves its contents pending for the next heap.
    pub fn prepare_heap(&self, group: &ItemGroup, include_descriptors_for: &[ItemId]) -> Heap {
        let all_due = self.reissue || self.cadence_due();
        let mut descriptor_ids: BTreeSet<ItemId> = if all_due {
            group.ids().collect()
        } else {
            group.unsent_descriptors().into_iter().collect()
        };
        descriptor_ids.extend(
            include_descriptors_for
                .iter()
                .copied()
                .filter(|id| group.get(*id).is_some()),
        );

        let mut heap = Heap::new();
        for id in &descriptor_ids {
            if let Some(item) = group.get(*id) {
                heap.add_descriptor(item.descriptor().clone());
            }
        }
        for id in group.changed_items() {
            let Some(item) = group.get(id) else { continue };
            let Some(value) = item.value() else { continue };
            heap.push_item(HeapItem {
                id,
                version: item.version(),
                value: value.clone(),
                allow_immediate: item.allow_immediate(),
            });
        }
        trace!(
            descriptors = heap.descriptors().len(),
            items = heap.items().len(),
            "heap built"
        );
        heap
    }

    /// Record the contents of a prepared `heap` as sent.
    pub fn commit(&mut self, group: &mut ItemGroup, heap: &Heap) {
        for descriptor in heap.descriptors() {
            group.mark_descriptor_sent(descriptor.id);
        }
        for item in heap.items() {
            group.mark_value_sent(item.id, item.version);
        }
        self.heaps_built += 1;
        self.reissue = false;
    }

    /// The heap announcing the end of the stream.
    pub fn build_end_marker(&self) -> Heap {
        Heap::end()
    }

    fn cadence_due(&self) -> bool {
        match self.cadence {
            DescriptorCadence::Never | DescriptorCadence::EveryNth(0) => false,
            DescriptorCadence::EveryNth(n) => self.heaps_built % n == 0,
        }
    }
}
