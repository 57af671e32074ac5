use ulid::Ulid;

use crate::model::*;

use super::SlotStore;

impl SlotStore {
    pub async fn get_slot(&self, slot_id: &Ulid) -> Option<AvailabilitySlot> {
        let staff_id = self.slot_index.get(slot_id).map(|e| *e.value())?;
        let partition = self.partition(&staff_id)?;
        let guard = partition.read().await;
        guard.get(slot_id).cloned()
    }

    /// Slots of `staff_id` touching `range` under the inclusive overlap predicate.
    pub async fn touching_slots(&self, staff_id: &Ulid, range: &Span) -> Vec<AvailabilitySlot> {
        let Some(partition) = self.partition(staff_id) else {
            return Vec::new();
        };
        let guard = partition.read().await;
        guard.touching(range).cloned().collect()
    }

    /// Slots whose start lies in `window`, for one staff member or for all of them.
    pub async fn slots_starting_in(
        &self,
        staff_id: Option<&Ulid>,
        window: &Span,
    ) -> Vec<AvailabilitySlot> {
        let partitions = match staff_id {
            Some(id) => self.partition(id).into_iter().collect(),
            None => self.all_partitions(),
        };
        let mut out = Vec::new();
        for partition in partitions {
            let guard = partition.read().await;
            out.extend_from_slice(guard.starting_in(window));
        }
        out
    }

    pub fn staff_ids(&self) -> Vec<Ulid> {
        self.partitions.iter().map(|e| *e.key()).collect()
    }

    pub fn slot_count(&self) -> usize {
        self.slot_index.len()
    }
}
