// SPDX-License-Identifier: GPL-3.0-only

//! Placement of new partitions inside the free slots of a device

use storage_types::{
    ByteRange, GPT_ALIGNMENT_BYTES, Partitionable, PtableType, align_down, align_up,
};

use crate::planner::{PartitionTarget, Plan, PlannedPartition};

/// Size window of one partition to place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub min: u64,
    pub max: Option<u64>,
}

impl Request {
    pub fn of(partition: &PlannedPartition) -> Self {
        Self {
            min: partition.min,
            max: partition.max,
        }
    }

    fn initial_size(&self) -> u64 {
        align_up(self.min.max(GPT_ALIGNMENT_BYTES))
    }

    fn cap(&self) -> u64 {
        self.max
            .map(|max| align_down(max).max(self.initial_size()))
            .unwrap_or(u64::MAX)
    }
}

/// Places `requests` first-fit into `slots`, in the given order, then grows
/// every partition of a slot towards its maximum, sharing the free space of
/// the slot evenly. Returns one region per request, or `None` when some
/// request does not fit.
pub fn place(slots: &[ByteRange], requests: &[Request]) -> Option<Vec<ByteRange>> {
    let mut used: Vec<u64> = vec![0; slots.len()];
    let mut members: Vec<Vec<(usize, u64)>> = vec![Vec::new(); slots.len()];

    for (index, request) in requests.iter().enumerate() {
        let size = request.initial_size();
        let slot = slots
            .iter()
            .enumerate()
            .position(|(slot, range)| range.size() - used[slot] >= size)?;
        used[slot] += size;
        members[slot].push((index, size));
    }

    let mut regions = vec![ByteRange::new(0, 0); requests.len()];
    for (slot, range) in slots.iter().enumerate() {
        let mut free = range.size() - used[slot];
        grow(&mut members[slot], requests, &mut free);

        let mut cursor = range.start;
        for (index, size) in &members[slot] {
            regions[*index] = ByteRange::new(cursor, cursor + size);
            cursor += size;
        }
    }
    Some(regions)
}

fn grow(members: &mut [(usize, u64)], requests: &[Request], free: &mut u64) {
    loop {
        let growable: Vec<usize> = members
            .iter()
            .enumerate()
            .filter(|(_, (index, size))| *size < requests[*index].cap())
            .map(|(position, _)| position)
            .collect();
        if growable.is_empty() || *free < GPT_ALIGNMENT_BYTES {
            return;
        }

        let share = align_down(*free / growable.len() as u64).max(GPT_ALIGNMENT_BYTES);
        let mut progress = false;
        for position in growable {
            let (index, size) = &mut members[position];
            let room = requests[*index].cap() - *size;
            let extra = share.min(room).min(*free);
            let extra = align_down(extra);
            if extra > 0 {
                *size += extra;
                *free -= extra;
                progress = true;
            }
        }
        if !progress {
            return;
        }
    }
}

/// Planned partitions of `device`, boot partitions first
pub fn requests_for(plan: &Plan, target: PartitionTarget) -> Vec<&PlannedPartition> {
    let mut partitions: Vec<&PlannedPartition> = plan.partitions_on(target).collect();
    partitions.sort_by_key(|partition| !partition.boot);
    partitions
}

/// Table type a device ends up with when it has none yet
pub fn table_type_for(plan: &Plan, device: &dyn Partitionable, default: PtableType) -> PtableType {
    plan.new_ptable_type(device.sid())
        .or_else(|| device.partition_table().map(|table| table.ptable_type))
        .unwrap_or_else(|| match device.preferred_ptable_type() {
            PtableType::Dasd => PtableType::Dasd,
            _ => default,
        })
}

/// Whether the planned partitions fit on `device` as it is now
pub fn fits(
    device: &dyn Partitionable,
    partitions: &[&PlannedPartition],
    ptable_type: PtableType,
) -> bool {
    let existing = device.partitions().len();
    if existing + partitions.len() > ptable_type.max_partitions() {
        return false;
    }
    let requests: Vec<Request> = partitions.iter().map(|p| Request::of(p)).collect();
    place(&device.available_slots(ptable_type), &requests).is_some()
}
