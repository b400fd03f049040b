use serde::{Deserialize, Serialize};

/// Consumption counters of one entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub consumed: u32,
    pub total: u32,
    pub completed: bool,
    pub percentage: u8,
}

impl Progress {
    pub fn new(consumed: u32, total: u32, completed: bool) -> Self {
        Self {
            consumed,
            total,
            completed,
            percentage: percentage(consumed, total),
        }
    }
}

/// `round(consumed / total * 100)`, half up, capped at 100. Zero when the
/// product has no units.
pub fn percentage(consumed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let consumed = u64::from(consumed.min(total));
    let total = u64::from(total);
    ((consumed * 200 + total) / (total * 2)) as u8
}
