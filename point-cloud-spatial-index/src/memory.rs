/// Working-set estimate for the tree build and the in-memory versus
/// disk-backed decision.
use crate::config::StorageMode;
use constants::build_settings::{LIST_BYTES_PER_POINT, POSITION_BYTES_PER_POINT};
use sysinfo::System;

/// Bytes needed to hold the root id lists and every position in memory.
pub fn estimate_working_set(points: u64) -> u64 {
    points.saturating_mul(LIST_BYTES_PER_POINT + POSITION_BYTES_PER_POINT)
}

/// Memory the operating system reports as available right now.
pub fn available_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.available_memory()
}

/// Pick the storage mode for a build over `points` points. Explicit modes
/// are kept as requested.
pub fn resolve_storage(requested: StorageMode, points: u64, available: u64) -> StorageMode {
    match requested {
        StorageMode::Auto => {
            let needed = estimate_working_set(points);
            let mode = if needed <= available {
                StorageMode::InMemory
            } else {
                StorageMode::DiskBacked
            };
            log::info!(
                "Working set of {} MB against {} MB available: {:?}",
                needed / 1_000_000,
                available / 1_000_000,
                mode
            );
            mode
        }
        explicit => explicit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_counts_lists_and_positions() {
        assert_eq!(estimate_working_set(1_000), 20_000);
        assert_eq!(estimate_working_set(u64::MAX), u64::MAX);
    }

    #[test]
    fn auto_falls_back_to_disk_when_memory_is_short() {
        assert_eq!(resolve_storage(StorageMode::Auto, 100, 2_000), StorageMode::InMemory);
        assert_eq!(resolve_storage(StorageMode::Auto, 101, 2_000), StorageMode::DiskBacked);
    }

    #[test]
    fn explicit_modes_are_respected() {
        assert_eq!(resolve_storage(StorageMode::DiskBacked, 1, u64::MAX), StorageMode::DiskBacked);
        assert_eq!(resolve_storage(StorageMode::InMemory, u64::MAX, 0), StorageMode::InMemory);
    }
}
