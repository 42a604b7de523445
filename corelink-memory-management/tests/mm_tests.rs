//! Address table tests

use corelink_memory_management::*;
use proptest::prelude::*;

fn l2_table(capacity: usize) -> AddressTable {
    AddressTable::new(capacity, &[MemoryRegion::new("l2ram", 0x80_0000, 0x4080_0000, 0x4_0000)]).unwrap()
}

#[test]
fn test_static_lookup_scenario() {
    let mut table = l2_table(8);
    assert_eq!(table.lookup(0x80_0100), Ok(0x4080_0100));

    table.set_mmu_enabled(true);
    let err = table.lookup(0x90_0000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AddressTranslationFailed);

    table.set_mmu_enabled(false);
    assert_eq!(table.lookup(0x90_0000), Ok(0x90_0000));
}

#[test]
fn test_capacity_validation() {
    assert_eq!(AddressTable::new(0, &[]).unwrap_err().kind(), ErrorKind::InvalidArgument);
    let regions = [
        MemoryRegion::new("a", 0x0, 0x1000, 0x1000),
        MemoryRegion::new("b", 0x1000, 0x2000, 0x1000),
    ];
    assert_eq!(AddressTable::new(1, &regions).unwrap_err().kind(), ErrorKind::TableFull);
    assert_eq!(
        AddressTable::new(4, &[MemoryRegion::new("empty", 0x0, 0x0, 0)]).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn test_release_of_unknown_address_is_noop() {
    let mut table = l2_table(8);
    assert_eq!(table.release(0xdead_0000), Released::NotFound);
    assert_eq!(table.dynamic_count(), 1);
}

#[test]
fn test_mmu_context_covers_live_entries() {
    let mut table = l2_table(8);
    table.acquire(0x1000_0000, 0x1000, 0x9000_0000, true).unwrap();
    let context = table.mmu_context().unwrap();
    // 256KB static region splits into four 64KB pages, plus one 4KB dynamic page
    assert_eq!(context.len(), 5);
    assert!(context.iter().all(|entry| entry.endianness == Endianness::Little));
}

proptest! {
    #[test]
    fn prop_refcount_symmetry(maps in 1u32..8, unmaps in 0u32..8) {
        let mut table = l2_table(8);
        let mut successful_maps = 0u32;
        for _ in 0..maps {
            if table.acquire(0x2000_0000, 0x1000, 0xa000_0000, false).is_ok() {
                successful_maps += 1;
            }
        }
        let mut successful_unmaps = 0u32;
        for _ in 0..unmaps {
            if !matches!(table.release(0x2000_0000), Released::NotFound) {
                successful_unmaps += 1;
            }
        }

        let live = table.find(0x2000_0000).copied();
        if successful_maps > successful_unmaps {
            let entry = live.expect("entry must still be mapped");
            prop_assert!(entry.is_mapped);
            prop_assert_eq!(entry.ref_count, successful_maps - successful_unmaps);
        } else {
            prop_assert!(live.is_none());
            let slot = table.entry(1).unwrap();
            prop_assert!(!slot.is_mapped);
            prop_assert_eq!(slot.ref_count, 0);
            prop_assert_eq!(slot.slave_virt(), None);
        }
    }

    #[test]
    fn prop_table_containment(offset in 0usize..0x4_0000, dyn_offset in 0usize..0x3000) {
        let mut table = l2_table(8);
        table.set_mmu_enabled(true);
        table.acquire(0x3000_0000, 0x3000, 0xb000_0000, false).unwrap();

        prop_assert_eq!(table.lookup(0x80_0000 + offset), Ok(0x4080_0000 + offset));
        prop_assert_eq!(table.lookup(0x3000_0000 + dyn_offset), Ok(0xb000_0000 + dyn_offset));
    }

    #[test]
    fn prop_identity_fallback(addr in 0x100_0000usize..0x2000_0000) {
        let table = l2_table(8);
        prop_assert_eq!(table.lookup(addr), Ok(addr));
    }
}
