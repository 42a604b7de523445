//! Backend state machine tests

mod common;

use corelink_api::{BootMode, ErrorKind, ProcId, ProcState};
use corelink_memory_management::MemoryRegion;
use corelink_procmgr::sim::{HalOp, SimHal, SimHalProbe};
use corelink_procmgr::{
    AttachParams, ControlCommand, MemSegment, NotifyEvent, NotifyStatus, Processor, ProcMgrConfig, ProcessorBackend, SocProfile,
};

use common::{dsp_id, recorder, shm_region};

/// Static DSP regions split into MMU pages: 4 x 64K + 8 x 4K + 8 x 4K
const DSP_STATIC_PAGES: usize = 20;

fn dsp() -> (Processor<SimHal>, SimHalProbe) {
    let hal = SimHal::new();
    let probe = hal.probe();
    let processor = Processor::new(dsp_id(), SocProfile::dsp(), hal, &ProcMgrConfig::default()).unwrap();
    (processor, probe)
}

#[test]
fn test_rejects_foreign_core() {
    let err = Processor::new(ProcId::new(2).unwrap(), SocProfile::dsp(), SimHal::new(), &ProcMgrConfig::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_boot_attach_programs_static_context() {
    let (mut dsp, probe) = dsp();
    let params = AttachParams::new(BootMode::Boot)
        .with_resource(MemoryRegion::new("DDR", 0x2000_0000, 0x4110_0000, 0x1000))
        .with_resource(shm_region());

    let info = dsp.attach(&params).unwrap();
    assert_eq!(info.regions_to_map, vec![shm_region()]);
    assert!(info.mmu_enabled);
    assert_eq!(dsp.state(), ProcState::Reset);
    assert_eq!(dsp.boot_mode(), Some(BootMode::Boot));

    // The map=false region joined the static part of the table.
    assert_eq!(dsp.address_table().static_count(), 4);
    assert_eq!(dsp.translate_addr(0x2000_0010).unwrap(), 0x4110_0010);

    let hal = probe.state();
    assert!(hal.initialized);
    assert!(hal.core_in_reset);
    assert!(hal.mmu_enabled);
    assert_eq!(hal.tlb.len(), DSP_STATIC_PAGES + 1);
}

#[test]
fn test_attach_twice_rejected() {
    let (mut dsp, _) = dsp();
    dsp.attach(&AttachParams::default()).unwrap();
    let err = dsp.attach(&AttachParams::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_failed_attach_leaves_backend_detached() {
    let (mut dsp, probe) = dsp();
    probe.fail(HalOp::MmuEnable);
    let params = AttachParams::new(BootMode::Boot)
        .with_resource(MemoryRegion::new("DDR", 0x2000_0000, 0x4110_0000, 0x1000));
    let err = dsp.attach(&params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendOperationFailed);
    assert_eq!(dsp.state(), ProcState::Unknown);
    assert_eq!(dsp.boot_mode(), None);
    assert_eq!(dsp.address_table().static_count(), 3);
    assert!(!probe.state().initialized);

    probe.clear_failures();
    dsp.attach(&params).unwrap();
    assert_eq!(dsp.state(), ProcState::Reset);
}

#[test]
fn test_boot_mode_start_requires_image() {
    let (mut dsp, probe) = dsp();
    dsp.attach(&AttachParams::new(BootMode::Boot)).unwrap();

    assert_eq!(dsp.start(0x0080_0000).unwrap_err().kind(), ErrorKind::InvalidState);

    dsp.set_loaded(true).unwrap();
    assert_eq!(dsp.state(), ProcState::Loaded);
    dsp.start(0x0080_0400).unwrap();
    assert_eq!(dsp.state(), ProcState::Running);

    let hal = probe.state();
    assert_eq!(hal.boot_address, Some(0x0080_0400));
    assert!(!hal.core_in_reset);

    dsp.stop().unwrap();
    assert_eq!(dsp.state(), ProcState::Reset);
    assert!(probe.state().core_in_reset);
    assert_eq!(dsp.stop().unwrap_err().kind(), ErrorKind::InvalidState);
}

#[test]
fn test_noload_mode_starts_from_reset() {
    let (mut dsp, _) = dsp();
    dsp.attach(&AttachParams::new(BootMode::NoLoadPwr)).unwrap();
    dsp.start(0x0080_0000).unwrap();
    assert_eq!(dsp.state(), ProcState::Running);
}

#[test]
fn test_noboot_leaves_execution_alone() {
    let (mut dsp, probe) = dsp();
    dsp.attach(&AttachParams::new(BootMode::NoBoot)).unwrap();
    assert_eq!(dsp.state(), ProcState::Running);
    assert!(!probe.state().core_in_reset);

    assert_eq!(dsp.start(0x0080_0000).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(dsp.stop().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(
        dsp.control(ControlCommand::Suspend).unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    dsp.detach().unwrap();
    assert!(!probe.state().core_in_reset);
    assert_eq!(dsp.state(), ProcState::Unknown);
}

#[test]
fn test_suspend_resume_round_trip() {
    let (mut dsp, probe) = dsp();
    dsp.attach(&AttachParams::new(BootMode::NoLoadPwr)).unwrap();

    assert_eq!(
        dsp.control(ControlCommand::Suspend).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    dsp.start(0x0080_0000).unwrap();

    dsp.control(ControlCommand::Suspend).unwrap();
    assert_eq!(dsp.state(), ProcState::Suspended);
    let suspended = probe.state();
    assert!(suspended.core_in_reset);
    assert!(suspended.mmu_in_reset);
    assert!(suspended.tlb.is_empty());

    assert_eq!(
        dsp.control(ControlCommand::Suspend).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    dsp.control(ControlCommand::Resume).unwrap();
    assert_eq!(dsp.state(), ProcState::Running);
    let resumed = probe.state();
    assert!(!resumed.core_in_reset);
    assert!(!resumed.mmu_in_reset);
    assert_eq!(resumed.tlb.len(), DSP_STATIC_PAGES);

    assert_eq!(
        dsp.control(ControlCommand::Resume).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
}

#[test]
fn test_custom_control_not_implemented() {
    let (mut dsp, _) = dsp();
    dsp.attach(&AttachParams::default()).unwrap();
    let err = dsp.control(ControlCommand::Custom { cmd: 0x42, arg: 0 }).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
}

#[test]
fn test_ipu_mmu_follows_execution() {
    let hal = SimHal::new();
    let probe = hal.probe();
    let ipu_id = ProcId::new(2).unwrap();
    let mut ipu = Processor::new(ipu_id, SocProfile::ipu(), hal, &ProcMgrConfig::default()).unwrap();

    ipu.attach(&AttachParams::new(BootMode::NoLoadPwr)).unwrap();
    let attached = probe.state();
    assert!(!attached.mmu_enabled);
    assert!(!attached.tlb.is_empty());

    ipu.start(0).unwrap();
    assert!(probe.state().mmu_enabled);
    ipu.stop().unwrap();
    assert!(!probe.state().mmu_enabled);
}

#[test]
fn test_dynamic_map_refcount_drives_mmu() {
    let (mut dsp, probe) = dsp();
    dsp.attach(&AttachParams::default()).unwrap();
    let segment = MemSegment {
        master_phys: 0x4110_0000,
        size: 0x2000,
        is_cached: false,
    };

    assert_eq!(dsp.map(0x3000_0000, &[segment]).unwrap(), 0x3000_0000);
    assert_eq!(dsp.map(0x3000_0000, &[segment]).unwrap(), 0x3000_0000);
    assert_eq!(probe.state().tlb.len(), DSP_STATIC_PAGES + 2);
    assert_eq!(dsp.translate_addr(0x3000_1004).unwrap(), 0x4110_1004);

    dsp.unmap(0x3000_0000, 0x2000).unwrap();
    assert_eq!(probe.state().tlb.len(), DSP_STATIC_PAGES + 2);
    dsp.unmap(0x3000_0000, 0x2000).unwrap();
    assert_eq!(probe.state().tlb.len(), DSP_STATIC_PAGES);
    assert_eq!(
        dsp.translate_addr(0x3000_1004).unwrap_err().kind(),
        ErrorKind::AddressTranslationFailed
    );

    // Releasing an address that is no longer mapped is a no-op.
    dsp.unmap(0x3000_0000, 0x2000).unwrap();
}

#[test]
fn test_failed_mmu_programming_rolls_back_scatter_list() {
    let (mut dsp, probe) = dsp();
    dsp.attach(&AttachParams::default()).unwrap();
    probe.fail(HalOp::AddEntry);
    let segments = [MemSegment {
        master_phys: 0x4110_0000,
        size: 0x1000,
        is_cached: false,
    }];
    let err = dsp.map(0x3000_0000, &segments).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MapFailed);
    assert_eq!(dsp.address_table().live_dynamic(), 0);
}

#[test]
fn test_mmu_disabled_translation_is_identity() {
    let (mut dsp, _) = dsp();
    dsp.attach(&AttachParams::default().with_mmu(false)).unwrap();
    assert_eq!(dsp.translate_addr(0x1234_5678).unwrap(), 0x1234_5678);
    assert_eq!(dsp.translate_addr(0x0080_0100).unwrap(), 0x4080_0100);
}

#[test]
fn test_detach_is_best_effort() {
    let (mut dsp, probe) = dsp();
    dsp.attach(&AttachParams::default()).unwrap();
    probe.fail(HalOp::MmuDisable);

    let err = dsp.detach().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendOperationFailed);
    let hal = probe.state();
    assert!(hal.core_in_reset);
    assert!(!hal.initialized);
    assert_eq!(dsp.state(), ProcState::Unknown);
    assert_eq!(dsp.address_table().dynamic_count(), dsp.address_table().boot_count());
    assert_eq!(dsp.address_table().live_dynamic(), 0);
}

#[test]
fn test_listener_sees_state_change() {
    let (mut dsp, _) = dsp();
    let (events, callback) = recorder();
    dsp.register_notify(&[ProcState::Reset], None, callback).unwrap();
    dsp.attach(&AttachParams::default()).unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, ProcState::Reset);
    assert_eq!(events[0].status, NotifyStatus::StateReached);
}

#[test]
fn test_drop_cancels_every_listener() {
    let (mut dsp, _) = dsp();
    let (events, _) = recorder();
    for _ in 0..5 {
        let sink = std::sync::Arc::clone(&events);
        dsp.register_notify(
            &[ProcState::Running],
            Some(std::time::Duration::from_secs(60)),
            Box::new(move |event: &NotifyEvent| sink.lock().unwrap().push(*event)),
        )
        .unwrap();
    }
    assert_eq!(dsp.listener_count(), 5);

    drop(dsp);
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 5);
    assert!(events.iter().all(|event| event.status == NotifyStatus::Canceled));
}

#[test]
fn test_register_write_uses_single_store() {
    let (mut dsp, _) = dsp();
    let mut register = [0u32; 2];
    let addr = register.as_mut_ptr() as usize;
    let bytes = 0xdead_beef_u32.to_ne_bytes();

    // SAFETY: `addr` points at a live, aligned local buffer of 8 bytes.
    unsafe {
        assert_eq!(dsp.write(addr, &bytes).unwrap(), 4);
        assert_eq!(dsp.write(addr + 4, &[1, 2]).unwrap(), 2);
    }
    assert_eq!(register[0], 0xdead_beef);

    let mut back = [0u8; 4];
    // SAFETY: as above.
    unsafe { dsp.read(addr, &mut back).unwrap() };
    assert_eq!(back, bytes);
}
