//! Executable loading through the processor manager

mod common;

use std::fs;

use corelink_api::{BootMode, ErrorKind, ProcState};
use corelink_procmgr::{AttachParams, ImageFile, ProcMgrConfig, StartParams};

use common::*;

const TEXT: u32 = 0x0080_1000;
const ARGC: u32 = 0x0080_1020;
const TEXT_SIZE: u32 = 0x40;

fn text_bytes() -> Vec<u8> {
    (1u8..=16).collect()
}

fn l2_image() -> Vec<u8> {
    ImageBuilder::new(TEXT)
        .segment(TEXT, &text_bytes(), TEXT_SIZE)
        .symbol("__argc", ARGC)
        .symbol("text_Start", TEXT)
        .symbol("text_End", TEXT + TEXT_SIZE)
        .build()
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn expected_text(argc: u32) -> Vec<u8> {
    let mut expected = vec![0u8; TEXT_SIZE as usize];
    expected[..16].copy_from_slice(&text_bytes());
    let at = (ARGC - TEXT) as usize;
    expected[at..at + 4].copy_from_slice(&argc.to_le_bytes());
    expected
}

#[test]
fn test_load_start_stop_unload() {
    let (_procmgr, instance, probes) = dsp_instance(ProcMgrConfig::default());
    instance.attach(&AttachParams::new(BootMode::Boot)).unwrap();

    let image = ImageFile::from_bytes("l2.out", l2_image());
    let file_id = instance
        .load_file("l2.out", Box::new(image), &args(&["one", "two"]))
        .unwrap();
    assert_eq!(instance.state(), ProcState::Loaded);
    assert_eq!(instance.loaded_file_id(), Some(file_id));
    assert_eq!(instance.proc_info().loaded_file, Some(file_id));

    let text_phys = L2_PHYS + (TEXT as usize - L2_SLAVE);
    assert_eq!(probes.host.read_phys(text_phys, TEXT_SIZE as usize).unwrap(), expected_text(2));
    assert_eq!(probes.host.live_mappings(), 0);
    assert!(instance.proc_info().mapped.is_empty());

    // Loading over a loaded image is refused.
    let again = ImageFile::from_bytes("l2.out", l2_image());
    let err = instance.load_file("l2.out", Box::new(again), &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    instance.start(&StartParams::default()).unwrap();
    assert_eq!(instance.state(), ProcState::Running);
    assert_eq!(probes.hal.state().boot_address, Some(TEXT));
    assert!(!probes.hal.state().core_in_reset);
    assert_eq!(instance.unload(file_id).unwrap_err().kind(), ErrorKind::InvalidState);

    instance.stop().unwrap();
    assert_eq!(instance.state(), ProcState::Reset);
    instance.unload(file_id).unwrap();
    assert_eq!(instance.loaded_file_id(), None);
    assert_eq!(instance.unload(file_id).unwrap_err().kind(), ErrorKind::HandleNotFound);
}

#[test]
fn test_unload_returns_to_reset() {
    let (_procmgr, instance, _) = dsp_instance(ProcMgrConfig::default());
    instance.attach(&AttachParams::default()).unwrap();
    let file_id = instance
        .load_file("l2.out", Box::new(ImageFile::from_bytes("l2.out", l2_image())), &[])
        .unwrap();
    assert_eq!(instance.state(), ProcState::Loaded);

    instance.unload(file_id).unwrap();
    assert_eq!(instance.state(), ProcState::Reset);
    let err = instance.start(&StartParams::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_symbols_and_sections() {
    let (_procmgr, instance, probes) = dsp_instance(ProcMgrConfig::default());
    instance.attach(&AttachParams::default()).unwrap();
    let file_id = instance
        .load_file("l2.out", Box::new(ImageFile::from_bytes("l2.out", l2_image())), &args(&["a"]))
        .unwrap();

    assert_eq!(instance.symbol_address(file_id, "__argc").unwrap(), ARGC as usize);
    assert_eq!(
        instance.symbol_address(file_id, "main").unwrap_err().kind(),
        ErrorKind::HandleNotFound
    );

    let section = instance.section_info(file_id, "text").unwrap();
    assert_eq!(section.addr, TEXT as usize);
    assert_eq!(section.size, TEXT_SIZE as usize);
    assert_eq!(instance.section_data(file_id, "text").unwrap(), expected_text(1));
    assert_eq!(probes.host.live_mappings(), 0);

    assert_eq!(
        instance.section_info(file_id, "data").unwrap_err().kind(),
        ErrorKind::HandleNotFound
    );
}

#[test]
fn test_load_into_shared_memory() {
    let (_procmgr, instance, probes) = dsp_instance(ProcMgrConfig::default());
    instance
        .attach(&AttachParams::new(BootMode::Boot).with_resource(shm_region()))
        .unwrap();

    let target = (SHM_SLAVE + 0x100) as u32;
    let image = ImageBuilder::new(target).segment(target, b"ipc-ring", 8).build();
    instance
        .load_file("shm.out", Box::new(ImageFile::from_bytes("shm.out", image)), &[])
        .unwrap();

    assert_eq!(probes.host.read_phys(SHM_PHYS + 0x100, 8).unwrap(), b"ipc-ring".to_vec());
    assert_eq!(probes.host.live_mappings(), 1);
    assert_eq!(instance.proc_info().mapped.len(), 1);
}

#[test]
fn test_load_requires_boot_mode_and_attach() {
    let (_procmgr, instance, _) = dsp_instance(ProcMgrConfig::default());
    let image = || Box::new(ImageFile::from_bytes("l2.out", l2_image()));

    let err = instance.load_file("l2.out", image(), &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    instance.attach(&AttachParams::new(BootMode::NoLoadPwr)).unwrap();
    let err = instance.load_file("l2.out", image(), &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_load_failures() {
    let config = ProcMgrConfig::default().with_max_load_args(1);
    let (_procmgr, instance, probes) = dsp_instance(config);
    instance.attach(&AttachParams::default()).unwrap();

    let err = instance
        .load_file("l2.out", Box::new(ImageFile::from_bytes("l2.out", l2_image())), &args(&["a", "b"]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let with_dependency = ImageBuilder::new(TEXT)
        .segment(TEXT, &text_bytes(), TEXT_SIZE)
        .depends_on("libdsp")
        .build();
    let err = instance
        .load_file("dep.out", Box::new(ImageFile::from_bytes("dep.out", with_dependency)), &[])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadFailed);
    assert!(err.to_string().contains("dependent"));

    // Neither static nor mapped: nothing backs it on the host.
    let unmapped = ImageBuilder::new(0x3000_0000).segment(0x3000_0000, b"lost", 4).build();
    let err = instance
        .load_file("far.out", Box::new(ImageFile::from_bytes("far.out", unmapped)), &[])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadFailed);

    let err = instance
        .load_file("junk.out", Box::new(ImageFile::from_bytes("junk.out", b"ELF?".to_vec())), &[])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadFailed);

    assert_eq!(instance.state(), ProcState::Reset);
    assert_eq!(probes.host.live_mappings(), 0);
    assert!(instance.proc_info().mapped.is_empty());
}

#[test]
fn test_load_from_path() {
    let (_procmgr, instance, probes) = dsp_instance(ProcMgrConfig::default());
    instance.attach(&AttachParams::default()).unwrap();

    let missing = std::env::temp_dir().join(format!("corelink-missing-{}.out", std::process::id()));
    let err = instance.load(&missing.to_string_lossy(), &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadFailed);

    let path = std::env::temp_dir().join(format!("corelink-l2-{}.out", std::process::id()));
    fs::write(&path, l2_image()).unwrap();
    let loaded = instance.load(&path.to_string_lossy(), &[]);
    fs::remove_file(&path).unwrap();

    loaded.unwrap();
    assert_eq!(instance.state(), ProcState::Loaded);
    let text_phys = L2_PHYS + (TEXT as usize - L2_SLAVE);
    assert_eq!(probes.host.read_phys(text_phys, TEXT_SIZE as usize).unwrap(), expected_text(0));
}

#[test]
fn test_detach_forgets_loaded_images() {
    let (_procmgr, instance, _) = dsp_instance(ProcMgrConfig::default());
    instance.attach(&AttachParams::default()).unwrap();
    let file_id = instance
        .load_file("l2.out", Box::new(ImageFile::from_bytes("l2.out", l2_image())), &[])
        .unwrap();

    instance.detach().unwrap();
    assert_eq!(instance.state(), ProcState::Unknown);
    assert_eq!(instance.loaded_file_id(), None);

    instance.attach(&AttachParams::default()).unwrap();
    assert_eq!(instance.state(), ProcState::Reset);
    assert_eq!(
        instance.symbol_address(file_id, "__argc").unwrap_err().kind(),
        ErrorKind::HandleNotFound
    );
}
