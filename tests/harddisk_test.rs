// test of the HFDC and SCSI hard disk layout
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use ti99kit::img::{self,Container,Geometry,SECTOR_SIZE};
use ti99kit::fs::{self,Controller,DirId,Entry,MountOptions,RecordFormat,SharedVolume,Volume,VolumeKind};
use ti99kit::convert;

fn blank_hd(controller: Controller,spau: usize) -> Volume {
    let img = img::raw_hd::RawHd::create(Geometry::new(100,4,32,SECTOR_SIZE));
    Volume::format_harddisk(Box::new(img),"HARD",controller,spau).expect("format failed")
}

fn file_id(vol: &Volume,path: &str) -> fs::FileId {
    match vol.resolve(path).expect("not found") {
        Entry::File(id) => id,
        Entry::Dir(_) => panic!("expected a file")
    }
}

#[test]
fn format() {
    let vol = blank_hd(Controller::Hfdc,1);
    assert_eq!(vol.kind(),VolumeKind::HardDisk(Controller::Hfdc));
    assert_eq!(vol.name(),"HARD");
    assert_eq!(vol.total_aus(),12800);
    assert!(vol.check_bitmap());
    for lsec in 0..32 {
        assert_eq!(vol.read_sector(lsec).expect("read failed"),vol.read_sector(lsec+32).expect("read failed"));
    }
    let vol = blank_hd(Controller::Scsi,4);
    assert_eq!(vol.kind(),VolumeKind::HardDisk(Controller::Scsi));
    assert_eq!(vol.sectors_per_au(),4);
    assert_eq!(vol.total_aus(),3200);
    assert_eq!(vol.read_sector(0).expect("read failed")[0x0c],0);
}

#[test]
fn bad_au_size() {
    let img = img::raw_hd::RawHd::create(Geometry::new(100,4,32,SECTOR_SIZE));
    assert!(Volume::format_harddisk(Box::new(img),"HARD",Controller::Hfdc,3).is_err());
}

#[test]
fn nested_directories() {
    let mut vol = blank_hd(Controller::Hfdc,1);
    let alpha = vol.create_subdirectory(DirId::ROOT,"ALPHA").expect("mkdir failed");
    let beta = vol.create_subdirectory(alpha,"BETA").expect("mkdir failed");
    let gamma = vol.create_subdirectory(beta,"GAMMA").expect("mkdir failed");
    let lines = vec![b"10 PRINT".to_vec(),b"20 END".to_vec()];
    vol.create_records_file(gamma,"SOURCE",RecordFormat::dis_var_80(),&lines).expect("create failed");
    assert!(vol.check_bitmap());

    let dat = vol.to_bytes().expect("serialize failed");
    let vol = ti99kit::mount_bytestream(&dat,Some("hd"),MountOptions::default()).expect("mount failed");
    let id = file_id(&vol,"ALPHA.BETA.GAMMA.SOURCE");
    assert_eq!(vol.record_content(id).expect("read failed"),lines);
    assert_eq!(vol.catalog().file_path(id),Some("ALPHA.BETA.GAMMA.SOURCE".to_string()));
    assert_eq!(vol.catalog().walk_dirs().len(),4);
    for lsec in 0..32 {
        assert_eq!(vol.read_sector(lsec).expect("read failed"),vol.read_sector(lsec+32).expect("read failed"));
    }
}

#[test]
fn subdirectories_sorted() {
    let mut vol = blank_hd(Controller::Hfdc,1);
    for name in ["ZED","MID","ABC"] {
        vol.create_subdirectory(DirId::ROOT,name).expect("mkdir failed");
    }
    let names: Vec<String> = vol.subdirectories(DirId::ROOT).iter().map(|d| d.name.clone()).collect();
    assert_eq!(names,vec!["ABC".to_string(),"MID".to_string(),"ZED".to_string()]);
    let mid = match vol.resolve("MID").expect("not found") {
        Entry::Dir(d) => d,
        Entry::File(_) => panic!("expected a directory")
    };
    vol.rename_dir(mid,"AAA").expect("rename failed");
    let names: Vec<String> = vol.subdirectories(DirId::ROOT).iter().map(|d| d.name.clone()).collect();
    assert_eq!(names,vec!["AAA".to_string(),"ABC".to_string(),"ZED".to_string()]);
    vol.delete_dir(mid).expect("delete failed");
    assert_eq!(vol.subdirectories(DirId::ROOT).len(),2);
    assert!(vol.check_bitmap());
}

#[test]
fn undo_directory() {
    let mut vol = blank_hd(Controller::Hfdc,2);
    let before = vol.to_bytes().expect("serialize failed");
    let free = vol.free_aus();
    vol.create_subdirectory(DirId::ROOT,"TEMP").expect("mkdir failed");
    assert_eq!(vol.free_aus(),free - 2);
    vol.undo().expect("undo failed");
    assert_eq!(vol.free_aus(),free);
    assert!(vol.resolve("TEMP").is_err());
    assert_eq!(vol.to_bytes().expect("serialize failed"),before);
    assert!(vol.undo().is_err());
}

#[test]
fn failed_change_rolls_back() {
    let mut vol = blank_hd(Controller::Hfdc,16);
    let before = vol.to_bytes().expect("serialize failed");
    let free_sectors = vol.free_aus() * 16;
    let err = vol.create_program(DirId::ROOT,"HUGE",&vec![1;(free_sectors+1)*SECTOR_SIZE]).unwrap_err();
    assert!(matches!(err.downcast_ref::<fs::Error>(),Some(fs::Error::ImageFull{..})));
    assert_eq!(vol.to_bytes().expect("serialize failed"),before);
    assert!(vol.check_bitmap());
}

#[test]
fn broken_mirror() {
    let mut vol = blank_hd(Controller::Hfdc,1);
    let mut dat = vol.to_bytes().expect("serialize failed");
    dat[33*SECTOR_SIZE] ^= 0xff;
    let err = ti99kit::mount_bytestream(&dat,Some("hd"),MountOptions::default()).err().expect("expected error");
    assert!(matches!(err.downcast_ref::<fs::Error>(),Some(fs::Error::Format(_))));
}

#[test]
fn switch_controller() {
    let mut vol = blank_hd(Controller::Hfdc,1);
    let sub = vol.create_subdirectory(DirId::ROOT,"DATA").expect("mkdir failed");
    vol.create_program(sub,"PROG",&[0x42;1000]).expect("create failed");
    let scsi = convert::to_other_controller(&vol).expect("convert failed");
    assert_eq!(scsi.kind(),VolumeKind::HardDisk(Controller::Scsi));
    let vib = scsi.read_sector(0).expect("read failed");
    assert_eq!(vib[0x0c],0);
    assert_eq!(vib,scsi.read_sector(32).expect("read failed"));
    let id = file_id(&scsi,"DATA.PROG");
    assert_eq!(scsi.record_content(id).expect("read failed")[0],vec![0x42;1000]);
    // the source is untouched
    assert_eq!(vol.kind(),VolumeKind::HardDisk(Controller::Hfdc));

    let hfdc = convert::to_other_controller(&scsi).expect("convert failed");
    assert_eq!(hfdc.kind(),VolumeKind::HardDisk(Controller::Hfdc));
    let vib = hfdc.read_sector(0).expect("read failed");
    assert_eq!(vib[0x0c],32);
    assert_eq!(vib[0x10] & 0x0f,0);
    assert!(hfdc.resolve("DATA.PROG").is_ok());
}

#[test]
fn floppy_has_no_controller() {
    let img = img::sector_dump::SectorDump::create(Geometry::new(40,1,9,SECTOR_SIZE));
    let vol = Volume::format_floppy(Box::new(img),"SMALL").expect("format failed");
    assert!(convert::to_other_controller(&vol).is_err());
}

#[test]
fn shared_search() {
    let mut vol = blank_hd(Controller::Hfdc,1);
    let sub = vol.create_subdirectory(DirId::ROOT,"DOCS").expect("mkdir failed");
    vol.create_program(DirId::ROOT,"ONE",b"xxNEEDLExx").expect("create failed");
    vol.create_program(sub,"TWO",b"NEEDLE at start").expect("create failed");
    vol.create_program(sub,"THREE",b"nothing here").expect("create failed");
    let shared = SharedVolume::new(vol);

    let handle = shared.spawn_search(b"NEEDLE".to_vec(),Arc::new(AtomicBool::new(false)));
    let result = handle.join().expect("worker panicked").expect("search failed");
    assert!(!result.cancelled);
    assert_eq!(result.files_searched,3);
    let mut found: Vec<(String,usize)> = result.hits.iter().map(|h| (h.path.clone(),h.offset)).collect();
    found.sort();
    assert_eq!(found,vec![("DOCS.TWO".to_string(),0),("ONE".to_string(),2)]);

    let result = shared.search(b"NEEDLE",&AtomicBool::new(true)).expect("search failed");
    assert!(result.cancelled);
    assert!(result.hits.is_empty());

    // writers wait for the lock, the volume stays consistent
    shared.mutate(|v| v.create_program(DirId::ROOT,"FOUR",b"NEEDLE").map(|_| ())).expect("create failed");
    assert!(shared.read().check_bitmap());
    let vol = match shared.try_unwrap() {
        Ok(v) => v,
        Err(_) => panic!("handle still shared")
    };
    assert!(vol.resolve("FOUR").is_ok());
}

#[test]
fn reserved_area_hint() {
    for spau in [1,2,4,16] {
        let vol = blank_hd(Controller::Hfdc,spau);
        assert_eq!(vol.read_sector(0).expect("read failed")[0x0d],1);
    }
    // controllers often reserve a larger directory area, it is only a hint
    let mut vol = blank_hd(Controller::Hfdc,1);
    let mut dat = vol.to_bytes().expect("serialize failed");
    dat[0x0d] = 0x20;
    dat[32*SECTOR_SIZE + 0x0d] = 0x20;
    let mut vol = ti99kit::mount_bytestream(&dat,Some("hd"),MountOptions::default()).expect("mount failed");
    assert!(vol.check_bitmap());
    let free = vol.free_aus();
    vol.create_program(DirId::ROOT,"FITS",&[1;600]).expect("create failed");
    assert_eq!(vol.free_aus(),free - 4);
    assert_eq!(vol.read_sector(0).expect("read failed")[0x0d],0x20);
}
