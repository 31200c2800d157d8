// test of the floppy and CF7 layouts
use ti99kit::img::{self,Container,Geometry,SECTOR_SIZE};
use ti99kit::fs::{self,DirId,Entry,FileFlag,MountOptions,RecordFormat,Volume,VolumeKind};

fn blank_dsdd(name: &str) -> Volume {
    let img = img::sector_dump::SectorDump::create(Geometry::new(40,2,18,SECTOR_SIZE));
    Volume::format_floppy(Box::new(img),name).expect("format failed")
}

fn is_fs_error(e: &ti99kit::DYNERR,pred: fn(&fs::Error) -> bool) -> bool {
    match e.downcast_ref::<fs::Error>() {
        Some(err) => pred(err),
        None => false
    }
}

#[test]
fn format() {
    let vol = blank_dsdd("WORK");
    assert_eq!(vol.name(),"WORK");
    assert_eq!(vol.kind(),VolumeKind::Floppy);
    assert_eq!(vol.total_aus(),1440);
    assert_eq!(vol.sectors_per_au(),1);
    // VIB and root file index
    assert_eq!(vol.free_aus(),1438);
    assert!(vol.check_bitmap());
    let vib = vol.read_sector(0).expect("read failed");
    assert_eq!(&vib[0x0d..0x10],b"DSK");
    assert!(vol.children(DirId::ROOT).is_empty());
}

#[test]
fn save_and_reopen() {
    let mut vol = blank_dsdd("WORK");
    let prog: Vec<u8> = (0..700).map(|i| (i % 251) as u8).collect();
    vol.create_program(DirId::ROOT,"LOADER",&prog).expect("create failed");
    let lines: Vec<Vec<u8>> = vec![b"HELLO".to_vec(),b"WORLD".to_vec()];
    vol.create_records_file(DirId::ROOT,"NOTES",RecordFormat::dis_var_80(),&lines).expect("create failed");
    let dat = vol.to_bytes().expect("serialize failed");
    assert_eq!(dat.len(),1440*SECTOR_SIZE);

    let vol = ti99kit::mount_bytestream(&dat,Some("dsk"),MountOptions::default()).expect("mount failed");
    assert!(vol.check_bitmap());
    let id = match vol.resolve("LOADER").expect("not found") {
        Entry::File(id) => id,
        Entry::Dir(_) => panic!("expected a file")
    };
    let f = vol.file(id).expect("no file");
    assert_eq!(f.meta.type_string(),"PROGRAM");
    assert_eq!(f.byte_len(),700);
    assert_eq!(&vol.record_content(id).expect("read failed")[0],&prog);
    let notes = match vol.resolve("NOTES").expect("not found") {
        Entry::File(id) => id,
        Entry::Dir(_) => panic!("expected a file")
    };
    assert_eq!(vol.file(notes).expect("no file").meta.type_string(),"DIS/VAR 80");
    assert_eq!(vol.record_content(notes).expect("read failed"),lines);
}

#[test]
fn allocate_then_free_restores_bitmap() {
    let mut vol = blank_dsdd("WORK");
    let before = vol.bitmap().clone();
    let aus = vol.allocate(10).expect("allocate failed");
    assert_eq!(aus.len(),10);
    assert_eq!(vol.free_aus(),before.free_count() - 10);
    vol.free(&aus).expect("free failed");
    assert_eq!(vol.bitmap(),&before);
}

#[test]
fn allocate_too_many() {
    let mut vol = blank_dsdd("WORK");
    let free = vol.free_aus();
    let err = vol.allocate(free + 1).unwrap_err();
    assert!(is_fs_error(&err,|e| matches!(e,fs::Error::ImageFull{..})));
    assert_eq!(vol.free_aus(),free);
}

#[test]
fn undo_once() {
    let mut vol = blank_dsdd("WORK");
    let pristine = vol.to_bytes().expect("serialize failed");
    let gen = vol.generation();
    vol.create_program(DirId::ROOT,"FIRST",&[1,2,3]).expect("create failed");
    assert!(vol.generation() > gen);
    assert!(vol.can_undo());
    vol.undo().expect("undo failed");
    assert!(vol.resolve("FIRST").is_err());
    assert_eq!(vol.to_bytes().expect("serialize failed"),pristine);
    let err = vol.undo().unwrap_err();
    assert!(is_fs_error(&err,|e| matches!(e,fs::Error::NothingToUndo)));
}

#[test]
fn duplicate_and_bad_names() {
    let mut vol = blank_dsdd("WORK");
    vol.create_program(DirId::ROOT,"ONE",&[0;10]).expect("create failed");
    let err = vol.create_program(DirId::ROOT,"ONE",&[0;10]).unwrap_err();
    assert!(is_fs_error(&err,|e| matches!(e,fs::Error::FileExists(_))));
    let err = vol.create_program(DirId::ROOT,"HAS.DOT",&[0;10]).unwrap_err();
    assert!(is_fs_error(&err,|e| matches!(e,fs::Error::InvalidName(_))));
    let err = vol.create_program(DirId::ROOT,"ELEVENCHARS",&[0;10]).unwrap_err();
    assert!(is_fs_error(&err,|e| matches!(e,fs::Error::InvalidName(_))));
    assert!(vol.check_bitmap());
}

#[test]
fn delete_frees_space() {
    let mut vol = blank_dsdd("WORK");
    let free = vol.free_aus();
    let id = vol.create_program(DirId::ROOT,"BIG",&vec![0x55;20*SECTOR_SIZE]).expect("create failed");
    // descriptor plus data
    assert_eq!(vol.free_aus(),free - 21);
    vol.delete(Entry::File(id)).expect("delete failed");
    assert_eq!(vol.free_aus(),free);
    assert!(vol.check_bitmap());
}

#[test]
fn root_subdirectory_limit() {
    let mut vol = blank_dsdd("WORK");
    let a = vol.create_subdirectory(DirId::ROOT,"ALPHA").expect("first failed");
    vol.create_subdirectory(DirId::ROOT,"BETA").expect("second failed");
    let free = vol.free_aus();
    assert!(vol.create_subdirectory(DirId::ROOT,"GAMMA").is_err());
    assert_eq!(vol.free_aus(),free);
    // no nesting on a floppy
    assert!(vol.create_subdirectory(a,"DEEP").is_err());
    vol.create_program(a,"INSIDE",&[9;100]).expect("create in subdir failed");
    match vol.resolve("ALPHA.INSIDE").expect("not found") {
        Entry::File(id) => assert_eq!(vol.file(id).expect("no file").parent,a),
        Entry::Dir(_) => panic!("expected a file")
    }
    let err = vol.delete_dir(a).unwrap_err();
    assert!(is_fs_error(&err,|e| matches!(e,fs::Error::DirectoryNotEmpty(_))));
}

#[test]
fn rename_keeps_order() {
    let mut vol = blank_dsdd("WORK");
    vol.create_program(DirId::ROOT,"B",&[0;10]).expect("create failed");
    let id = vol.create_program(DirId::ROOT,"C",&[0;10]).expect("create failed");
    vol.rename_file(id,"A").expect("rename failed");
    let names: Vec<String> = vol.children(DirId::ROOT).iter().map(|f| f.name.clone()).collect();
    assert_eq!(names,vec!["A".to_string(),"B".to_string()]);
}

#[test]
fn protection() {
    let mut vol = blank_dsdd("WORK");
    let id = vol.create_program(DirId::ROOT,"KEEP",&[0;10]).expect("create failed");
    vol.set_file_flag(id,FileFlag::Protected,true).expect("flag failed");
    assert!(vol.file(id).expect("no file").is_protected());
    vol.set_protected(true).expect("protect failed");
    let err = vol.create_program(DirId::ROOT,"NOPE",&[0;10]).unwrap_err();
    assert!(is_fs_error(&err,|e| matches!(e,fs::Error::Protected)));
    assert_eq!(vol.read_sector(0).expect("read failed")[0x10],b'P');
    vol.set_protected(false).expect("unprotect failed");
    vol.create_program(DirId::ROOT,"YES",&[0;10]).expect("create failed");
}

#[test]
fn read_only_mount() {
    let mut vol = blank_dsdd("WORK");
    let dat = vol.to_bytes().expect("serialize failed");
    let mut vol = ti99kit::mount_bytestream(&dat,None,MountOptions { read_only: true }).expect("mount failed");
    assert!(vol.create_program(DirId::ROOT,"NOPE",&[0;10]).is_err());
}

#[test]
fn cf7_refuses_subdirectories() {
    let img = img::cf7::Cf7::create(1);
    let mut vol = Volume::format_floppy(Box::new(img),"FLASH").expect("format failed");
    assert_eq!(vol.kind(),VolumeKind::Cf7);
    let before = vol.bitmap().clone();
    let err = vol.create_subdirectory(DirId::ROOT,"SUB").unwrap_err();
    assert!(is_fs_error(&err,|e| matches!(e,fs::Error::InvalidOperation(_))));
    assert_eq!(vol.bitmap(),&before);
    assert!(!vol.can_undo());
}

#[test]
fn archive_in_file() {
    let inner = {
        let img = img::sector_dump::SectorDump::create(Geometry::new(40,1,9,SECTOR_SIZE));
        let mut vol = Volume::format_floppy(Box::new(img),"INNER").expect("format failed");
        vol.create_program(DirId::ROOT,"HIDDEN",b"SECRET").expect("create failed");
        vol.to_bytes().expect("serialize failed")
    };
    let mut outer = blank_dsdd("OUTER");
    let id = outer.create_program(DirId::ROOT,"ARCHIVE",&inner).expect("create failed");
    let free = outer.free_aus();
    let nested = outer.unpack_archive(id).expect("unpack failed");
    assert_eq!(nested.name(),"INNER");
    assert!(nested.resolve("HIDDEN").is_ok());
    assert_eq!(outer.free_aus(),free);
    let plain = outer.create_program(DirId::ROOT,"PLAIN",b"not an image").expect("create failed");
    let err = outer.unpack_archive(plain).err().expect("expected error");
    assert!(is_fs_error(&err,|e| matches!(e,fs::Error::Format(_))));
}

#[test]
fn container_round_trip() {
    let mut vol = blank_dsdd("WORK");
    vol.create_program(DirId::ROOT,"X",&[1;300]).expect("create failed");
    let mut img = vol.into_container();
    let dat = img.to_bytes().expect("serialize failed");
    let mut again = ti99kit::create_container_from_bytestream(&dat,None).expect("identify failed");
    assert_eq!(again.to_bytes().expect("serialize failed"),dat);
}

#[test]
fn unreadable_change_rolls_back() {
    let mut vol = blank_dsdd("WORK");
    vol.create_program(DirId::ROOT,"KEEP",&[3;10]).expect("create failed");
    let before = vol.to_bytes().expect("serialize failed");
    // a file index entry pointing at sector 1 cannot be scanned
    let mut index = vol.read_sector(1).expect("read failed");
    index[0] = 0;
    index[1] = 1;
    let err = vol.write_sector(1,&index).unwrap_err();
    assert!(is_fs_error(&err,|e| matches!(e,fs::Error::Format(_))));
    assert_eq!(vol.to_bytes().expect("serialize failed"),before);
    assert!(vol.resolve("KEEP").is_ok());
    // the earlier change is still the one undone
    vol.undo().expect("undo failed");
    assert!(vol.resolve("KEEP").is_err());
}

#[test]
fn undo_protection() {
    let mut vol = blank_dsdd("WORK");
    vol.set_protected(true).expect("protect failed");
    assert!(vol.is_protected());
    vol.undo().expect("undo failed");
    assert!(!vol.is_protected());
    assert_eq!(vol.read_sector(0).expect("read failed")[0x10],b' ');
    vol.create_program(DirId::ROOT,"AFTER",&[0;10]).expect("create failed");
    // a read-only mount still refuses
    let dat = {
        vol.set_protected(true).expect("protect failed");
        vol.to_bytes().expect("serialize failed")
    };
    let mut ro = ti99kit::mount_bytestream(&dat,None,MountOptions { read_only: true }).expect("mount failed");
    assert!(ro.undo().is_err());
}
