// test of the CHD container and hard disk conversions
use ti99kit::img::{self,Container,ContainerFormat,Geometry,SECTOR_SIZE};
use ti99kit::img::chd::{Chd,ChdParams};
use ti99kit::fs::{Controller,DirId,MountOptions,Volume,VolumeKind};
use ti99kit::convert;

fn chd_volume(version: u32) -> Volume {
    let params = ChdParams { version, ..Default::default() };
    let img = Chd::create(Geometry::new(40,4,32,SECTOR_SIZE),params).expect("create failed");
    Volume::format_harddisk(Box::new(img),"CHDVOL",Controller::Hfdc,1).expect("format failed")
}

#[test]
fn hunk_count() {
    let chd = Chd::create(Geometry::new(615,4,32,SECTOR_SIZE),ChdParams::default()).expect("create failed");
    assert_eq!(chd.logical_bytes(),0x1338000);
    assert_eq!(chd.hunk_bytes(),0x1000);
    assert_eq!(chd.hunk_count(),0x1338);
    assert_eq!(chd.sector_count(),0x13380);
}

#[test]
fn bad_params() {
    let geom = Geometry::new(10,2,32,SECTOR_SIZE);
    assert!(Chd::create(geom,ChdParams { version: 3, ..Default::default() }).is_err());
    assert!(Chd::create(geom,ChdParams { hunk_bytes: 1000, ..Default::default() }).is_err());
}

#[test]
fn volume_in_chd() {
    let mut vol = chd_volume(5);
    vol.create_program(DirId::ROOT,"INSIDE",&[0x33;2000]).expect("create failed");
    let dat = vol.to_bytes().expect("serialize failed");
    assert_eq!(&dat[0..8],b"MComprHD");
    let vol = ti99kit::mount_bytestream(&dat,Some("chd"),MountOptions::default()).expect("mount failed");
    assert_eq!(vol.container().what_am_i(),ContainerFormat::Chd);
    assert_eq!(vol.container().geometry(),Geometry::new(40,4,32,SECTOR_SIZE));
    assert!(vol.resolve("INSIDE").is_ok());
    assert!(vol.check_bitmap());
}

#[test]
fn version_round_trip() {
    let mut vol = chd_volume(4);
    vol.create_program(DirId::ROOT,"KEEP",b"some bytes to keep").expect("create failed");
    vol.to_bytes().expect("serialize failed");
    let sectors = img::read_all(vol.container()).expect("read failed");

    let mut v5 = convert::change_container_version(vol.container(),5).expect("to v5 failed");
    assert_eq!(v5.as_chd().map(|c| c.version()),Some(5));
    let v5_bytes = v5.to_bytes().expect("serialize failed");
    let v5 = ti99kit::create_container_from_bytestream(&v5_bytes,Some("chd")).expect("reload failed");
    assert_eq!(img::read_all(v5.as_ref()).expect("read failed"),sectors);

    let v4 = convert::change_container_version(v5.as_ref(),4).expect("to v4 failed");
    assert_eq!(v4.as_chd().map(|c| c.version()),Some(4));
    assert_eq!(img::read_all(v4.as_ref()).expect("read failed"),sectors);
}

#[test]
fn version_change_needs_chd() {
    let img = img::raw_hd::RawHd::create(Geometry::new(10,2,32,SECTOR_SIZE));
    let err = convert::change_container_version(&img,5).err().expect("expected error");
    assert!(matches!(err.downcast_ref::<convert::Error>(),Some(convert::Error::NotChd)));
}

#[test]
fn extract_stops_at_logical_end() {
    // 15 sectors in one 4096 byte hunk
    let geom = Geometry::new(3,1,5,SECTOR_SIZE);
    let data: Vec<u8> = (0..geom.byte_capacity()).map(|i| (i % 253) as u8).collect();
    let chd = Chd::from_logical(&data,geom,ChdParams::default()).expect("create failed");
    assert_eq!(chd.hunk_count(),1);
    let mut sink: Vec<u8> = Vec::new();
    let count = convert::extract_raw(&chd,&mut sink).expect("extract failed");
    assert_eq!(count,3840);
    assert_eq!(sink,data);
}

#[test]
fn extract_to_file() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("disk.raw");
    let mut vol = chd_volume(5);
    vol.create_program(DirId::ROOT,"X",&[7;10]).expect("create failed");
    let expected = img::read_all(vol.container()).expect("read failed");
    let count = convert::extract_raw_to_file(vol.container(),path.to_str().expect("bad path")).expect("extract failed");
    assert_eq!(count as usize,expected.len());
    assert_eq!(std::fs::read(&path).expect("read failed"),expected);
}

#[test]
fn hard_disk_container_change() {
    let mut vol = chd_volume(5);
    vol.create_program(DirId::ROOT,"MOVE",&[0x5a;3000]).expect("create failed");
    let raw = convert::convert(&vol,ContainerFormat::RawHd,&Default::default()).expect("to raw failed");
    assert_eq!(raw.container().what_am_i(),ContainerFormat::RawHd);
    assert_eq!(raw.container().geometry(),Geometry::new(40,4,32,SECTOR_SIZE));
    assert!(raw.resolve("MOVE").is_ok());
    let back = convert::convert(&raw,ContainerFormat::Chd,&Default::default()).expect("to chd failed");
    assert_eq!(img::read_all(back.container()).expect("read failed"),img::read_all(vol.container()).expect("read failed"));
    // a hard disk does not fit a floppy container
    assert!(convert::convert(&vol,ContainerFormat::SectorDump,&Default::default()).is_err());
}

#[test]
fn scsi_chd_has_512_byte_units() {
    let img = img::raw_hd::RawHd::create(Geometry::new(40,4,32,SECTOR_SIZE));
    let vol = Volume::format_harddisk(Box::new(img),"SCSI",Controller::Scsi,1).expect("format failed");
    let chd = convert::convert(&vol,ContainerFormat::Chd,&Default::default()).expect("to chd failed");
    assert_eq!(chd.kind(),VolumeKind::HardDisk(Controller::Scsi));
    assert_eq!(chd.container().geometry().sector_len,512);
    assert_eq!(chd.container().sector_count(),5120);
}
