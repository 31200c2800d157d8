// test of track based floppy containers
use ti99kit::img::{self,Container,ContainerFormat,Geometry,SECTOR_SIZE};
use ti99kit::img::tracks::TrackEncoding;
use ti99kit::fs::{DirId,MountOptions,RecordFormat,Volume,VolumeKind};
use ti99kit::convert::{self,TargetParams};

fn populated(geom: Geometry) -> Volume {
    let img = img::sector_dump::SectorDump::create(geom);
    let mut vol = Volume::format_floppy(Box::new(img),"TRACKS").expect("format failed");
    let recs: Vec<Vec<u8>> = (0..40).map(|i| format!("RECORD NUMBER {}",i).into_bytes()).collect();
    vol.create_records_file(DirId::ROOT,"DATA",RecordFormat::dis_var_80(),&recs).expect("create failed");
    vol.create_program(DirId::ROOT,"CODE",&[0xa5;1500]).expect("create failed");
    vol
}

#[test]
fn sssd_to_pc99() {
    let vol = populated(Geometry::new(40,1,9,SECTOR_SIZE));
    let mut dtk = convert::convert(&vol,ContainerFormat::TrackDump,&TargetParams::default()).expect("convert failed");
    let dat = dtk.to_bytes().expect("serialize failed");
    assert_eq!(dat.len(),40*ti99kit::img::tracks::FM_TRACK_LEN_PC99);
    let again = ti99kit::mount_bytestream(&dat,None,MountOptions::default()).expect("mount failed");
    assert_eq!(again.container().what_am_i(),ContainerFormat::TrackDump);
    assert_eq!(again.container().geometry(),Geometry::new(40,1,9,SECTOR_SIZE));
    assert_eq!(img::read_all(again.container()).expect("read failed"),img::read_all(vol.container()).expect("read failed"));
}

#[test]
fn dsdd_to_hfe() {
    let vol = populated(Geometry::new(40,2,18,SECTOR_SIZE));
    let mut hfe = convert::convert(&vol,ContainerFormat::Hfe,&TargetParams::default()).expect("convert failed");
    let dat = hfe.to_bytes().expect("serialize failed");
    assert_eq!(&dat[0..8],b"HXCPICFE");
    let again = ti99kit::mount_bytestream(&dat,Some("hfe"),MountOptions::default()).expect("mount failed");
    assert_eq!(again.container().geometry(),Geometry::new(40,2,18,SECTOR_SIZE));
    let id = match again.resolve("DATA").expect("not found") {
        ti99kit::fs::Entry::File(id) => id,
        ti99kit::fs::Entry::Dir(_) => panic!("expected a file")
    };
    let recs = again.record_content(id).expect("read failed");
    assert_eq!(recs.len(),40);
    assert_eq!(recs[39],b"RECORD NUMBER 39".to_vec());
}

#[test]
fn write_through_tracks() {
    let img = img::track_dump::TrackDump::create(TrackEncoding::MFM,Geometry::new(40,2,18,SECTOR_SIZE)).expect("create failed");
    let mut vol = Volume::format_floppy(Box::new(img),"MFM").expect("format failed");
    vol.create_program(DirId::ROOT,"P",&[1,2,3,4]).expect("create failed");
    let dat = vol.to_bytes().expect("serialize failed");
    assert_eq!(dat.len(),80*ti99kit::img::tracks::MFM_TRACK_LEN_PC99);
    let again = ti99kit::mount_bytestream(&dat,Some("dtk"),MountOptions::default()).expect("mount failed");
    assert!(again.resolve("P").is_ok());
    assert!(again.check_bitmap());
}

#[test]
fn forced_encoding() {
    let vol = populated(Geometry::new(40,1,9,SECTOR_SIZE));
    let params = TargetParams { encoding: Some(TrackEncoding::MFM), ..Default::default() };
    let mut hfe = convert::convert(&vol,ContainerFormat::Hfe,&params).expect("convert failed");
    let dat = hfe.to_bytes().expect("serialize failed");
    let again = ti99kit::create_container_from_bytestream(&dat,Some("hfe")).expect("identify failed");
    assert_eq!(img::read_all(again.as_ref()).expect("read failed"),img::read_all(vol.container()).expect("read failed"));
}

#[test]
fn floppy_to_cf7() {
    let vol = populated(Geometry::new(40,2,18,SECTOR_SIZE));
    let cf7 = convert::convert(&vol,ContainerFormat::Cf7,&TargetParams::default()).expect("convert failed");
    assert_eq!(cf7.kind(),VolumeKind::Cf7);
    assert!(cf7.resolve("CODE").is_ok());
    // 80 track floppies are too big for a CF7 volume
    let big = populated(Geometry::new(80,2,18,SECTOR_SIZE));
    assert!(convert::convert(&big,ContainerFormat::Cf7,&TargetParams::default()).is_err());
}

#[test]
fn sector_out_of_range() {
    let img = img::track_dump::TrackDump::create(TrackEncoding::FM,Geometry::new(40,1,9,SECTOR_SIZE)).expect("create failed");
    assert!(img.read_sector(360).is_err());
    assert_eq!(img.read_sector(359).expect("read failed"),vec![0;SECTOR_SIZE]);
}
