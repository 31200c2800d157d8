use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use assert_cmd::Command; // Run programs

type STDRESULT = Result<(),Box<dyn std::error::Error>>;

fn mkdsk(path: &std::path::Path,kind: &str,typ: &str) -> STDRESULT {
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("mkdsk")
        .arg("-v").arg("TESTVOL").arg("-k").arg(kind).arg("-t").arg(typ)
        .arg("-d").arg(path)
        .assert()
        .success();
    Ok(())
}

#[test]
fn mk_floppy_dsk() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let dimg_path = dir.path().join("work.dsk");
    mkdsk(&dimg_path,"dsdd","dsk")?;
    assert_eq!(std::fs::metadata(&dimg_path)?.len(),1440*256);
    Ok(())
}

#[test]
fn mk_refuses_overwrite() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let dimg_path = dir.path().join("work.dsk");
    mkdsk(&dimg_path,"sssd","dsk")?;
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("mkdsk")
        .arg("-v").arg("AGAIN").arg("-k").arg("sssd").arg("-t").arg("dsk")
        .arg("-d").arg(&dimg_path)
        .assert()
        .failure();
    Ok(())
}

#[test]
fn mk_hard_disk_chd() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let dimg_path = dir.path().join("hd.chd");
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("mkdsk")
        .arg("-v").arg("HARD").arg("-k").arg("hd").arg("-t").arg("chd")
        .arg("--cyls").arg("20").arg("--heads").arg("2").arg("--secs").arg("32")
        .arg("-d").arg(&dimg_path)
        .assert()
        .success();
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("verify").arg("-d").arg(&dimg_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));
    Ok(())
}

#[test]
fn put_get_text() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let dimg_path = dir.path().join("work.dsk");
    mkdsk(&dimg_path,"dssd","dsk")?;
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("put").arg("-t").arg("txt").arg("-f").arg("NOTES").arg("-d").arg(&dimg_path)
        .write_stdin("FIRST LINE\nSECOND LINE\n")
        .assert()
        .success();
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("get").arg("-t").arg("txt").arg("-f").arg("NOTES").arg("-d").arg(&dimg_path)
        .assert()
        .success()
        .stdout("FIRST LINE\nSECOND LINE\n");
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("catalog").arg("-d").arg(&dimg_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("NOTES").and(predicate::str::contains("DIS/VAR 80")));
    Ok(())
}

#[test]
fn put_get_program() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let dimg_path = dir.path().join("work.dsk");
    mkdsk(&dimg_path,"dsdd","dsk")?;
    let prog: Vec<u8> = (0..600).map(|i| (i % 200) as u8).collect();
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("put").arg("-t").arg("prog").arg("-f").arg("LOAD").arg("-d").arg(&dimg_path)
        .write_stdin(prog.clone())
        .assert()
        .success();
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("get").arg("-t").arg("prog").arg("-f").arg("LOAD").arg("-d").arg(&dimg_path)
        .assert()
        .success()
        .stdout(predicate::eq(prog));
    Ok(())
}

#[test]
fn directories_and_search() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let dimg_path = dir.path().join("work.dsk");
    mkdsk(&dimg_path,"dsdd","dsk")?;
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("mkdir").arg("-f").arg("UTIL").arg("-d").arg(&dimg_path)
        .assert()
        .success();
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("put").arg("-t").arg("txt").arg("-f").arg("UTIL.README").arg("-d").arg(&dimg_path)
        .write_stdin("FIND ME HERE\n")
        .assert()
        .success();
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("search").arg("-p").arg("ME HERE").arg("-d").arg(&dimg_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("UTIL.README"));
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("delete").arg("-f").arg("UTIL").arg("-d").arg(&dimg_path)
        .assert()
        .failure();
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("delete").arg("-f").arg("UTIL.README").arg("-d").arg(&dimg_path)
        .assert()
        .success();
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("delete").arg("-f").arg("UTIL").arg("-d").arg(&dimg_path)
        .assert()
        .success();
    Ok(())
}

#[test]
fn protect_volume() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let dimg_path = dir.path().join("work.dsk");
    mkdsk(&dimg_path,"sssd","dsk")?;
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("protect").arg("-d").arg(&dimg_path)
        .assert()
        .success();
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("mkdir").arg("-f").arg("NOPE").arg("-d").arg(&dimg_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("protected"));
    Ok(())
}

#[test]
fn convert_and_extract() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let dimg_path = dir.path().join("work.dsk");
    let hfe_path = dir.path().join("work.hfe");
    let raw_path = dir.path().join("work.bin");
    mkdsk(&dimg_path,"dsdd","dsk")?;
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("convert").arg("-t").arg("hfe").arg("-d").arg(&dimg_path).arg("-o").arg(&hfe_path)
        .assert()
        .success();
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("extract").arg("-d").arg(&hfe_path).arg("-o").arg(&raw_path)
        .assert()
        .success();
    assert_eq!(std::fs::read(&raw_path)?,std::fs::read(&dimg_path)?);
    Ok(())
}

#[test]
fn invalid_item_type() -> STDRESULT {
    let mut cmd = Command::cargo_bin("ti99kit")?;
    cmd.arg("get").arg("-t").arg("bogus").arg("-f").arg("X").arg("-d").arg("nothing.dsk")
        .assert()
        .failure()
        .stderr(predicate::str::contains("bogus"));
    Ok(())
}
