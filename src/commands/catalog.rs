use clap;
use colored::Colorize;
use crate::fs::{DirId,Entry,Volume};
use super::CommandError;
use crate::STDRESULT;

fn timestamp(t: Option<chrono::NaiveDateTime>) -> String {
    match t {
        Some(t) => t.format("%Y-%m-%d %H:%M").to_string(),
        None => "".to_string()
    }
}

/// Write the directory listing to stdout
pub fn catalog_to_stdout(vol: &Volume,dir: DirId) -> STDRESULT {
    let path = vol.catalog().dir_path(dir);
    println!();
    println!("{}: {}",vol.kind().to_string().to_uppercase(),match path.is_empty() {
        true => vol.name().bold().to_string(),
        false => [vol.name(),&path].join(".").bold().to_string()
    });
    println!();
    println!("{:10} {:>5} {:12} {:1} {:16}","NAME","SIZE","TYPE","P","UPDATED");
    println!("{:10} {:>5} {:12} {:1} {:16}","----","----","----","-","-------");
    for sub in vol.subdirectories(dir) {
        println!("{:10} {:>5} {:12}",sub.name.blue().bold(),"","DIR");
    }
    let mut files = vol.children(dir);
    files.sort_by(|a,b| a.name.cmp(&b.name));
    for f in files {
        let prot = match f.is_protected() { true => "P".red().to_string(), false => " ".to_string() };
        println!("{:10} {:>5} {:12} {:1} {:16}",f.name,f.sectors + 1,f.meta.type_string(),prot,timestamp(f.updated));
    }
    println!();
    println!("{} of {} AUs free, {} sectors per AU",vol.free_aus(),vol.total_aus(),vol.sectors_per_au());
    if !vol.check_bitmap() {
        println!("{}","allocation bitmap disagrees with the directory".yellow());
    }
    println!();
    Ok(())
}

pub fn catalog(cmd: &clap::ArgMatches) -> STDRESULT {
    let path_in_img = match cmd.get_one::<String>("file") {
        Some(path) => path.as_str(),
        None => "/"
    };
    let vol = match cmd.get_one::<String>("dimg") {
        Some(path_to_img) => crate::open_image_with(path_to_img,crate::fs::MountOptions { read_only: true })?,
        None => crate::open_image_from_stdin()?
    };
    match vol.resolve(path_in_img)? {
        Entry::Dir(dir) => catalog_to_stdout(&vol,dir),
        Entry::File(_) => Err(Box::new(CommandError::InvalidCommand))
    }
}
