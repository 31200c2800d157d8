//! # Command Line Interface
//!
//! Simple subcommands are directly in `main.rs`.
//! More elaborate subcommands are in the `commands` module.

use env_logger;
#[cfg(windows)]
use colored;
use log::{error,info};
use ti99kit::commands;
use ti99kit::commands::CommandError;
use ti99kit::fs::MountOptions;

mod cli;

fn main() -> Result<(),Box<dyn std::error::Error + Send + Sync>>
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    #[cfg(windows)]
    let _ = colored::control::set_virtual_terminal(true);

    let matches = cli::build_cli().get_matches();

    // Create a disk image

    if let Some(cmd) = matches.subcommand_matches("mkdsk") {
        return commands::mkdsk::mkdsk(cmd);
    }

    // Catalog, get, put

    if let Some(cmd) = matches.subcommand_matches("catalog") {
        return commands::catalog::catalog(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("get") {
        return commands::get::get(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("put") {
        return commands::put::put(cmd);
    }

    // Modify items inside an image

    if let Some(cmd) = matches.subcommand_matches("mkdir") {
        return commands::modify::mkdir(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("delete") {
        return commands::modify::delete(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("rename") {
        return commands::modify::rename(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("protect") {
        return commands::modify::flag(cmd,true);
    }
    if let Some(cmd) = matches.subcommand_matches("unprotect") {
        return commands::modify::flag(cmd,false);
    }

    // Conversions

    if let Some(cmd) = matches.subcommand_matches("convert") {
        return commands::convert::convert(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("chd") {
        return commands::convert::chd_version(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("extract") {
        return commands::convert::extract(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("controller") {
        return commands::convert::controller(cmd);
    }

    if let Some(cmd) = matches.subcommand_matches("search") {
        return commands::search::search(cmd);
    }

    // Verify the allocation bitmap

    if let Some(cmd) = matches.subcommand_matches("verify") {
        let path_to_img = cmd.get_one::<String>("dimg").expect("unreachable was reached");
        let vol = ti99kit::open_image_with(path_to_img,MountOptions { read_only: true })?;
        if vol.check_bitmap() {
            info!("bitmap of `{}` is consistent",vol.name());
            if !cmd.get_flag("quiet") {
                println!("OK");
            }
            return Ok(());
        }
        error!("bitmap of `{}` disagrees with the directory",vol.name());
        return Err(Box::new(CommandError::InvalidCommand));
    }

    error!("No subcommand was found, try `ti99kit --help`");
    Err(Box::new(CommandError::InvalidCommand))
}
