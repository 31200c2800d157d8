use clap::{crate_version, Arg, ArgAction, Command, ValueHint};

const IN_HELP: &str = "if disk image is piped, omit `--dimg` option";
const F_LONG_HELP: &str = "interpretation depends on type, for files this is
the usual notion of a path, with `.` or `/` between directories (e.g. UTIL.ASSM),
for sectors it is the logical sector number, for metadata it is ignored";
const T_LONG_HELP: &str = "Types are separated into file, sector, and metadata categories.
`prog` is a memory image, `txt` is DIS/VAR 80 text, `rec` shows records with hex escapes,
`raw` is every data sector of the file.";

fn file_arg(help: &'static str, req: bool) -> Arg {
    Arg::new("file").short('f').long("file").value_name("PATH").required(req).help(help)
}

fn dimg_arg(req: bool) -> Arg {
    Arg::new("dimg").short('d').long("dimg").help("path to disk image itself")
        .value_name("PATH")
        .value_hint(ValueHint::FilePath)
        .required(req)
}

fn output_arg() -> Arg {
    Arg::new("output").short('o').long("output").help("path of the new image or file")
        .value_name("PATH")
        .value_hint(ValueHint::FilePath)
        .required(true)
}

fn chd_version_arg() -> Arg {
    Arg::new("chd-version").long("chd-version").help("CHD version to write")
        .value_name("VERSION")
        .value_parser(["4","5"])
        .required(false)
}

pub fn build_cli() -> Command {
    let long_help = "ti99kit is always invoked with exactly one of several subcommands.
The subcommands are generally designed to function as nodes in a pipeline.
Set RUST_LOG environment variable to control logging level.
  levels: trace,debug,info,warn,error

Examples:
---------
create floppy image:   `ti99kit mkdsk -v WORK -k dsdd -t dsk -d work.dsk`
create hard disk:      `ti99kit mkdsk -v HARD -k hd -t chd --cyls 100 --heads 4 --secs 32 -d hd.chd`
list a directory:      `ti99kit catalog -d hd.chd -f UTIL`
copy text in:          `cat notes.txt | ti99kit put -t txt -f NOTES -d work.dsk`
copy text out:         `ti99kit get -t txt -f NOTES -d work.dsk`
change container:      `ti99kit convert -t hfe -d work.dsk -o work.hfe`";

    let img_types = ["dsk", "dtk", "hfe", "chd", "raw", "cf7"];
    let disk_kinds = ["sssd", "dssd", "dsdd", "dsdd80", "cf7", "hd"];
    let get_put_types = ["raw", "prog", "txt", "rec", "sec", "meta"];
    let flags = ["protected", "modified", "emulate"];

    let mut main_cmd = Command::new("ti99kit")
        .about("Manipulates TI-99/4A disk images, floppy, CF7 and hard disk.")
        .after_long_help(long_help)
        .version(crate_version!());

    main_cmd = main_cmd.subcommand(
        Command::new("mkdsk")
            .arg(Arg::new("volume").long("volume").short('v').help("volume name").value_name("NAME").required(true))
            .arg(Arg::new("type").long("type").short('t').help("type of disk image to create")
                .value_name("TYPE").required(true).value_parser(img_types))
            .arg(Arg::new("kind").long("kind").short('k').help("kind of disk")
                .value_name("KIND").value_parser(disk_kinds).required(false).default_value("dsdd"))
            .arg(dimg_arg(true))
            .arg(Arg::new("count").long("count").help("volumes on a CF7 card").value_name("NUM").default_value("1"))
            .arg(Arg::new("controller").long("controller").help("hard disk controller").value_name("CONTROLLER")
                .value_parser(["hfdc","scsi"]).default_value("hfdc"))
            .arg(Arg::new("au").long("au").help("sectors per allocation unit").value_name("SECTORS")
                .value_parser(["1","2","4","8","16"]).default_value("1"))
            .arg(Arg::new("cyls").long("cyls").help("hard disk cylinders").value_name("NUM").default_value("100"))
            .arg(Arg::new("heads").long("heads").help("hard disk heads").value_name("NUM").default_value("4"))
            .arg(Arg::new("secs").long("secs").help("hard disk sectors per track").value_name("NUM").default_value("32"))
            .arg(chd_version_arg().default_value("5"))
            .about("write a blank disk image to the given path")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("catalog")
            .arg(file_arg("path of directory inside disk image",false))
            .arg(dimg_arg(false))
            .about("write disk image catalog to stdout")
            .after_help(IN_HELP)
    );
    main_cmd = main_cmd.subcommand(
        Command::new("get")
            .arg(file_arg("path or sector, maybe inside disk image",false).long_help(F_LONG_HELP).default_value("0"))
            .arg(Arg::new("type").long("type").short('t').help("type of the item")
                .value_name("TYPE").required(true).value_parser(get_put_types).long_help(T_LONG_HELP))
            .arg(dimg_arg(false))
            .arg(Arg::new("archive").long("archive").short('a').help("read through an archive file inside the image")
                .value_name("PATH").required(false))
            .about("read from disk image, write to stdout")
            .after_help(IN_HELP)
    );
    main_cmd = main_cmd.subcommand(
        Command::new("put")
            .arg(file_arg("path or sector inside disk image",true).long_help(F_LONG_HELP))
            .arg(Arg::new("type").long("type").short('t').help("type of the item")
                .value_name("TYPE").required(true).value_parser(get_put_types).long_help(T_LONG_HELP))
            .arg(dimg_arg(true))
            .arg(Arg::new("len").long("len").short('l').help("maximum record length for text and records")
                .value_name("LENGTH").required(false))
            .about("read from stdin, write to disk image")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("mkdir")
            .arg(file_arg("path inside disk image of new directory",true))
            .arg(dimg_arg(true))
            .about("create a new directory inside a disk image")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("delete")
            .arg(file_arg("path inside disk image to delete",true))
            .arg(dimg_arg(true))
            .about("delete a file or empty directory inside a disk image")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("rename")
            .arg(file_arg("path inside disk image to rename, omit to rename the volume",false))
            .arg(Arg::new("name").long("name").short('n').help("new name").value_name("NAME").required(true))
            .arg(dimg_arg(true))
            .about("rename a file, directory, or volume")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("protect")
            .arg(file_arg("path inside disk image, omit to protect the volume",false))
            .arg(Arg::new("flag").long("flag").help("file flag to set").value_name("FLAG").value_parser(flags).required(false))
            .arg(dimg_arg(true))
            .about("set the protection or another flag")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("unprotect")
            .arg(file_arg("path inside disk image, omit to unprotect the volume",false))
            .arg(Arg::new("flag").long("flag").help("file flag to clear").value_name("FLAG").value_parser(flags).required(false))
            .arg(dimg_arg(true))
            .about("clear the protection or another flag")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("convert")
            .arg(dimg_arg(true))
            .arg(output_arg())
            .arg(Arg::new("type").long("type").short('t').help("type of the new container")
                .value_name("TYPE").required(true).value_parser(img_types))
            .arg(Arg::new("encoding").long("encoding").help("track encoding for dtk and hfe")
                .value_name("ENC").value_parser(["fm","mfm"]).required(false))
            .arg(chd_version_arg())
            .arg(Arg::new("hunk").long("hunk").help("CHD hunk size in bytes").value_name("BYTES").required(false))
            .about("copy the volume into another container format")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("chd")
            .arg(dimg_arg(true))
            .arg(output_arg())
            .arg(chd_version_arg().required(true))
            .about("rewrite a CHD at another version")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("extract")
            .arg(dimg_arg(true))
            .arg(output_arg())
            .about("write the logical sectors of an image to a plain file")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("controller")
            .arg(dimg_arg(true))
            .arg(output_arg())
            .about("switch a hard disk volume between HFDC and SCSI")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("search")
            .arg(dimg_arg(true))
            .arg(Arg::new("pattern").long("pattern").short('p').help("bytes to find, `\\xNN` escapes allowed")
                .value_name("TEXT").required(true))
            .arg(Arg::new("timeout").long("timeout").help("give up after this many seconds").value_name("SECONDS").required(false))
            .about("find files that contain a byte pattern")
    );
    main_cmd = main_cmd.subcommand(
        Command::new("verify")
            .arg(dimg_arg(true))
            .arg(Arg::new("quiet").long("quiet").short('q').help("only set the exit status").action(ArgAction::SetTrue))
            .about("check that the allocation bitmap agrees with the directory")
    );
    main_cmd
}
