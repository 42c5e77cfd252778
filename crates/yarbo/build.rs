use std::fs;
use std::path::Path;

use clap::CommandFactory;

// cli.rs needs nothing beyond clap and clap_complete, so the build script
// can compile it on its own.
#[path = "src/cli.rs"]
mod cli;

fn main() {
    println!("cargo::rerun-if-changed=src/cli.rs");

    let Some(out_dir) = std::env::var_os("OUT_DIR") else {
        panic!("OUT_DIR not set by Cargo");
    };
    let man_dir = Path::new(&out_dir).join("man");
    if let Err(e) = fs::create_dir_all(&man_dir) {
        panic!("cannot create {}: {e}", man_dir.display());
    }

    // `yarbo.1` plus `yarbo-<subcommand>.1` for every visible subcommand.
    let root = cli::Cli::command();
    write_page(&root, &man_dir);
    for sub in root.get_subcommands().filter(|s| !s.is_hide_set()) {
        write_page(&sub.clone().name(format!("yarbo-{}", sub.get_name())), &man_dir);
    }
}

fn write_page(cmd: &clap::Command, dir: &Path) {
    let path = dir.join(format!("{}.1", cmd.get_name()));
    let mut page = Vec::new();
    if let Err(e) = clap_mangen::Man::new(cmd.clone()).render(&mut page) {
        panic!("cannot render {}: {e}", path.display());
    }
    if let Err(e) = fs::write(&path, page) {
        panic!("cannot write {}: {e}", path.display());
    }
}
