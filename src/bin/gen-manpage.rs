//! Man page generator for spiadapter
//!
//! Writes `spiadapter.1` plus one page per subcommand
//! (`spiadapter-transfer.1`, `spiadapter-aux-mode.1`, ...).
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
#[allow(dead_code)]
mod cli;

fn render(cmd: clap::Command, name: &str, output_dir: &Path) -> std::io::Result<PathBuf> {
    let man = clap_mangen::Man::new(cmd).title(name.to_uppercase());
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;

    let output_path = output_dir.join(format!("{}.1", name));
    fs::write(&output_path, buffer)?;
    Ok(output_path)
}

fn render_tree(cmd: clap::Command, name: &str, output_dir: &Path) -> std::io::Result<()> {
    for sub in cmd.get_subcommands().filter(|s| !s.is_hide_set() && s.get_name() != "help") {
        let sub_name = format!("{}-{}", name, sub.get_name());
        render_tree(sub.clone(), &sub_name, output_dir)?;
    }
    let path = render(cmd, name, output_dir)?;
    println!("Man page generated at: {}", path.display());
    Ok(())
}

fn main() -> std::io::Result<()> {
    // Default to ./man directory
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));

    fs::create_dir_all(&output_dir)?;

    render_tree(cli::Cli::command(), "spiadapter", &output_dir)?;

    println!("\nTo view the man page:");
    println!("  man -l {}", output_dir.join("spiadapter.1").display());

    Ok(())
}
