use std::io::{self, Write};

use anyhow::Context;
use clap::Parser;
use isolens::{Iso, Record};

#[derive(Debug, Clone, Parser)]
pub struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Print the volume descriptors and detected extensions
    Info(ImageArgs),
    /// List the directory tree
    Ls(ImageArgs),
    /// Write a file's content to stdout
    Cat(CatArgs),
}

impl Command {
    pub fn image(&self) -> &ImageArgs {
        match self {
            Command::Info(args) | Command::Ls(args) => args,
            Command::Cat(args) => &args.image,
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct ImageArgs {
    /// Path or http(s) URL of the image
    input: String,
    /// Use the primary hierarchy even when a Joliet one exists
    #[arg(long)]
    no_joliet: bool,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct CatArgs {
    #[command(flatten)]
    image: ImageArgs,
    /// Path inside the image, `/`-separated
    path: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let image_args = args.cmd.image();
    simple_logger::SimpleLogger::new()
        .with_level(if image_args.verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Warn
        })
        .init()
        .unwrap();

    let image = open(image_args)?;
    match args.cmd {
        Command::Info(_) => info(image),
        Command::Ls(_) => ls(image),
        Command::Cat(args) => cat(image, &args.path),
    }
}

fn open(args: &ImageArgs) -> anyhow::Result<Iso> {
    let joliet = !args.no_joliet;
    let image = if args.input.starts_with("http://") || args.input.starts_with("https://") {
        isolens::open_url(&args.input, joliet)
    } else {
        isolens::open(&args.input, joliet)
    };
    image.with_context(|| format!("mounting {}", args.input))
}

fn info(image: Iso) -> anyhow::Result<()> {
    for vd in image.volume_descriptors() {
        println!("{vd:#?}");
    }
    println!("joliet: {}", image.is_joliet());
    println!("rock ridge: {}", image.is_rockridge());
    for (id, version) in image.susp_extensions() {
        println!("extension: {id} v{version}");
    }
    Ok(())
}

fn ls(mut image: Iso) -> anyhow::Result<()> {
    let root = image.root().clone();
    walk(&mut image, &root, "")?;
    Ok(())
}

fn walk(image: &mut Iso, dir: &Record, prefix: &str) -> anyhow::Result<()> {
    for child in image.children(dir)? {
        let name = child.name();
        if child.is_directory() {
            println!("{prefix}{name}/");
            walk(image, &child, &format!("{prefix}{name}/"))?;
        } else {
            println!("{prefix}{name} ({} bytes)", child.data_length);
        }
    }
    Ok(())
}

fn cat(mut image: Iso, path: &str) -> anyhow::Result<()> {
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let record = image.record(&components)?;
    anyhow::ensure!(!record.is_directory(), "{path} is a directory");
    let mut stream = image.content(&record)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut stream, &mut out)?;
    out.flush()?;
    Ok(())
}
