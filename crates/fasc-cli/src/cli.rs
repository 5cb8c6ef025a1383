use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "fasc",
    about = "Fascinator object store: sharded digital objects and their payloads",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Storage configuration file (TOML, or JSON system config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Storage home directory, overriding the configuration
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Email whose MD5 names the storage namespace
    #[arg(long, global = true)]
    pub email: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the directory an object id maps to
    Path(PathArgs),
    /// Create an empty object
    Create(CreateArgs),
    /// List object ids in the store
    Ls(LsArgs),
    /// Show an object's payloads
    Show(ShowArgs),
    /// Store or link a file as a payload
    Put(PutArgs),
    /// Write a payload's content to stdout
    Cat(CatArgs),
    /// Remove an object, or one of its payloads
    Rm(RmArgs),
    /// Show or set object metadata
    Meta(MetaArgs),
    /// Bring local files up to date in the store
    Harvest(HarvestArgs),
}

#[derive(Args)]
pub struct PathArgs {
    pub oid: String,
}

#[derive(Args)]
pub struct CreateArgs {
    pub oid: String,
}

#[derive(Args)]
pub struct LsArgs {}

#[derive(Args)]
pub struct ShowArgs {
    pub oid: String,
}

#[derive(Args)]
pub struct PutArgs {
    pub oid: String,
    pub file: PathBuf,
    /// Payload id; defaults to the file name
    #[arg(long)]
    pub pid: Option<String>,
    /// Record a reference to the file instead of copying it
    #[arg(long)]
    pub link: bool,
}

#[derive(Args)]
pub struct CatArgs {
    pub oid: String,
    pub pid: String,
}

#[derive(Args)]
pub struct RmArgs {
    pub oid: String,
    pub pid: Option<String>,
}

#[derive(Args)]
pub struct MetaArgs {
    pub oid: String,
    #[arg(value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,
}

#[derive(Args)]
pub struct HarvestArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}
