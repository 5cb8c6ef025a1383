use std::fs::File;
use std::io::{self, Write};

use anyhow::Context;
use colored::Colorize;
use fasc_storage::ingest::{check_harvest_file, create_or_update_payload, generate_oid, generate_pid, get_or_create_object};
use fasc_storage::{DigitalObject, FileSystemStorage, HarvestStatus, Payload, Storage, StorageConfig};
use serde_json::json;
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let storage = FileSystemStorage::new(&config)
        .with_context(|| format!("opening storage under {}", config.home.display()))?;
    debug!(root = %storage.root().display(), "storage opened");
    let format = cli.format;
    match cli.command {
        Command::Path(args) => cmd_path(&storage, args),
        Command::Create(args) => cmd_create(&storage, args),
        Command::Ls(_) => cmd_ls(&storage, &format),
        Command::Show(args) => cmd_show(&storage, args, &format),
        Command::Put(args) => cmd_put(&storage, args),
        Command::Cat(args) => cmd_cat(&storage, args),
        Command::Rm(args) => cmd_rm(&storage, args),
        Command::Meta(args) => cmd_meta(&storage, args, &format),
        Command::Harvest(args) => cmd_harvest(&storage, args),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let mut config = match &cli.config {
        Some(path) => StorageConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StorageConfig::default(),
    };
    if let Some(home) = &cli.home {
        config.home = home.clone();
    }
    if let Some(email) = &cli.email {
        config.email = email.clone();
    }
    Ok(config)
}

fn cmd_path(storage: &FileSystemStorage, args: PathArgs) -> anyhow::Result<()> {
    println!("{}", storage.object_path(&args.oid)?.display());
    Ok(())
}

fn cmd_create(storage: &FileSystemStorage, args: CreateArgs) -> anyhow::Result<()> {
    let mut object = storage.create_object(&args.oid)?;
    object.close()?;
    println!("{} Created object {}", "✓".green().bold(), args.oid.yellow());
    println!("  {}", object.path().display().to_string().dimmed());
    Ok(())
}

fn cmd_ls(storage: &FileSystemStorage, format: &OutputFormat) -> anyhow::Result<()> {
    let oids = storage.object_id_list();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&oids)?),
        OutputFormat::Text => {
            if oids.is_empty() {
                println!("No objects.");
            }
            for oid in &oids {
                println!("{}", oid.yellow());
            }
        }
    }
    Ok(())
}

fn cmd_show(storage: &FileSystemStorage, args: ShowArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let mut object = storage.get_object(&args.oid)?;
    let source = object.source_id().map(str::to_string);
    let mut rows = Vec::new();
    for pid in object.payload_id_list() {
        let payload = object.get_payload(&pid)?;
        rows.push(json!({
            "id": pid,
            "type": payload.payload_type().map(|t| t.to_string()),
            "label": payload.label(),
            "contentType": payload.content_type(),
            "linked": payload.is_linked(),
            "size": payload.size(),
            "lastModified": payload.last_modified(),
        }));
    }

    if let OutputFormat::Json = format {
        let out = json!({ "id": args.oid, "source": source, "payloads": rows });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Object {}", args.oid.yellow().bold());
    println!("  {}", object.path().display().to_string().dimmed());
    if rows.is_empty() {
        println!("\nNo payloads.");
    }
    for row in &rows {
        let pid = row["id"].as_str().unwrap_or_default();
        let marker = if source.as_deref() == Some(pid) { "*".green().bold() } else { " ".normal() };
        let linked = if row["linked"].as_bool().unwrap_or(false) { " (linked)".blue() } else { "".normal() };
        println!(
            "{} {:<24} {:<12} {:<28} {}{}",
            marker,
            pid.bold(),
            row["type"].as_str().unwrap_or("-").cyan(),
            row["contentType"].as_str().unwrap_or("-"),
            row["size"].as_u64().map(|s| s.to_string()).unwrap_or_else(|| "-".into()).dimmed(),
            linked,
        );
    }
    Ok(())
}

fn cmd_put(storage: &FileSystemStorage, args: PutArgs) -> anyhow::Result<()> {
    let pid = match args.pid {
        Some(pid) => pid,
        None => generate_pid(&args.file)?,
    };
    let mut object = get_or_create_object(storage, &args.oid)?;
    if args.link {
        let target = std::path::absolute(&args.file)
            .with_context(|| format!("resolving {}", args.file.display()))?;
        object.create_linked_payload(&pid, &target)?.close()?;
    } else {
        let file = File::open(&args.file)
            .with_context(|| format!("opening {}", args.file.display()))?;
        create_or_update_payload(&mut object, &pid, file)?.close()?;
    }
    let payload_type = object.get_payload(&pid)?.payload_type();
    object.close()?;

    let verb = if args.link { "Linked" } else { "Stored" };
    println!("{} {} {} in {}", "✓".green().bold(), verb, pid.bold(), args.oid.yellow());
    if let Some(t) = payload_type {
        println!("  Type: {}", t.to_string().cyan());
    }
    Ok(())
}

fn cmd_cat(storage: &FileSystemStorage, args: CatArgs) -> anyhow::Result<()> {
    let mut object = storage.get_object(&args.oid)?;
    let payload = object.get_payload(&args.pid)?;
    let mut stream = payload.open()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut stream, &mut out).context("writing payload to stdout")?;
    out.flush()?;
    payload.close()?;
    Ok(())
}

fn cmd_rm(storage: &FileSystemStorage, args: RmArgs) -> anyhow::Result<()> {
    match &args.pid {
        Some(pid) => {
            let mut object = storage.get_object(&args.oid)?;
            object.remove_payload(pid)?;
            object.close()?;
            println!("Removed payload {} from {}", pid.bold(), args.oid.yellow());
        }
        None => {
            storage.remove_object(&args.oid)?;
            println!("Removed object {}", args.oid.yellow());
        }
    }
    Ok(())
}

fn cmd_meta(storage: &FileSystemStorage, args: MetaArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let mut object = storage.get_object(&args.oid)?;
    if !args.set.is_empty() {
        let meta = object.metadata()?;
        for (key, value) in &args.set {
            meta.set(key.as_str(), value.as_str());
        }
        object.close()?;
    }

    let meta = object.metadata()?;
    match format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = meta
                .iter()
                .map(|(k, v)| (k.to_string(), json!(v)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Text => {
            for (key, value) in meta.iter() {
                println!("{} = {}", key.cyan(), value);
            }
        }
    }
    Ok(())
}

fn cmd_harvest(storage: &FileSystemStorage, args: HarvestArgs) -> anyhow::Result<()> {
    for file in &args.files {
        let status = check_harvest_file(storage, file)
            .with_context(|| format!("harvesting {}", file.display()))?;
        let oid = generate_oid(file)?;
        let label = match status {
            HarvestStatus::New => "new".green().bold(),
            HarvestStatus::Updated => "updated".yellow().bold(),
            HarvestStatus::Unchanged => "unchanged".dimmed(),
        };
        println!("  {:<10} {} {}", label, oid.dimmed(), file.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use clap::Parser;

    fn run(home: &Path, args: &[&str]) -> anyhow::Result<()> {
        let home = home.to_string_lossy().to_string();
        let mut argv = vec!["fasc", "--home", home.as_str(), "--email", "test@example.org"];
        argv.extend_from_slice(args);
        run_command(Cli::try_parse_from(argv)?)
    }

    fn open(home: &Path) -> FileSystemStorage {
        FileSystemStorage::new(&StorageConfig::new(home, "test@example.org")).unwrap()
    }

    #[test]
    fn create_put_and_remove() {
        let home = tempfile::tempdir().unwrap();
        let src = home.path().join("record.xml");
        std::fs::write(&src, b"<record/>").unwrap();

        run(home.path(), &["create", "abcdef123"]).unwrap();
        run(home.path(), &["put", "abcdef123", src.to_str().unwrap()]).unwrap();
        run(home.path(), &["put", "abcdef123", src.to_str().unwrap(), "--pid", "copy.xml"]).unwrap();

        let storage = open(home.path());
        let mut object = storage.get_object("abcdef123").unwrap();
        assert_eq!(object.source_id(), Some("record.xml"));
        assert_eq!(object.get_payload("copy.xml").unwrap().read_to_vec().unwrap(), b"<record/>");

        run(home.path(), &["rm", "abcdef123", "copy.xml"]).unwrap();
        assert!(!open(home.path()).get_object("abcdef123").unwrap().has_payload("copy.xml"));

        run(home.path(), &["rm", "abcdef123"]).unwrap();
        assert!(open(home.path()).object_id_list().is_empty());
    }

    #[test]
    fn put_link_records_reference() {
        let home = tempfile::tempdir().unwrap();
        let src = home.path().join("big.bin");
        std::fs::write(&src, b"external").unwrap();

        run(home.path(), &["put", "abcdef123", src.to_str().unwrap(), "--link"]).unwrap();
        let mut object = open(home.path()).get_object("abcdef123").unwrap();
        let payload = object.get_payload("big.bin").unwrap();
        assert!(payload.is_linked());
        assert_eq!(payload.read_to_vec().unwrap(), b"external");
    }

    #[test]
    fn meta_sets_values() {
        let home = tempfile::tempdir().unwrap();
        run(home.path(), &["create", "abcdef123"]).unwrap();
        run(home.path(), &["meta", "abcdef123", "title=Sample", "status=draft"]).unwrap();

        let mut object = open(home.path()).get_object("abcdef123").unwrap();
        let meta = object.metadata().unwrap();
        assert_eq!(meta.get("title"), Some("Sample"));
        assert_eq!(meta.get("status"), Some("draft"));
    }

    #[test]
    fn harvest_stores_files() {
        let home = tempfile::tempdir().unwrap();
        let src = home.path().join("notes.txt");
        std::fs::write(&src, b"hello").unwrap();

        run(home.path(), &["harvest", src.to_str().unwrap()]).unwrap();
        run(home.path(), &["harvest", src.to_str().unwrap()]).unwrap();
        assert_eq!(open(home.path()).object_id_list().len(), 1);
    }

    #[test]
    fn errors_surface() {
        let home = tempfile::tempdir().unwrap();
        assert!(run(home.path(), &["show", "missing1"]).is_err());
        assert!(run(home.path(), &["path", "short"]).is_err());
        run(home.path(), &["create", "abcdef123"]).unwrap();
        assert!(run(home.path(), &["create", "abcdef123"]).is_err());
        assert!(run(home.path(), &["cat", "abcdef123", "nope"]).is_err());
    }

    #[test]
    fn config_file_sets_namespace() {
        let home = tempfile::tempdir().unwrap();
        let config = home.path().join("fasc.toml");
        std::fs::write(&config, format!("home = {:?}\nemail = \"cfg@example.org\"\n", home.path())).unwrap();

        let cli = Cli::try_parse_from(["fasc", "--config", config.to_str().unwrap(), "create", "abcdef123"]).unwrap();
        run_command(cli).unwrap();

        let storage = FileSystemStorage::new(&StorageConfig::new(home.path(), "cfg@example.org")).unwrap();
        assert!(storage.contains("abcdef123"));
    }
}
