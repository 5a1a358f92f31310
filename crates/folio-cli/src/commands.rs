use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use folio_git::Git2Repository;
use folio_protocol::Operation;
use folio_sdk::{Author, Change, ChangeKey, Editor, EditorConfig, FieldValue, FileStateStore, ObjectId, SyncPhase};
use folio_store::TomlCodec;
use folio_sync::{EngineConfig, SyncEngine};
use serde::Serialize;
use serde_json::json;

use crate::cli::*;

/// The git checkout inside a workspace. Cloning replaces it wholesale.
const CHECKOUT_DIR: &str = ".folio/checkout";
const CONFIG_FILE: &str = "folio.toml";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let editor = open(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Clone(args) => cmd_clone(&editor, format, args).await,
        Command::Objects(args) => cmd_objects(&editor, format, args).await,
        Command::Set(args) => cmd_set(&editor, format, args).await,
        Command::New(args) => cmd_new(&editor, format, args).await,
        Command::Rm(args) => cmd_rm(&editor, format, args).await,
        Command::Status(_) => cmd_status(&editor, format).await,
        Command::Sync(args) => cmd_sync(&editor, format, args).await,
        Command::RetryPush(args) => cmd_retry_push(&editor, format, args).await,
        Command::Reset(_) => cmd_reset(&editor, format),
    }
}

fn open(cli: &Cli) -> anyhow::Result<Editor> {
    let config_path = cli.config.clone().unwrap_or_else(|| cli.dir.join(CONFIG_FILE));
    let engine_config = if config_path.exists() {
        EngineConfig::load(&config_path)?
    } else {
        EngineConfig::default()
    }
    .with_env();
    let editor_config = EditorConfig {
        content_root: engine_config.content_root.clone(),
        ..EditorConfig::default()
    };

    let checkout = cli.dir.join(CHECKOUT_DIR);
    let repo = Git2Repository::open(&checkout)
        .with_context(|| format!("cannot open checkout at {}", checkout.display()))?;
    let engine = SyncEngine::new(Arc::new(repo), Arc::new(TomlCodec), engine_config);
    let client = folio_worker::spawn(engine);
    let state = FileStateStore::new(cli.dir.join(&editor_config.state_path));
    Ok(Editor::open(client, editor_config, Arc::new(state)))
}

/// Load the checkout's objects; every command but `clone` starts here.
async fn load(editor: &Editor) -> anyhow::Result<()> {
    if editor.repository().is_none() {
        bail!("no repository in this workspace; run `folio clone <url>` first");
    }
    editor.refresh().await.context("cannot read the checkout")?;
    Ok(())
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print phase changes to stderr while a network operation runs.
fn show_progress(editor: &Editor, format: OutputFormat) -> Option<tokio::task::JoinHandle<()>> {
    if format != OutputFormat::Text {
        return None;
    }
    let mut events = editor.client().subscribe();
    Some(tokio::spawn(async move {
        let mut last: Option<SyncPhase> = None;
        while let Ok(message) = events.recv().await {
            if let Operation::Progress(progress) = message.operation {
                if last != Some(progress.phase) {
                    eprintln!("  {}...", progress.phase.to_string().dimmed());
                    last = Some(progress.phase);
                }
            }
        }
    }))
}

/// Accept a full id or a unique prefix of one.
fn resolve(editor: &Editor, text: &str) -> anyhow::Result<ObjectId> {
    if let Ok(id) = ObjectId::parse(text) {
        return Ok(id);
    }
    let objects = editor.objects()?;
    let matches: Vec<ObjectId> = objects
        .iter()
        .map(|object| object.id)
        .filter(|id| id.to_string().starts_with(text))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no object matches {text}"),
        _ => bail!("{text} matches {} objects", matches.len()),
    }
}

fn describe_key(key: &ChangeKey) -> String {
    let mut out = format!("{} {}", key.object_id.short(), key.field);
    if let Some(index) = key.index {
        out.push_str(&format!("[{index}]"));
    }
    if let Some(child) = &key.child_field {
        out.push_str(&format!(".{child}"));
    }
    out
}

async fn cmd_clone(editor: &Editor, format: OutputFormat, args: CloneArgs) -> anyhow::Result<()> {
    let progress = show_progress(editor, format);
    editor.clone(&args.url, args.branch.as_deref(), args.token).await?;
    if let Some(task) = progress {
        task.abort();
    }
    let objects = editor.objects()?;
    let branch = editor.branch().unwrap_or_default();
    match format {
        OutputFormat::Json => print_json(&json!({
            "repository": args.url,
            "branch": branch,
            "objects": objects.len(),
        })),
        OutputFormat::Text => {
            println!("{} Cloned {} ({})", "✓".green().bold(), args.url.bold(), branch.yellow());
            println!("  {} objects", objects.len().to_string().bold());
            Ok(())
        }
    }
}

async fn cmd_objects(editor: &Editor, format: OutputFormat, args: ObjectsArgs) -> anyhow::Result<()> {
    load(editor).await?;
    let objects = editor.objects()?;
    let selected: Vec<_> = objects
        .iter()
        .filter(|o| args.object_type.as_deref().map_or(true, |t| o.object_type == t))
        .collect();
    if format == OutputFormat::Json {
        return print_json(&selected);
    }

    let mut current_type = None;
    for object in selected {
        if current_type != Some(&object.object_type) {
            println!("{}", object.object_type.bold());
            current_type = Some(&object.object_type);
        }
        let marker = if object.id.is_temp() {
            "new".green().to_string()
        } else if !editor.changed_fields(&object.id).is_empty() {
            "modified".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  {}  {}  {}  {}",
            object.id.short().cyan(),
            object.name,
            object.location.as_deref().unwrap_or("-").dimmed(),
            marker
        );
    }
    Ok(())
}

async fn cmd_set(editor: &Editor, format: OutputFormat, args: SetArgs) -> anyhow::Result<()> {
    load(editor).await?;
    let id = resolve(editor, &args.id)?;
    let value: FieldValue = if args.json {
        serde_json::from_str(&args.value).context("value is not valid JSON")?
    } else {
        FieldValue::string(args.value)
    };
    let key = match (args.index, args.child) {
        (Some(index), Some(child)) => ChangeKey::child(id, args.field, index, child),
        _ => ChangeKey::field(id, args.field),
    };
    let described = describe_key(&key);
    editor.record(Change::new(key, args.object_type, value))?;
    match format {
        OutputFormat::Json => print_json(&json!({ "set": described })),
        OutputFormat::Text => {
            println!("{} {}", "set".green(), described);
            Ok(())
        }
    }
}

async fn cmd_new(editor: &Editor, format: OutputFormat, args: NewArgs) -> anyhow::Result<()> {
    load(editor).await?;
    let id = editor.add_object(&args.name, &args.object_type)?;
    match format {
        OutputFormat::Json => print_json(&json!({ "id": id })),
        OutputFormat::Text => {
            println!("{} {} {} ({})", "created".green(), args.object_type.bold(), args.name, id.to_string().cyan());
            Ok(())
        }
    }
}

async fn cmd_rm(editor: &Editor, format: OutputFormat, args: RmArgs) -> anyhow::Result<()> {
    load(editor).await?;
    let id = resolve(editor, &args.id)?;
    editor.remove(id, args.field.as_deref(), args.index)?;
    let target = match (&args.field, args.index) {
        (Some(field), Some(index)) => format!("{} {field}[{index}]", id.short()),
        _ => id.short(),
    };
    match format {
        OutputFormat::Json => print_json(&json!({ "removed": target })),
        OutputFormat::Text => {
            println!("{} {}", "removed".red(), target);
            Ok(())
        }
    }
}

async fn cmd_status(editor: &Editor, format: OutputFormat) -> anyhow::Result<()> {
    load(editor).await?;
    let pending = editor.pending();
    if format == OutputFormat::Json {
        return print_json(&json!({
            "repository": editor.repository(),
            "branch": editor.branch(),
            "changes": pending.changes,
            "deletions": pending.deletions,
        }));
    }

    println!(
        "On {} ({})",
        editor.repository().unwrap_or_default().bold(),
        editor.branch().unwrap_or_default().yellow()
    );
    if pending.is_empty() {
        println!("\nNo pending edits.");
        return Ok(());
    }
    println!("\nPending edits:");
    for change in &pending.changes {
        let value = serde_json::to_string(&change.value)?;
        println!("  {} {} = {}", "set".green(), describe_key(&change.change_key), value);
    }
    for deletion in &pending.deletions {
        let target = match (&deletion.field, deletion.index) {
            (Some(field), Some(index)) => format!("{} {field}[{index}]", deletion.object_id.short()),
            _ => deletion.object_id.short(),
        };
        println!("  {} {}", "rm".red(), target);
    }
    Ok(())
}

async fn cmd_sync(editor: &Editor, format: OutputFormat, args: SyncArgs) -> anyhow::Result<()> {
    load(editor).await?;
    let author = Author::new(args.name, args.email);
    let progress = show_progress(editor, format);
    let result = editor.sync(&author, args.token).await;
    if let Some(task) = progress {
        task.abort();
    }
    let commit = match result {
        Ok(commit) => commit,
        Err(e) => {
            if e.engine_error().is_some_and(|data| data.committed) {
                eprintln!(
                    "{} changes were committed locally but not pushed; run `folio retry-push`",
                    "note:".yellow().bold()
                );
            }
            return Err(e.into());
        }
    };
    match format {
        OutputFormat::Json => print_json(&json!({ "commit": commit })),
        OutputFormat::Text => {
            match commit {
                Some(sha) => println!("{} Synced as {}", "✓".green().bold(), sha.yellow()),
                None => println!("{} Up to date, nothing to commit", "✓".green().bold()),
            }
            Ok(())
        }
    }
}

async fn cmd_retry_push(editor: &Editor, format: OutputFormat, args: RetryPushArgs) -> anyhow::Result<()> {
    load(editor).await?;
    let progress = show_progress(editor, format);
    let result = editor.retry_push(args.token).await;
    if let Some(task) = progress {
        task.abort();
    }
    let sha = result?;
    match format {
        OutputFormat::Json => print_json(&json!({ "commit": sha })),
        OutputFormat::Text => {
            println!("{} Pushed {}", "✓".green().bold(), sha.yellow());
            Ok(())
        }
    }
}

fn cmd_reset(editor: &Editor, format: OutputFormat) -> anyhow::Result<()> {
    let discarded = editor.pending();
    editor.reset()?;
    let count = discarded.changes.len() + discarded.deletions.len();
    match format {
        OutputFormat::Json => print_json(&json!({ "discarded": count })),
        OutputFormat::Text => {
            println!("Discarded {} pending edits", count.to_string().bold());
            Ok(())
        }
    }
}
