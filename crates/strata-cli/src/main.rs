use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use strata_common::types::PutAttributes;
use strata_storage::{ListOptions, LocalDiskStore, ObjectStore};
use strata_upload::{UploadConfig, UploadOptions, Uploader};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata", about = "Streams objects into a local multipart object store")]
struct Cli {
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// JSON upload config; falls back to STRATA_* environment variables.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file, or stdin when the source is `-`. Without
    /// `--content-type` a file's type is guessed from its extension.
    Put {
        key: String,
        source: String,
        #[arg(long)]
        part_size: Option<u64>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        cache_control: Option<String>,
        #[arg(long)]
        content_encoding: Option<String>,
        #[arg(long = "meta", value_parser = parse_meta)]
        metadata: Vec<(String, String)>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Fail instead of replacing an existing object.
        #[arg(long, default_value_t = false)]
        no_overwrite: bool,
    },
    /// Download an object to a file, or stdout when the target is `-`.
    Get { key: String, target: String },
    Head { key: String },
    Ls {
        #[arg(default_value = "")]
        prefix: String,
        /// Roll keys up to the first occurrence of this after the prefix.
        #[arg(long)]
        delimiter: Option<String>,
        #[arg(long, default_value_t = 1000)]
        max_keys: usize,
    },
    /// Remove objects. Missing keys count as removed.
    Rm {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// List multipart sessions that were never completed or aborted.
    Uploads,
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<UploadConfig> {
    Ok(match path {
        Some(path) => UploadConfig::from_json_file(path)?,
        None => UploadConfig::from_env()?,
    })
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::from_default_env()
        .add_directive("strata_upload=info".parse()?)
        .add_directive("strata_storage=info".parse()?)
        .add_directive("strata_cli=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let disk = Arc::new(LocalDiskStore::new(cli.data_dir.clone()).await.with_context(|| {
        format!("failed to open data directory {}", cli.data_dir.display())
    })?);
    let store: Arc<dyn ObjectStore> = disk.clone();

    match cli.command {
        Command::Put {
            key,
            source,
            part_size,
            concurrency,
            content_type,
            cache_control,
            content_encoding,
            metadata,
            token,
            timeout_secs,
            no_overwrite,
        } => {
            let uploader = Uploader::new(store, load_config(cli.config.as_ref())?);
            for (field, value) in uploader.config().summary() {
                info!(field, value = %value, "upload config");
            }
            let reader: Box<dyn AsyncRead + Unpin + Send> = if source == "-" {
                Box::new(tokio::io::stdin())
            } else {
                Box::new(
                    tokio::fs::File::open(&source)
                        .await
                        .with_context(|| format!("failed to open {source}"))?,
                )
            };

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling upload");
                    on_interrupt.cancel();
                }
            });

            let mut attributes = PutAttributes {
                content_type,
                cache_control,
                content_encoding,
                metadata: metadata.into_iter().collect(),
                no_overwrite,
            };
            if source != "-" {
                attributes = attributes.with_content_type_from_path(&source);
            }
            let options = UploadOptions {
                part_size,
                concurrency,
                attributes,
                idempotency_token: token,
                timeout: timeout_secs.map(std::time::Duration::from_secs),
            };
            let descriptor = uploader
                .upload_stream(&cancel, &key, reader, options)
                .await?;
            print_json(&descriptor)?;
        }
        Command::Get { key, target } => {
            let (descriptor, data) = store.get(&key).await?;
            if target == "-" {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&data).await?;
                stdout.flush().await?;
            } else {
                tokio::fs::write(&target, &data)
                    .await
                    .with_context(|| format!("failed to write {target}"))?;
                info!(key = %key, size = descriptor.size, target = %target, "object downloaded");
            }
        }
        Command::Head { key } => print_json(&store.head(&key).await?)?,
        Command::Ls {
            prefix,
            delimiter,
            max_keys,
        } => {
            if max_keys == 0 {
                bail!("--max-keys must be greater than zero");
            }
            let mut options = ListOptions::with_prefix(prefix).max_keys(max_keys);
            if let Some(delimiter) = delimiter {
                options = options.delimiter(delimiter);
            }
            let mut objects = Vec::new();
            let mut common_prefixes = BTreeSet::new();
            loop {
                let page = store.list(&options).await?;
                objects.extend(page.objects);
                common_prefixes.extend(page.common_prefixes);
                match page.next_marker {
                    Some(next) if page.is_truncated => options = options.marker(next),
                    _ => break,
                }
            }
            print_json(&serde_json::json!({
                "objects": objects,
                "common_prefixes": common_prefixes,
            }))?;
        }
        Command::Rm { keys } => {
            let failed = store.delete_batch(&keys).await?;
            info!(removed = keys.len() - failed.len(), failed = failed.len(), "objects removed");
            if !failed.is_empty() {
                bail!("failed to remove: {}", failed.join(", "));
            }
        }
        Command::Uploads => print_json(&disk.pending_uploads().await?)?,
    }

    Ok(())
}
