use crate::cli::ListArgs;
use crate::util::format_bytes;
use eyre::{Context, Result, bail};
use ferry_core::enumeration::LocalEnumerator;
use ferry_core::{
    BackendKind, ContinuationToken, EnumerateOptions, ItemEntry, Location, NameResolver,
    TransferEntry,
};
use futures::StreamExt;
use serde::Serialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[derive(Serialize)]
struct EntryJson {
    path: String,
    is_dir: bool,
    size: u64,
    token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination: Option<String>,
}

impl EntryJson {
    fn from_item(item: &ItemEntry, token: String, destination: Option<String>) -> Self {
        Self {
            path: item.relative_path.clone(),
            is_dir: item.is_directory,
            size: item.source.size(),
            token,
            destination,
        }
    }
}

pub async fn run_ls(args: ListArgs) -> Result<()> {
    let root = Path::new(&args.path);
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let resume = args
        .resume
        .as_deref()
        .map(|encoded| {
            ContinuationToken::decode(encoded.trim())
                .with_context(|| format!("decoding resume token '{encoded}'"))
        })
        .transpose()?;

    let mut options = EnumerateOptions::default().with_directories(args.dirs);
    options.recursive = args.recursive;
    options.search_pattern = args.pattern.clone();

    let resolver = args
        .dest
        .map(|dest| NameResolver::for_pair(BackendKind::Local, dest.into()));

    let location = Location::Local(LocalEnumerator::new(root));
    let cancel = CancellationToken::new();
    let mut entries = location
        .enumerate(&options, resume.as_ref(), cancel.clone())
        .with_context(|| format!("enumerating {}", root.display()))?;

    let limit = args.limit.unwrap_or(usize::MAX);
    let mut printed = 0usize;
    let mut json_entries = Vec::new();
    let mut last_token = None;

    while printed < limit {
        let Some(entry) = entries.next().await else {
            break;
        };
        let item = match entry {
            TransferEntry::Item(item) => item,
            TransferEntry::Error(err) => {
                if let Some(token) = &last_token {
                    eprintln!("listing stopped; resume with --resume {token}");
                }
                bail!("listing {} failed: {err}", root.display());
            }
        };

        let token = item
            .continuation_token
            .encode()
            .context("encoding continuation token")?;
        let destination = resolver
            .map(|r| r.resolve(&item))
            .transpose()
            .with_context(|| format!("resolving destination name for {}", item.relative_path))?;

        if args.json {
            json_entries.push(EntryJson::from_item(&item, token.clone(), destination));
        } else {
            print_entry(&item, &token, destination.as_deref());
        }
        last_token = Some(token);
        printed += 1;
    }
    cancel.cancel();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&json_entries)?);
    } else if printed == 0 {
        println!("No entries under {}", root.display());
    }

    if printed == limit {
        if let Some(token) = last_token {
            eprintln!("limit reached; continue with --resume {token}");
        }
    }
    Ok(())
}

fn print_entry(item: &ItemEntry, token: &str, destination: Option<&str>) {
    let (indicator, size) = if item.is_directory {
        ("DIR ", "-".to_string())
    } else {
        ("FILE", format_bytes(item.source.size()))
    };
    match destination {
        Some(dest) => println!(
            "{} {:>12} {} -> {}\t{}",
            indicator, size, item.relative_path, dest, token
        ),
        None => println!("{} {:>12} {}\t{}", indicator, size, item.relative_path, token),
    }
}
