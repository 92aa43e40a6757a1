use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use indicatif::ProgressBar;

use crate::parser::{combined::CombinedParser, LogParser};
use crate::store::LogStore;
use crate::IngestArgs;

/// Only files named like `access_*` are eligible; everything else in a vhost
/// folder (error logs, rotation leftovers) is ignored.
const LOG_FILE_PREFIX: &str = "access_";

enum LogFileType {
    Plain,
    Gzip,
}

fn deduce_log_file_type(filename: &str) -> LogFileType {
    if filename.ends_with(".gz") {
        LogFileType::Gzip
    } else {
        LogFileType::Plain
    }
}

fn open_log_file(path: &Path) -> Result<BufReader<Box<dyn Read>>> {
    let file =
        File::open(path).with_context(|| format!("open log file {} failed", path.display()))?;
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    Ok(match deduce_log_file_type(filename) {
        LogFileType::Plain => BufReader::new(Box::new(file)),
        LogFileType::Gzip => BufReader::new(Box::new(MultiGzDecoder::new(file))),
    })
}

/// One folder per vhost directly under the log root; the folder name is the
/// vhost name attached to every record ingested from it.
fn vhost_folders(logdir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut folders: Vec<(String, PathBuf)> = std::fs::read_dir(logdir)
        .with_context(|| format!("read log directory {} failed", logdir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().ok().map_or(false, |ft| ft.is_dir()))
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| (name.to_string(), entry.path()))
        })
        .collect();
    folders.sort();
    Ok(folders)
}

fn log_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)
        .with_context(|| format!("read vhost folder {} failed", folder.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().ok().map_or(false, |ft| ft.is_file())
                && entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| name.starts_with(LOG_FILE_PREFIX))
        })
        .map(|entry| entry.path())
        .collect();
    files.sort();
    Ok(files)
}

#[derive(Debug, Default)]
struct FileSummary {
    inserted: usize,
    skipped: usize,
}

/// Ingest one file inside one transaction: either all of its parsable lines
/// are committed or none are. Lines that do not match the grammar are
/// skipped and counted, they never abort the file.
fn ingest_file(
    store: &mut LogStore,
    parser: &impl LogParser,
    vhost: &str,
    path: &Path,
) -> Result<FileSummary> {
    let reader = open_log_file(path)?;
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {} failed", path.display()))?;
        match parser.parse(vhost, &line) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                tracing::debug!("skipping line in {}: {}", path.display(), e);
            }
        }
    }
    let inserted = store
        .insert_batch(&records)
        .with_context(|| format!("insert records from {} failed", path.display()))?;
    Ok(FileSummary { inserted, skipped })
}

pub fn run(args: &IngestArgs) -> Result<()> {
    let mut store = LogStore::open(&args.db)
        .with_context(|| format!("open store {} failed", args.db.display()))?;
    if args.db_reset {
        store.reset().context("reset store failed")?;
        tracing::info!("Store reset");
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for (vhost, folder) in vhost_folders(&args.logdir)? {
        for path in log_files(&folder)? {
            files.push((vhost.clone(), path));
        }
    }

    let progressbar = ProgressBar::new(files.len() as u64);
    let mut inserted = 0usize;
    let mut skipped = 0usize;
    let total_files = files.len();
    for (vhost, path) in files {
        tracing::debug!("Processing {}", path.display());
        let summary = ingest_file(&mut store, &CombinedParser::default(), &vhost, &path)?;
        inserted += summary.inserted;
        skipped += summary.skipped;
        progressbar.inc(1);
    }
    progressbar.finish_and_clear();

    tracing::info!(
        "Ingested {} records from {} files ({} lines skipped)",
        inserted,
        total_files,
        skipped
    );
    Ok(())
}
