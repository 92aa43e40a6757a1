use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use core::fmt;
use flate2::{write::GzEncoder, Compression};

use crate::filter::LogFilter;
use crate::record::Record;
use crate::store::LogStore;
use crate::ExportArgs;

/// The report generator consumes VCOMBINED lines on stdin and writes the
/// report itself; stdout and stderr only ever carry diagnostics.
const REPORT_PROGRAM: &str = "goaccess";

#[derive(Debug)]
pub enum ExportError {
    ReportSpawn(std::io::Error),
    ReportFailed { status: ExitStatus, stderr: String },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReportSpawn(e) => write!(f, "failed to spawn {}: {}", REPORT_PROGRAM, e),
            Self::ReportFailed { status, stderr } => {
                write!(f, "report generator {}: {}", status, stderr.trim_end())
            }
        }
    }
}

impl std::error::Error for ExportError {}

// `--gzip` silently appends `.gz` to the output name when it is missing.
fn output_path(args: &ExportArgs) -> PathBuf {
    let mut path = args.output.clone();
    if args.gzip && !path.extension().is_some_and(|ext| ext == "gz") {
        let mut os = path.into_os_string();
        os.push(".gz");
        path = os.into();
    }
    path
}

fn write_lines(mut sink: impl Write, records: &[Record], zone: Tz) -> std::io::Result<()> {
    for record in records {
        writeln!(sink, "{}", record.to_combined_line(zone))?;
    }
    Ok(())
}

fn write_file(records: &[Record], path: &Path, gzip: bool, zone: Tz) -> Result<()> {
    let file = File::options()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create output file {} failed", path.display()))?;
    if gzip {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        write_lines(&mut encoder, records, zone)
            .with_context(|| format!("write {} failed", path.display()))?;
        encoder
            .finish()
            .and_then(|mut w| w.flush())
            .with_context(|| format!("finish {} failed", path.display()))?;
    } else {
        let mut writer = BufWriter::new(file);
        write_lines(&mut writer, records, zone)
            .with_context(|| format!("write {} failed", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("write {} failed", path.display()))?;
    }
    Ok(())
}

/// Feed the records to a report generator's stdin, then drain its output and
/// error streams and observe the exit status before declaring the export
/// done. A non-zero exit is a reported failure, not a crash.
fn pipe_to_report(command: &mut Command, records: &[Record], zone: Tz) -> Result<()> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ExportError::ReportSpawn)?;

    {
        let stdin = child.stdin.take().context("report generator stdin not captured")?;
        let mut stdin = BufWriter::new(stdin);
        match write_lines(&mut stdin, records, zone).and_then(|()| stdin.flush()) {
            Ok(()) => {}
            // A consumer that stops reading early still gets its exit status
            // inspected below; everything else is a real pipe failure.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::warn!("report generator closed its input early");
            }
            Err(e) => return Err(e).context("write to report generator failed"),
        }
    }

    let output = child
        .wait_with_output()
        .context("wait for report generator failed")?;
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        tracing::debug!("report generator: {}", line);
    }
    if !output.status.success() {
        return Err(ExportError::ReportFailed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
        .into());
    }
    Ok(())
}

pub fn run(args: &ExportArgs, zone: Tz) -> Result<()> {
    // Everything that can be rejected is rejected before touching the store
    // or the filesystem.
    let filter = LogFilter::from_options(
        args.from_date.as_deref(),
        args.to_date.as_deref(),
        args.vhosts.as_deref(),
        args.condition.as_deref(),
        zone,
    )?;
    let target = match &args.report {
        Some(report) => report.clone(),
        None => output_path(args),
    };
    if target.exists() {
        bail!("{} already exists, remove it first", target.display());
    }

    let store = LogStore::open(&args.db)
        .with_context(|| format!("open store {} failed", args.db.display()))?;
    let records = store.select(&filter).context("query store failed")?;
    tracing::info!("Exporting {} records", records.len());

    match &args.report {
        Some(report) => {
            let mut command = Command::new(REPORT_PROGRAM);
            command
                .arg("--log-format=VCOMBINED")
                .arg("-a")
                .arg("-o")
                .arg(report);
            pipe_to_report(&mut command, &records, zone)?;
            tracing::info!("Report written to {}", report.display());
        }
        None => {
            write_file(&records, &target, args.gzip, zone)?;
            tracing::info!("Log written to {}", target.display());
        }
    }
    Ok(())
}
