use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use passk_core::{OutcomeRecord, PassKError, Result, StoreMode};

/// Append-only JSONL ledger of outcome records, one object per line.
pub struct ResultsStore {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl ResultsStore {
    pub fn open(path: &Path, mode: StoreMode) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        match mode {
            StoreMode::Overwrite => options.write(true).create(true).truncate(true),
            StoreMode::Append => options.append(true).create(true),
        };
        let file = options.open(path)?;

        tracing::info!("Results store opened at {:?} ({:?})", path, mode);

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn append(&mut self, record: &OutcomeRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        // flush per record so an interrupted run keeps every scored sample
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn written(&self) -> usize {
        self.written
    }
}

/// Read every record in file order.
pub fn scan(path: &Path) -> Result<Vec<OutcomeRecord>> {
    let file = File::open(path)?;
    let records = parse_records(BufReader::new(file))?;
    tracing::debug!("Scanned {} records from {:?}", records.len(), path);
    Ok(records)
}

/// Parse JSONL records. Blank lines are skipped; the first malformed line
/// aborts the scan.
pub fn parse_records<R: BufRead>(reader: R) -> Result<Vec<OutcomeRecord>> {
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record = serde_json::from_str::<OutcomeRecord>(&line).map_err(|e| {
            PassKError::MalformedRecord {
                line: idx + 1,
                record: line.clone(),
                message: e.to_string(),
            }
        })?;
        records.push(record);
    }

    Ok(records)
}
