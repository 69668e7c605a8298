use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::OrcError;
use crate::event::Event;

/// Buffers events up to `chunk_size`, sorting and spilling each chunk to a
/// `SortedRun` file, then k-way merges the runs into one deduplicated
/// partial timeline file at `finalize`.
///
/// Lines are the `Event::to_sortable_line` encoding: fixed-width timestamp
/// first, then the rest of the composite key, so a plain byte/string
/// comparison of whole lines is equivalent to comparing
/// `(timestamp, source_type, description, source)`.
pub struct ExternalSorter {
    runs_dir: PathBuf,
    chunk_size: usize,
    buffer: Vec<String>,
    run_paths: Vec<PathBuf>,
    next_run_id: usize,
}

impl ExternalSorter {
    pub fn new(runs_dir: PathBuf, chunk_size: usize) -> Self {
        ExternalSorter {
            runs_dir,
            chunk_size: chunk_size.max(1),
            buffer: Vec::new(),
            run_paths: Vec::new(),
            next_run_id: 0,
        }
    }

    pub fn push(&mut self, event: Event) -> Result<(), OrcError> {
        self.buffer.push(event.to_sortable_line());
        if self.buffer.len() >= self.chunk_size {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<(), OrcError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort();
        self.buffer.dedup();

        let run_path = self.runs_dir.join(format!("run-{:06}.txt", self.next_run_id));
        self.next_run_id += 1;

        let mut w = BufWriter::new(
            File::create(&run_path)
                .map_err(|e| OrcError::Extraction(format!("creating {}: {e}", run_path.display())))?,
        );
        for line in &self.buffer {
            w.write_all(line.as_bytes())
                .and_then(|_| w.write_all(b"\n"))
                .map_err(|e| OrcError::Extraction(format!("writing {}: {e}", run_path.display())))?;
        }
        w.flush()
            .map_err(|e| OrcError::Extraction(format!("flushing {}: {e}", run_path.display())))?;

        self.buffer.clear();
        self.run_paths.push(run_path);
        Ok(())
    }

    /// Flushes any residual buffer, k-way merges all runs into
    /// `output_path`, and deletes the run files as they're consumed.
    pub fn finalize(mut self, output_path: &Path) -> Result<(), OrcError> {
        self.spill()?;
        merge_sorted_files(&self.run_paths, output_path)?;
        for run in &self.run_paths {
            let _ = std::fs::remove_file(run);
        }
        Ok(())
    }
}

struct RunCursor {
    reader: BufReader<File>,
    current: String,
}

impl RunCursor {
    fn open(path: &Path) -> Result<Option<Self>, OrcError> {
        let mut reader = BufReader::new(
            File::open(path).map_err(|e| OrcError::Extraction(format!("opening run {}: {e}", path.display())))?,
        );
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| OrcError::Extraction(format!("reading run {}: {e}", path.display())))?;
        if n == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(Some(RunCursor { reader, current: line }))
    }

    fn advance(mut self) -> Result<Option<Self>, OrcError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|e| OrcError::Extraction(format!("reading run: {e}")))?;
        if n == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        self.current = line;
        Ok(Some(self))
    }
}

struct HeapEntry {
    line: String,
    run_idx: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.line.cmp(&other.line)
    }
}

/// K-way merges already-sorted line files into `output_path`, dropping
/// byte-identical adjacent lines. Used both by `ExternalSorter::finalize`
/// (runs -> PartialTimeline) and by the Final Merger (PartialTimelines ->
/// pre-gzip stream).
pub fn merge_sorted_files(inputs: &[PathBuf], output_path: &Path) -> Result<(), OrcError> {
    let mut cursors: Vec<Option<RunCursor>> = Vec::with_capacity(inputs.len());
    let mut heap = BinaryHeap::new();

    for path in inputs {
        cursors.push(RunCursor::open(path)?);
    }
    for (idx, cursor) in cursors.iter().enumerate() {
        if let Some(c) = cursor {
            heap.push(Reverse(HeapEntry {
                line: c.current.clone(),
                run_idx: idx,
            }));
        }
    }

    let mut out = BufWriter::new(
        File::create(output_path)
            .map_err(|e| OrcError::Merge(format!("creating {}: {e}", output_path.display())))?,
    );
    let mut last_written: Option<String> = None;

    while let Some(Reverse(entry)) = heap.pop() {
        if last_written.as_deref() != Some(entry.line.as_str()) {
            out.write_all(entry.line.as_bytes())
                .and_then(|_| out.write_all(b"\n"))
                .map_err(|e| OrcError::Merge(format!("writing {}: {e}", output_path.display())))?;
            last_written = Some(entry.line.clone());
        }

        let cursor = cursors[entry.run_idx].take().expect("cursor present for queued entry");
        let advanced = cursor.advance()?;
        if let Some(c) = &advanced {
            heap.push(Reverse(HeapEntry {
                line: c.current.clone(),
                run_idx: entry.run_idx,
            }));
        }
        cursors[entry.run_idx] = advanced;
    }

    out.flush()
        .map_err(|e| OrcError::Merge(format!("flushing {}: {e}", output_path.display())))?;
    Ok(())
}

/// Reads a merged line-encoded file back into `Event`s, in order. Used by
/// the Final Merger to re-encode as RFC 4180 CSV.
pub fn read_events(path: &Path) -> Result<Vec<Event>, OrcError> {
    let f = File::open(path).map_err(|e| OrcError::Merge(format!("opening {}: {e}", path.display())))?;
    let reader = BufReader::new(f);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| OrcError::Merge(format!("reading {}: {e}", path.display())))?;
        if let Some(ev) = Event::from_sortable_line(&line) {
            events.push(ev);
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ev(secs: i64, desc: &str) -> Event {
        Event::new(
            Utc.timestamp_opt(secs, 0).unwrap(),
            "A.dom",
            "T",
            desc,
            "src",
        )
    }

    #[test]
    fn s5_chunk_spill_matches_in_memory_sort() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = ExternalSorter::new(dir.path().to_path_buf(), 3);

        let order = [5, 1, 9, 3, 7, 0, 8, 2, 6, 4];
        for i in order {
            sorter.push(ev(i, &format!("e{i}"))).unwrap();
        }

        let out = dir.path().join("partial.txt");
        sorter.finalize(&out).unwrap();

        let merged = read_events(&out).unwrap();
        let mut expected: Vec<Event> = order.iter().map(|&i| ev(i, &format!("e{i}"))).collect();
        expected.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        assert_eq!(merged.len(), expected.len());
        for (a, b) in merged.iter().zip(expected.iter()) {
            assert_eq!(a.timestamp, b.timestamp);
            assert_eq!(a.description, b.description);
        }
    }

    #[test]
    fn s4_dedup_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = ExternalSorter::new(dir.path().to_path_buf(), 2);
        sorter.push(ev(1, "same")).unwrap();
        sorter.push(ev(1, "same")).unwrap();
        sorter.push(ev(2, "same")).unwrap();
        sorter.push(ev(1, "same")).unwrap();

        let out = dir.path().join("partial.txt");
        sorter.finalize(&out).unwrap();

        let merged = read_events(&out).unwrap();
        assert_eq!(merged.len(), 2);
    }
}
