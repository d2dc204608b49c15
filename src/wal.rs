use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::LedgerEvent;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &LedgerEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Result of reading the ledger back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<LedgerEvent>,
    /// Entries with intact framing but a bad checksum or undecodable payload.
    pub skipped: usize,
}

/// Append-only allocation ledger.
///
/// Format per entry: `[u32: len][bincode: LedgerEvent][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated last entry (crash) ends the replay.
/// - A complete entry that fails its checksum or decode is skipped; the length
///   prefix lets replay continue with the next one.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the ledger file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &LedgerEvent) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Call `flush_sync()` after the batch to commit it.
    pub fn append_buffered(&mut self, event: &LedgerEvent) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file and fsync.
    pub fn write_compact_file(path: &Path, events: &[LedgerEvent]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Atomic swap: rename temp file over the ledger and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replace the ledger with a minimal set of events that recreates the current records.
    pub fn compact(&mut self, events: &[LedgerEvent]) -> io::Result<()> {
        self.flush_sync()?;
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read the ledger from disk. A missing file is an empty ledger.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                replay.skipped += 1;
                continue;
            }
            match bincode::deserialize::<LedgerEvent>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => replay.skipped += 1,
            }
        }

        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AllocationRecord;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("equipalloc_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn allocated(eq: &str, job: &str) -> LedgerEvent {
        LedgerEvent::Allocated(AllocationRecord::new(eq, job, format!("Job {job}")))
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            allocated("eq-1", "job-1"),
            LedgerEvent::Released {
                equipment_id: "eq-1".into(),
                at: 5,
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.events, events);
        assert_eq!(replayed.skipped, 0);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let event = allocated("eq-1", "job-1");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.events, vec![event]);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let replayed = Wal::replay(&path).unwrap();
        assert!(replayed.events.is_empty());
    }

    #[test]
    fn replay_skips_corrupt_entry_and_continues() {
        let path = tmp_path("corrupt_crc.wal");
        let bad = allocated("eq-1", "job-1");
        let good = allocated("eq-2", "job-2");

        {
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.events, vec![good]);
        assert_eq!(replayed.skipped, 1);
    }

    #[test]
    fn replay_skips_undecodable_payload() {
        let path = tmp_path("undecodable.wal");
        let garbage = [0xFFu8; 3];
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(garbage.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&garbage).unwrap();
            f.write_all(&crc32fast::hash(&garbage).to_le_bytes()).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert!(replayed.events.is_empty());
        assert_eq!(replayed.skipped, 1);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let survivor = allocated("eq-1", "job-1");
        let next = allocated("eq-2", "job-2");

        {
            let mut wal = Wal::open(&path).unwrap();
            for i in 0..10 {
                let id = format!("churn-{i}");
                wal.append(&allocated(&id, "job-x")).unwrap();
                wal.append(&LedgerEvent::Released { equipment_id: id, at: 0 }).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            wal.compact(std::slice::from_ref(&survivor)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(fs::metadata(&path).unwrap().len() < before);
            wal.append(&next).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.events, vec![survivor, next]);
    }
}
