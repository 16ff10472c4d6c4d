use crate::error::Result;
use crate::stage::Tally;
use parking_lot::Mutex;
use std::fmt::{self, Write as _};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

const LETTERS: usize = 26;

/// Lock-free per-letter counters for one side of the pipeline
#[derive(Debug)]
struct LetterCounts {
    letters: [AtomicU64; LETTERS],
    total: AtomicU64,
}

impl LetterCounts {
    fn new() -> Self {
        Self {
            letters: std::array::from_fn(|_| AtomicU64::new(0)),
            total: AtomicU64::new(0),
        }
    }

    fn record(&self, byte: u8) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if byte.is_ascii_alphabetic() {
            let index = usize::from(byte.to_ascii_uppercase() - b'A');
            self.letters[index].fetch_add(1, Ordering::Relaxed);
        }
    }

    fn load(&self) -> SideCounts {
        SideCounts {
            letters: std::array::from_fn(|i| self.letters[i].load(Ordering::Relaxed)),
            total: self.total.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for letter in &self.letters {
            letter.store(0, Ordering::Relaxed);
        }
        self.total.store(0, Ordering::Relaxed);
    }
}

/// Counts for one side at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideCounts {
    /// Occurrences of `A`..=`Z`, case-insensitive
    pub letters: [u64; LETTERS],
    /// Every unit seen, letter or not
    pub total: u64,
}

impl SideCounts {
    /// Count for one letter, either case
    pub fn letter(&self, letter: char) -> u64 {
        if letter.is_ascii_alphabetic() {
            self.letters[usize::from(letter.to_ascii_uppercase() as u8 - b'A')]
        } else {
            0
        }
    }
}

impl fmt::Display for SideCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, count) in self.letters.iter().enumerate() {
            if i > 0 {
                f.write_char(' ')?;
            }
            write!(f, "{}:{}", char::from(b'A' + i as u8), count)?;
        }
        Ok(())
    }
}

/// Input and output counts at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSnapshot {
    pub input: SideCounts,
    pub output: SideCounts,
}

impl fmt::Display for CountSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total input count with current key is {}", self.input.total)?;
        writeln!(f, "{}", self.input)?;
        writeln!(f, "Total output count with current key is {}", self.output.total)?;
        writeln!(f, "{}", self.output)
    }
}

/// Case-insensitive letter frequencies of the units entering and leaving the
/// transform, reported to a count log
pub struct LetterTally {
    input: LetterCounts,
    output: LetterCounts,
    log: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for LetterTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LetterTally")
            .field("counts", &self.counts())
            .finish_non_exhaustive()
    }
}

impl LetterTally {
    /// Create a tally that reports to `log`
    pub fn new(log: impl Write + Send + 'static) -> Self {
        Self {
            input: LetterCounts::new(),
            output: LetterCounts::new(),
            log: Mutex::new(Box::new(log)),
        }
    }

    /// Current counts
    pub fn counts(&self) -> CountSnapshot {
        CountSnapshot {
            input: self.input.load(),
            output: self.output.load(),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.input.reset();
        self.output.reset();
    }
}

impl Tally<u8> for LetterTally {
    fn record_input(&self, unit: &u8) {
        self.input.record(*unit);
    }

    fn record_output(&self, unit: &u8) {
        self.output.record(*unit);
    }

    fn snapshot_counts(&self) -> Result<()> {
        let mut report = String::new();
        // Writing into a String cannot fail.
        let _ = write!(report, "{}", self.counts());

        let mut log = self.log.lock();
        log.write_all(report.as_bytes())?;
        log.flush()?;
        Ok(())
    }
}
