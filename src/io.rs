//! Byte-stream and in-memory sources and sinks.

use crate::error::Result;
use crate::stage::{Sink, Source};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, BufWriter, Bytes, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Yields one byte per unit from any reader
pub struct ReaderSource<R: Read> {
    bytes: Bytes<BufReader<R>>,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            bytes: BufReader::new(reader).bytes(),
        }
    }
}

impl ReaderSource<File> {
    /// Open `path` for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read + Send + 'static> Source<u8> for ReaderSource<R> {
    fn acquire(&mut self) -> Result<Option<u8>> {
        Ok(self.bytes.next().transpose()?)
    }

    fn name(&self) -> &str {
        "reader"
    }
}

/// Writes one byte per unit into any writer, flushing when the stream ends
pub struct WriterSink<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }
}

impl WriterSink<File> {
    /// Create or truncate `path` for writing
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write + Send + 'static> Sink<u8> for WriterSink<W> {
    fn emit(&mut self, unit: u8) -> Result<()> {
        self.writer.write_all(&[unit])?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "writer"
    }
}

/// Yields the items of an iterator
pub struct IterSource<I> {
    iter: I,
}

impl<I: Iterator> IterSource<I> {
    pub fn new(items: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: items.into_iter(),
        }
    }
}

impl<T, I> Source<T> for IterSource<I>
where
    I: Iterator<Item = T> + Send + 'static,
{
    fn acquire(&mut self) -> Result<Option<T>> {
        Ok(self.iter.next())
    }

    fn name(&self) -> &str {
        "iter"
    }
}

/// Collects emitted units into a shared vector
#[derive(Debug)]
pub struct CollectSink<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for CollectSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for CollectSink<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> CollectSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far
    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }

    /// Number of units emitted so far
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> Sink<T> for CollectSink<T> {
    fn emit(&mut self, unit: T) -> Result<()> {
        self.items.lock().push(unit);
        Ok(())
    }

    fn name(&self) -> &str {
        "collect"
    }
}
