use std::io::{ErrorKind, Read, Seek, SeekFrom};

use commons_error::*;

/// A slice of the plaintext, addressed by its position in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub data: Vec<u8>,
}

/// Number of chunks needed to cover the file
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u64 {
    dkcatalog::chunk_count(file_size, chunk_size)
}

/// Lazy reader of fixed size chunks.
/// Every chunk is full except the last one, and an empty source gives no chunk at all.
/// Only one chunk is held in memory at a time.
pub struct Chunker<R> {
    source: R,
    chunk_size: usize,
    next_index: u32,
    done: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(source: R, chunk_size: usize) -> BackupResult<Self> {
        if chunk_size == 0 {
            return Err(BackupError::validation("The chunk size must be positive"));
        }
        Ok(Chunker {
            source,
            chunk_size,
            next_index: 0,
            done: false,
        })
    }

    fn read_chunk(&mut self) -> BackupResult<Option<Chunk>> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut buf_pos: usize = 0;

        // Short reads are accumulated until the chunk is full or the source is over
        while buf_pos < self.chunk_size {
            match self.source.read(&mut buf[buf_pos..]) {
                Ok(0) => break,
                Ok(n) => buf_pos += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(BackupError::io(
                        format!("Cannot read the source, chunk_index=[{}]", self.next_index),
                        e,
                    ))
                }
            }
        }

        if buf_pos == 0 {
            return Ok(None);
        }
        if buf_pos < self.chunk_size {
            buf.truncate(buf_pos);
            self.done = true;
        }

        let chunk = Chunk {
            index: self.next_index,
            data: buf,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }
}

impl<R: Read + Seek> Chunker<R> {
    /// Restart the chunking at the chunk [index]
    pub fn starting_at(mut source: R, chunk_size: usize, index: u32) -> BackupResult<Self> {
        if chunk_size == 0 {
            return Err(BackupError::validation("The chunk size must be positive"));
        }
        let offset = chunk_size as u64 * index as u64;
        source
            .seek(SeekFrom::Start(offset))
            .map_err(|e| BackupError::io(format!("Cannot seek the source, offset=[{}]", offset), e))?;
        Ok(Chunker {
            source,
            chunk_size,
            next_index: index,
            done: false,
        })
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = BackupResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::*;

    /// Gives at most 3 bytes per read
    struct TrickleReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl Read for TrickleReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct BrokenReader {
        calls: u32,
    }

    impl Read for BrokenReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.calls += 1;
            if self.calls > 1 {
                return Err(std::io::Error::new(ErrorKind::Other, "disk error"));
            }
            buf.fill(7);
            Ok(buf.len())
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn chunks_cover_the_source() {
        for (size, chunk_size) in [(25usize, 10usize), (20, 10), (1, 10), (10, 1), (99, 7)] {
            let data = sample(size);
            let chunks: Vec<Chunk> = Chunker::new(Cursor::new(data.clone()), chunk_size)
                .unwrap()
                .collect::<BackupResult<_>>()
                .unwrap();

            assert_eq!(chunk_count(size as u64, chunk_size as u64), chunks.len() as u64);
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(i as u32, c.index);
                if i + 1 < chunks.len() {
                    assert_eq!(chunk_size, c.data.len());
                }
            }
            let rebuilt: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
            assert_eq!(data, rebuilt);
        }
    }

    #[test]
    fn empty_source_gives_nothing() {
        let mut chunker = Chunker::new(Cursor::new(Vec::<u8>::new()), 10).unwrap();
        assert!(chunker.next().is_none());
        assert!(chunker.next().is_none());
    }

    #[test]
    fn zero_chunk_size_is_refused() {
        assert!(matches!(
            Chunker::new(Cursor::new(vec![1u8]), 0),
            Err(BackupError::Validation(_))
        ));
    }

    #[test]
    fn short_reads_are_accumulated() {
        let data = sample(25);
        let reader = TrickleReader {
            data: data.clone(),
            pos: 0,
        };
        let sizes: Vec<usize> = Chunker::new(reader, 10).unwrap().map(|c| c.unwrap().data.len()).collect();
        assert_eq!(vec![10, 10, 5], sizes);
    }

    #[test]
    fn read_error_ends_the_sequence() {
        let mut chunker = Chunker::new(BrokenReader { calls: 0 }, 4).unwrap();
        assert_eq!(0, chunker.next().unwrap().unwrap().index);
        assert!(matches!(chunker.next(), Some(Err(BackupError::Io { .. }))));
        assert!(chunker.next().is_none());
    }

    #[test]
    fn restart_from_an_index() {
        let data = sample(25);
        let chunks: Vec<Chunk> = Chunker::starting_at(Cursor::new(data.clone()), 10, 2)
            .unwrap()
            .collect::<BackupResult<_>>()
            .unwrap();
        assert_eq!(1, chunks.len());
        assert_eq!(2, chunks[0].index);
        assert_eq!(&data[20..], chunks[0].data.as_slice());
    }
}
