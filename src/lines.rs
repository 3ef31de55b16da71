//! Line-oriented access to a read-only file snapshot.
//!
//! The file length is captured at open; bytes appended later are invisible.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Take};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::Result;

const BLOCK_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Line {
    pub start: u64,
    /// Line bytes without the terminator.
    pub bytes: Vec<u8>,
    /// False when the file ended before a `\n`.
    pub complete: bool,
}

impl Line {
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

#[derive(Debug)]
pub(crate) struct LineFile {
    file: File,
    len: u64,
}

impl LineFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Lines from `start`, which must be a line boundary, to end of file.
    pub fn forward(&self, start: u64) -> Result<ForwardLines<'_>> {
        let start = start.min(self.len);
        let mut file = &self.file;
        file.seek(SeekFrom::Start(start))?;
        Ok(ForwardLines {
            reader: BufReader::with_capacity(BLOCK_SIZE, file.take(self.len - start)),
            pos: start,
        })
    }

    pub fn line_at(&self, start: u64) -> Result<Option<Line>> {
        self.forward(start)?.next().transpose()
    }

    /// Start of the line that contains byte `pos`.
    pub fn line_start(&self, pos: u64) -> Result<u64> {
        let pos = pos.min(self.len);
        Ok(self.rfind_newline(pos)?.map_or(0, |nl| nl + 1))
    }

    /// The line that ends right before the boundary `start`.
    pub fn line_before(&self, start: u64) -> Result<Option<Line>> {
        let start = start.min(self.len);
        if start == 0 {
            return Ok(None);
        }
        let begin = self.line_start(start - 1)?;
        self.line_at(begin)
    }

    /// Offset of the last `\n` strictly before `pos`.
    fn rfind_newline(&self, pos: u64) -> Result<Option<u64>> {
        let mut buf = [0u8; BLOCK_SIZE];
        let mut hi = pos;
        while hi > 0 {
            let lo = hi.saturating_sub(BLOCK_SIZE as u64);
            let chunk = &mut buf[..(hi - lo) as usize];
            self.file.read_exact_at(chunk, lo)?;
            if let Some(i) = chunk.iter().rposition(|&b| b == b'\n') {
                return Ok(Some(lo + i as u64));
            }
            hi = lo;
        }
        Ok(None)
    }
}

pub(crate) struct ForwardLines<'a> {
    reader: BufReader<Take<&'a File>>,
    pos: u64,
}

impl Iterator for ForwardLines<'_> {
    type Item = Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut bytes = Vec::new();
        match self.reader.read_until(b'\n', &mut bytes) {
            Ok(0) => None,
            Ok(n) => {
                let start = self.pos;
                self.pos += n as u64;
                let complete = bytes.last() == Some(&b'\n');
                if complete {
                    bytes.pop();
                }
                Some(Ok(Line {
                    start,
                    bytes,
                    complete,
                }))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}
