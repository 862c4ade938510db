use std::{
    fs,
    io::{self, BufRead, BufReader, Read},
    mem,
    path::PathBuf,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use xz2::read::XzDecoder;

/// One trace line: `<opcode> [<hex address>]`.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record {
    pub opcode: u32,
    pub addr: u32,
}

/// Parses a trace line. Blank lines, `#` comments, and lines that do not
/// start with a non-negative integer yield `None`.
pub fn parse_line(line: &str) -> Option<Record> {
    let line = line.trim_start();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut tokens = line.split_whitespace();
    let opcode: i64 = tokens.next()?.parse().ok()?;
    let opcode = u32::try_from(opcode).ok()?;
    let addr = tokens.next().map_or(0, parse_hex);
    Some(Record { opcode, addr })
}

/// Leading hex digits of `s`, after an optional `0x`. Parsing stops at the
/// first non-hex character; no digits give 0 and values past 64 bits
/// saturate before being cut down to 32.
pub fn parse_hex(s: &str) -> u32 {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    digits
        .chars()
        .map_while(|c| c.to_digit(16))
        .fold(0u64, |acc, d| {
            acc.checked_mul(16)
                .and_then(|v| v.checked_add(d as u64))
                .unwrap_or(u64::MAX)
        }) as u32
}

pub struct Trace {
    pub rec: Receiver<Vec<Record>>,
    thread: JoinHandle<io::Result<u64>>,
}

impl Trace {
    /// Starts reading `path` on a background thread. Files ending in `.xz`
    /// are decompressed on the fly.
    pub fn read(
        path: PathBuf,
        records_per_block: usize,
        blocks_per_queue: usize,
    ) -> io::Result<Trace> {
        let file = fs::File::open(&path)?;
        let stream: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "xz") {
            Box::new(XzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Trace::spawn(
            BufReader::new(stream),
            records_per_block,
            blocks_per_queue,
        ))
    }

    pub fn spawn<R: BufRead + Send + 'static>(
        stream: R,
        records_per_block: usize,
        blocks_per_queue: usize,
    ) -> Trace {
        let (sender, receiver) = crossbeam::channel::bounded(blocks_per_queue);
        let records_per_block = records_per_block.max(1);

        let t = thread::spawn(move || Trace::run_thread(stream, records_per_block, sender));

        Trace {
            rec: receiver,
            thread: t,
        }
    }

    fn run_thread(
        mut stream: impl BufRead,
        records_per_block: usize,
        queue: Sender<Vec<Record>>,
    ) -> io::Result<u64> {
        let mut line = Vec::new();
        let mut block = Vec::with_capacity(records_per_block);
        let mut n_lines = 0;
        loop {
            line.clear();
            if stream.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            n_lines += 1;

            match parse_line(&String::from_utf8_lossy(&line)) {
                Some(record) => block.push(record),
                None => {
                    tracing::trace!(line = n_lines, "skipping trace line");
                    continue;
                }
            }
            if block.len() == records_per_block {
                let full = mem::replace(&mut block, Vec::with_capacity(records_per_block));
                if queue.send(full).is_err() {
                    // Receiver hung up, nobody wants the rest.
                    return Ok(n_lines);
                }
            }
        }
        if !block.is_empty() {
            let _ = queue.send(block);
        }
        Ok(n_lines)
    }

    /// Waits for the reader and returns how many lines it consumed.
    pub fn finish(self) -> io::Result<u64> {
        let Trace { rec, thread } = self;
        drop(rec);
        thread
            .join()
            .map_err(|_| io::Error::other("trace reader panicked"))?
    }
}
