use std::{fmt, io::Write};

/// Messages sent from the L1 caches to the next level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Read,
    ReadForOwnership,
    Write,
    ReturnData,
}

impl fmt::Display for BusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BusEvent::Read => "Read from L2",
            BusEvent::ReadForOwnership => "Read for Ownership from L2",
            BusEvent::Write => "Write to L2",
            BusEvent::ReturnData => "Return data to L2",
        };
        f.write_str(s)
    }
}

pub trait Bus {
    fn signal(&mut self, event: BusEvent);
}

/// Writes every message to `out` when `verbose` is set, otherwise drops it.
#[derive(Debug)]
pub struct L2Printer<W: Write> {
    verbose: bool,
    out: W,
}

impl<W: Write> L2Printer<W> {
    pub fn new(verbose: bool, out: W) -> Self {
        L2Printer { verbose, out }
    }
}

impl<W: Write> Bus for L2Printer<W> {
    fn signal(&mut self, event: BusEvent) {
        if !self.verbose {
            return;
        }
        if let Err(err) = writeln!(self.out, "{event}") {
            tracing::warn!(%err, %event, "could not print bus message");
        }
    }
}

impl Bus for Vec<BusEvent> {
    fn signal(&mut self, event: BusEvent) {
        self.push(event);
    }
}
