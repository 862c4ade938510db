use std::io::{self, Write};

use crate::{bus::Bus, hierarchy::Hierarchy, trace::Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    DataRead,
    DataWrite,
    InstrFetch,
    Invalidate,
    RfoSnoop,
    Clear,
    Print,
}

impl Op {
    pub fn decode(opcode: u32) -> Option<Op> {
        match opcode {
            0 => Some(Op::DataRead),
            1 => Some(Op::DataWrite),
            2 => Some(Op::InstrFetch),
            3 => Some(Op::Invalidate),
            4 => Some(Op::RfoSnoop),
            8 => Some(Op::Clear),
            9 => Some(Op::Print),
            _ => None,
        }
    }
}

impl<B: Bus> Hierarchy<B> {
    /// Applies one trace record. Unknown opcodes are dropped, clear and
    /// print ignore the address.
    pub fn dispatch(&mut self, record: Record, out: &mut impl Write) -> io::Result<()> {
        let Some(op) = Op::decode(record.opcode) else {
            tracing::debug!(opcode = record.opcode, "ignoring unknown opcode");
            return Ok(());
        };
        match op {
            Op::DataRead => {
                self.read(record.addr);
            }
            Op::DataWrite => {
                self.write(record.addr);
            }
            Op::InstrFetch => {
                self.fetch(record.addr);
            }
            Op::Invalidate => self.invalidate(record.addr),
            Op::RfoSnoop => self.snoop_rfo(record.addr),
            Op::Clear => self.clear(),
            Op::Print => self.write_contents(out)?,
        }
        Ok(())
    }
}
