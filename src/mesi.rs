use std::fmt;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Mesi {
    #[default]
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

impl Mesi {
    pub fn is_valid(self) -> bool {
        self != Mesi::Invalid
    }

    /// State left behind by a hit from a read or fetch.
    pub fn on_read_hit(self) -> Mesi {
        match self {
            Mesi::Exclusive => Mesi::Shared,
            other => other,
        }
    }

    /// State left behind by a hit from a write. Clean lines are dirtied
    /// without going to the bus.
    pub fn on_write_hit(self) -> Mesi {
        match self {
            Mesi::Exclusive | Mesi::Shared => Mesi::Modified,
            other => other,
        }
    }
}

impl fmt::Display for Mesi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mesi::Invalid => "I",
            Mesi::Shared => "S",
            Mesi::Exclusive => "E",
            Mesi::Modified => "M",
        };
        f.write_str(s)
    }
}
