use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Abstract interest / return mask shared by every `on_event` callback.
///
/// The first four bits describe *interest* (what a handle wants to be
/// notified about); the last three describe a callback's *return intent*.
/// This mirrors `spec.md`'s wire-level contract bit for bit:
/// `NONE=0, READ=1, WRITE=2, ALIVE=4, TIMER=8, DONE=16, ABORT=32`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u32);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READ: Interest = Interest(0b0_0001);
    pub const WRITE: Interest = Interest(0b0_0010);
    pub const ALIVE: Interest = Interest(0b0_0100);
    pub const TIMER: Interest = Interest(0b0_1000);
    pub const DONE: Interest = Interest(0b1_0000);
    pub const ABORT: Interest = Interest(0b10_0000);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Interest {
        Interest(bits)
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Interest) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn is_readable(self) -> bool {
        self.contains(Interest::READ)
    }

    pub const fn is_writable(self) -> bool {
        self.contains(Interest::WRITE)
    }

    pub const fn is_done(self) -> bool {
        self.contains(Interest::DONE)
    }

    pub const fn is_abort(self) -> bool {
        self.contains(Interest::ABORT)
    }

    #[must_use]
    pub const fn with(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.with(rhs)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        *self = self.with(rhs);
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("NONE");
        }
        let mut first = true;
        let mut push = |f: &mut fmt::Formatter<'_>, name: &str| -> fmt::Result {
            if !first {
                f.write_str(" | ")?;
            }
            first = false;
            f.write_str(name)
        };
        if self.contains(Interest::READ) {
            push(f, "READ")?;
        }
        if self.contains(Interest::WRITE) {
            push(f, "WRITE")?;
        }
        if self.contains(Interest::ALIVE) {
            push(f, "ALIVE")?;
        }
        if self.contains(Interest::TIMER) {
            push(f, "TIMER")?;
        }
        if self.contains(Interest::DONE) {
            push(f, "DONE")?;
        }
        if self.contains(Interest::ABORT) {
            push(f, "ABORT")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_match_spec() {
        assert_eq!(Interest::NONE.bits(), 0);
        assert_eq!(Interest::READ.bits(), 1);
        assert_eq!(Interest::WRITE.bits(), 2);
        assert_eq!(Interest::ALIVE.bits(), 4);
        assert_eq!(Interest::TIMER.bits(), 8);
        assert_eq!(Interest::DONE.bits(), 16);
        assert_eq!(Interest::ABORT.bits(), 32);
    }

    #[test]
    fn combine_and_query() {
        let mask = Interest::READ | Interest::WRITE;
        assert!(mask.is_readable());
        assert!(mask.is_writable());
        assert!(!mask.is_done());
    }

    #[test]
    fn without_clears_a_bit() {
        let mask = (Interest::READ | Interest::WRITE).without(Interest::WRITE);
        assert!(mask.is_readable());
        assert!(!mask.is_writable());
    }

    #[test]
    fn debug_format_lists_set_bits() {
        let mask = Interest::READ | Interest::DONE;
        assert_eq!(format!("{:?}", mask), "READ | DONE");
    }
}
