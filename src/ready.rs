use std::ops;

/// A set of readiness bits. Only `readable`/`writable` are guaranteed
/// portable; `error`/`hup` are hints (see spec.md §4.1 "Portability").
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Ready(u8);

const READABLE: u8 = 0b0001;
const WRITABLE: u8 = 0b0010;
const ERROR: u8 = 0b0100;
const HUP: u8 = 0b1000;

impl Ready {
    pub fn empty() -> Ready {
        Ready(0)
    }

    pub fn readable() -> Ready {
        Ready(READABLE)
    }

    pub fn writable() -> Ready {
        Ready(WRITABLE)
    }

    pub fn error() -> Ready {
        Ready(ERROR)
    }

    pub fn hup() -> Ready {
        Ready(HUP)
    }

    pub fn is_readable(self) -> bool {
        self.0 & READABLE != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & WRITABLE != 0
    }

    pub fn is_error(self) -> bool {
        self.0 & ERROR != 0
    }

    pub fn is_hup(self) -> bool {
        self.0 & HUP != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl ops::BitOr for Ready {
    type Output = Ready;
    fn bitor(self, rhs: Ready) -> Ready {
        Ready(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for Ready {
    fn bitor_assign(&mut self, rhs: Ready) {
        self.0 |= rhs.0;
    }
}

impl ops::BitAnd for Ready {
    type Output = Ready;
    fn bitand(self, rhs: Ready) -> Ready {
        Ready(self.0 & rhs.0)
    }
}
