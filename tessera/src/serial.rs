use std::fmt;

/// Identifies the position of a submission in queue order.
///
/// Serials are handed out in strictly increasing order by a [`SerialFactory`]. The zero serial
/// is never assigned to a submission: it means "nothing", and is always considered complete.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(transparent)]
pub struct Serial(u64);

impl Serial {
    /// The null serial. Compares less than every generated serial.
    pub const ZERO: Serial = Serial(0);

    pub const fn from_raw(value: u64) -> Serial {
        Serial(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Generates strictly increasing serials, starting at 1.
#[derive(Debug)]
pub struct SerialFactory {
    next: u64,
}

impl SerialFactory {
    pub const fn new() -> SerialFactory {
        SerialFactory { next: 1 }
    }

    pub fn generate(&mut self) -> Serial {
        let serial = Serial(self.next);
        self.next = self.next.checked_add(1).expect("serial overflow");
        serial
    }
}

impl Default for SerialFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serials_are_strictly_increasing() {
        let mut factory = SerialFactory::new();
        let mut prev = Serial::ZERO;
        for _ in 0..1000 {
            let s = factory.generate();
            assert!(s > prev);
            prev = s;
        }
        assert_eq!(prev.value(), 1000);
    }

    #[test]
    fn zero_is_smallest() {
        assert!(Serial::ZERO < Serial::from_raw(1));
        assert_eq!(Serial::default(), Serial::ZERO);
    }
}
