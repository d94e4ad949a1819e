//! Signal bits
//!
//! The dispatcher core only ever masks, sets and compares these. Which bits
//! mean something is up to each object type; several types reuse the low
//! bits with different meanings.

use bitflags::bitflags;

bitflags! {
    /// Observable conditions on a kernel object
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Signals: u32 {
        const READABLE            = 1 << 0;
        const WRITABLE            = 1 << 1;
        const PEER_CLOSED         = 1 << 2;
        /// Events, event pairs and interrupts
        const SIGNALED            = 1 << 3;

        // Sockets
        const PEER_WRITE_DISABLED = 1 << 4;
        const WRITE_DISABLED      = 1 << 5;
        const CONTROL_READABLE    = 1 << 6;
        const CONTROL_WRITABLE    = 1 << 7;
        const ACCEPT              = 1 << 8;
        const SHARE               = 1 << 9;
        const READ_THRESHOLD      = 1 << 10;
        const WRITE_THRESHOLD     = 1 << 11;

        /// Raised on a handle being closed while waited on
        const HANDLE_CLOSED       = 1 << 23;

        const USER_0              = 1 << 24;
        const USER_1              = 1 << 25;
        const USER_2              = 1 << 26;
        const USER_3              = 1 << 27;
        const USER_4              = 1 << 28;
        const USER_5              = 1 << 29;
        const USER_6              = 1 << 30;
        const USER_7              = 1 << 31;

        const USER_ALL = Self::USER_0.bits()
            | Self::USER_1.bits()
            | Self::USER_2.bits()
            | Self::USER_3.bits()
            | Self::USER_4.bits()
            | Self::USER_5.bits()
            | Self::USER_6.bits()
            | Self::USER_7.bits();
    }
}

impl Signals {
    /// Apply a clear mask then a set mask, the way every state update does
    pub const fn apply(self, clear: Signals, set: Signals) -> Signals {
        Signals::from_bits_retain((self.bits() & !clear.bits()) | set.bits())
    }
}
