//! Handle rights

use bitflags::bitflags;

bitflags! {
    /// What a handle allows its holder to do with the object
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Rights: u32 {
        const DUPLICATE    = 1 << 0;
        const TRANSFER     = 1 << 1;
        const READ         = 1 << 2;
        const WRITE        = 1 << 3;
        const EXECUTE      = 1 << 4;
        const MAP          = 1 << 5;
        const GET_PROPERTY = 1 << 6;
        const SET_PROPERTY = 1 << 7;
        const ENUMERATE    = 1 << 8;
        const DESTROY      = 1 << 9;
        const SET_POLICY   = 1 << 10;
        const GET_POLICY   = 1 << 11;
        const SIGNAL       = 1 << 12;
        const SIGNAL_PEER  = 1 << 13;
        const WAIT         = 1 << 14;
        const INSPECT      = 1 << 15;

        const BASIC = Self::TRANSFER.bits()
            | Self::DUPLICATE.bits()
            | Self::WAIT.bits()
            | Self::INSPECT.bits();
        const IO = Self::READ.bits() | Self::WRITE.bits();
        const PROPERTY = Self::GET_PROPERTY.bits() | Self::SET_PROPERTY.bits();
    }
}
