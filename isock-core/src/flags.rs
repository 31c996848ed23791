//! UART register bit masks used by flow control commands.

use bitflags::bitflags;

bitflags! {
    /// Modem status register (MSR) inputs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModemStatus: u8 {
        const CTS = 0x10;
        const DSR = 0x20;
        const RI  = 0x40;
        const DCD = 0x80;
    }
}

bitflags! {
    /// Modem control register (MCR) outputs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModemControl: u8 {
        const DTR = 0x01;
        const RTS = 0x02;
    }
}
