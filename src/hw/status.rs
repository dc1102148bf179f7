/*
    fluxemu
    A real-time MFM disk drive emulation core.

    Copyright 2025 fluxemu contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/hw/status.rs

    Decodes coprocessor status words and drive control-line status bits.
    Fatal errors always log the decoded bit meanings before the run aborts.
*/

use std::fmt::{Display, Formatter};

use bitflags::bitflags;

bitflags! {
    /// Status word returned by the coprocessor command protocol.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[rustfmt::skip]
    pub struct HwStatus: u32 {
        #[doc = "Command completed normally"]
        const OK             = 0b0000_0001;
        #[doc = "Transition read queue lost samples"]
        const READ_OVERRUN   = 0b0000_0010;
        #[doc = "A transition delta exceeded the representable range and was clamped"]
        const DELTA_OVERFLOW = 0b0000_0100;
        #[doc = "Coprocessor rejected the command word"]
        const BAD_COMMAND    = 0b0000_1000;
        #[doc = "Coprocessor halted unexpectedly"]
        const HALTED         = 0b0001_0000;
        #[doc = "Write fault asserted by the drive electronics"]
        const WRITE_FAULT    = 0b0010_0000;
    }
}

impl HwStatus {
    /// Bits that a running emulation can survive. Anything else means the
    /// coprocessor's internal state is no longer trustworthy.
    const RECOVERABLE: HwStatus = HwStatus::OK
        .union(HwStatus::READ_OVERRUN)
        .union(HwStatus::DELTA_OVERFLOW);

    pub fn is_fatal(&self) -> bool {
        !HwStatus::RECOVERABLE.contains(*self)
    }

    fn meaning(name: &str) -> &'static str {
        match name {
            "OK" => "command completed normally",
            "READ_OVERRUN" => "transition read queue lost samples",
            "DELTA_OVERFLOW" => "transition delta exceeded representable range",
            "BAD_COMMAND" => "coprocessor rejected the command word",
            "HALTED" => "coprocessor halted unexpectedly",
            "WRITE_FAULT" => "drive electronics reported a write fault",
            _ => "unknown status bit",
        }
    }
}

impl Display for HwStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "{:#04X} (no status bits set)", self.bits());
        }
        write!(f, "{:#04X}", self.bits())?;
        for (name, _) in self.iter_names() {
            write!(f, " [{}: {}]", name, HwStatus::meaning(name))?;
        }
        let unknown = self.bits() & !HwStatus::all().bits();
        if unknown != 0 {
            write!(f, " [{unknown:#04X}: unknown status bit]")?;
        }
        Ok(())
    }
}

bitflags! {
    /// Drive control-line status bits, as sampled by `DriveControl::get_status`.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[rustfmt::skip]
    pub struct DriveStatus: u8 {
        #[doc = "Drive is selected and up to speed"]
        const READY         = 0b0000_0001;
        #[doc = "The last seek finished settling"]
        const SEEK_COMPLETE = 0b0000_0010;
        #[doc = "Heads are positioned over cylinder 0"]
        const TRACK0        = 0b0000_0100;
        #[doc = "Write fault line asserted"]
        const WRITE_FAULT   = 0b0000_1000;
        #[doc = "Index pulse seen since last status read"]
        const INDEX         = 0b0001_0000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_bits_are_not_fatal() {
        assert!(!HwStatus::OK.is_fatal());
        assert!(!(HwStatus::OK | HwStatus::READ_OVERRUN).is_fatal());
        assert!(!HwStatus::DELTA_OVERFLOW.is_fatal());
    }

    #[test]
    fn unexpected_bits_are_fatal() {
        assert!(HwStatus::HALTED.is_fatal());
        assert!((HwStatus::OK | HwStatus::BAD_COMMAND).is_fatal());
        assert!(HwStatus::from_bits_retain(0x8000_0000).is_fatal());
    }

    #[test]
    fn display_decodes_bit_meanings() {
        let text = format!("{}", HwStatus::HALTED | HwStatus::WRITE_FAULT);
        assert!(text.contains("HALTED"));
        assert!(text.contains("write fault"));
    }
}
