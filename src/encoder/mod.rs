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

    src/encoder/mod.rs

    Builds the lookup tables that convert raw MFM clock+data bit windows into
    timed pulse descriptors for the signal generation hardware.

    A window is classified by its leading two bits. "00" windows are two
    cells of silence. Windows leading with a pulse normally consume two
    cells, but consume a third when stopping at two would leave the stream
    positioned on a "01" remainder - this keeps every pulse at least two bit
    cells wide and guarantees the next window never starts "01" for legal
    MFM spacings. "11" is collapsed to "10" because the generator cannot
    assert two adjacent pulses within one minimum-width cell. "01" windows
    are invalid MFM; they are assigned the "00" encoding and flagged so the
    pipeline counts bad patterns instead of stalling.
*/

use bit_vec::BitVec;

/// Entries in the 4-bit-window classification table.
pub const READ_TABLE_LEN: usize = 16;
/// Entries in the 6-bit-window write table (4 window bits + 2 history bits).
pub const WRITE_TABLE_LEN: usize = 64;

/// Classification of one MFM bit window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BitPatternEntry {
    /// Bit cells consumed by this window: 2 or 3.
    pub bits_consumed: u8,
    /// The window's second bit, carried as history into the next lookup.
    /// Degenerate (error) entries carry 0.
    pub leading_bit: u8,
    /// Set for windows starting "01" - invalid MFM, reported but not fatal.
    pub error_flag: bool,
}

impl BitPatternEntry {
    /// Classify a 4-bit window. Bit 3 of `window` is the first (earliest)
    /// bit of the stream.
    pub fn classify(window: u8) -> BitPatternEntry {
        debug_assert!(window < 16);
        let b0 = (window >> 3) & 1;
        let b1 = (window >> 2) & 1;
        let b2 = (window >> 1) & 1;
        let b3 = window & 1;

        if b0 == 0 && b1 == 1 {
            // Invalid MFM. Encode as silence so the pipeline keeps moving.
            BitPatternEntry {
                bits_consumed: 2,
                leading_bit: 0,
                error_flag: true,
            }
        }
        else if b0 == 0 {
            BitPatternEntry {
                bits_consumed: 2,
                leading_bit: b1,
                error_flag: false,
            }
        }
        else {
            // Pulse window. Take the extra zero when two cells would leave
            // the remainder starting "01".
            let bits_consumed = if b2 == 0 && b3 == 1 { 3 } else { 2 };
            BitPatternEntry {
                bits_consumed,
                leading_bit: b1,
                error_flag: false,
            }
        }
    }

    /// True when this window begins with an asserted pulse.
    pub fn has_pulse(&self, window: u8) -> bool {
        !self.error_flag && (window >> 3) & 1 == 1
    }
}

/// A timed pulse descriptor, derived from a [BitPatternEntry] at a given bit
/// period. Immutable once computed; the table is rebuilt when the bit rate
/// or precompensation target changes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EncodedPulse {
    /// Total period of this word in hardware clock ticks.
    pub duration_ticks: u32,
    /// Width of the asserted pulse in ticks; 0 means no pulse.
    pub assert_ticks: u32,
    /// Propagated from the window classification.
    pub error_flag: bool,
    /// Signed adjustment the generator applies to the *following* word's
    /// period, compensating a precompensation shift so that drift over two
    /// words is exactly zero.
    pub precomp_adjust_ticks: i16,
}

/// Write precompensation offsets, in hardware clock ticks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PrecompParams {
    pub early_ticks: u16,
    pub late_ticks: u16,
}

/// Which precompensation shift a table entry received.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PrecompShift {
    None,
    Early(u16),
    Late(u16),
}

/// A complete pulse lookup table: the 16-entry read/generation table, or the
/// 64-entry write table with two history bits selecting precompensation.
#[derive(Clone, Debug)]
pub struct PulseTable {
    /// MFM bit cell duration in hardware clock ticks.
    pub bit_cell_ticks: u32,
    /// Precompensation in effect when the table was built, if any.
    pub precomp: Option<PrecompParams>,
    patterns: Vec<BitPatternEntry>,
    pulses: Vec<EncodedPulse>,
}

impl PulseTable {
    /// Build the 4-bit-window table used for read-side pulse generation.
    pub fn build_read(bit_cell_ticks: u32) -> PulseTable {
        let mut patterns = Vec::with_capacity(READ_TABLE_LEN);
        let mut pulses = Vec::with_capacity(READ_TABLE_LEN);

        for window in 0..READ_TABLE_LEN as u8 {
            let entry = BitPatternEntry::classify(window);
            patterns.push(entry);
            pulses.push(Self::pulse_for(entry, window, bit_cell_ticks, PrecompShift::None));
        }

        log::debug!("PulseTable::build_read(): built 16-entry table, bit cell {} ticks", bit_cell_ticks);
        PulseTable {
            bit_cell_ticks,
            precomp: None,
            patterns,
            pulses,
        }
    }

    /// Build the 6-bit-window write table. The upper two index bits are the
    /// last two bits written; they select the precompensation context.
    ///
    /// A pulse following history "10" at the start of a "100" run is shifted
    /// earlier; a pulse after two zeros starting a "101" run is shifted
    /// later. At most one shift applies per entry, and each shifted entry
    /// records the exact opposite adjustment for the following word.
    pub fn build_write(bit_cell_ticks: u32, precomp: Option<PrecompParams>) -> PulseTable {
        // The shortest shifted word spans two bit cells; cap the shift below
        // that so no entry's duration underflows.
        let precomp = precomp.map(|pc| {
            let limit = bit_cell_ticks.saturating_mul(2).saturating_sub(1).min(u16::MAX as u32) as u16;
            if pc.early_ticks > limit || pc.late_ticks > limit {
                log::warn!(
                    "PulseTable::build_write(): clamping precomp ({}, {}) to {} ticks",
                    pc.early_ticks,
                    pc.late_ticks,
                    limit
                );
            }
            PrecompParams {
                early_ticks: pc.early_ticks.min(limit),
                late_ticks: pc.late_ticks.min(limit),
            }
        });

        let mut patterns = Vec::with_capacity(WRITE_TABLE_LEN);
        let mut pulses = Vec::with_capacity(WRITE_TABLE_LEN);

        for index in 0..WRITE_TABLE_LEN as u8 {
            let history = index >> 4;
            let window = index & 0x0F;
            let entry = BitPatternEntry::classify(window);

            let shift = match precomp {
                Some(pc) if entry.has_pulse(window) => {
                    if history == 0b10 && window & 0b1110 == 0b1000 {
                        // 10_100: narrow-then-wide boundary, write early.
                        PrecompShift::Early(pc.early_ticks)
                    }
                    else if history == 0b00 && window & 0b1110 == 0b1010 {
                        // 00_101: wide-then-narrow boundary, write late.
                        PrecompShift::Late(pc.late_ticks)
                    }
                    else {
                        PrecompShift::None
                    }
                }
                _ => PrecompShift::None,
            };

            patterns.push(entry);
            pulses.push(Self::pulse_for(entry, window, bit_cell_ticks, shift));
        }

        log::debug!(
            "PulseTable::build_write(): built 64-entry table, bit cell {} ticks, precomp {:?}",
            bit_cell_ticks,
            precomp
        );
        PulseTable {
            bit_cell_ticks,
            precomp,
            patterns,
            pulses,
        }
    }

    fn pulse_for(entry: BitPatternEntry, window: u8, cell: u32, shift: PrecompShift) -> EncodedPulse {
        let nominal = entry.bits_consumed as u32 * cell;
        let assert_ticks = if entry.has_pulse(window) { cell / 2 } else { 0 };

        let (duration_ticks, precomp_adjust_ticks) = match shift {
            PrecompShift::None => (nominal, 0),
            // Shifting a pulse earlier shortens this word; the recorded
            // adjustment lengthens the next word by the same amount.
            PrecompShift::Early(t) => (nominal - t as u32, t as i16),
            PrecompShift::Late(t) => (nominal + t as u32, -(t as i16)),
        };

        EncodedPulse {
            duration_ticks,
            assert_ticks,
            error_flag: entry.error_flag,
            precomp_adjust_ticks,
        }
    }

    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    /// Look up a table entry by window (read table) or history+window index
    /// (write table).
    pub fn lookup(&self, index: u8) -> (&BitPatternEntry, &EncodedPulse) {
        (&self.patterns[index as usize], &self.pulses[index as usize])
    }

    /// Pack the table for the hardware interface: three little-endian words
    /// per entry - total period, assert width, and a word combining bits
    /// consumed, error flag and the signed adjustment.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pulses.len() * 12);
        for (entry, pulse) in self.patterns.iter().zip(self.pulses.iter()) {
            out.extend_from_slice(&pulse.duration_ticks.to_le_bytes());
            out.extend_from_slice(&pulse.assert_ticks.to_le_bytes());
            let packed = entry.bits_consumed as u32
                | (entry.error_flag as u32) << 8
                | (pulse.precomp_adjust_ticks as u16 as u32) << 16;
            out.extend_from_slice(&packed.to_le_bytes());
        }
        out
    }
}

/// Encode an MFM clock+data bitstream into pulse descriptors by repeated
/// window lookup. Returns the pulse sequence and the number of invalid
/// windows encountered (reported upstream as a bad-pattern count).
pub fn encode_stream(bits: &BitVec, table: &PulseTable) -> (Vec<EncodedPulse>, usize) {
    let mut pulses = Vec::with_capacity(bits.len() / 2);
    let mut bad_patterns = 0;
    let mut pos = 0;

    while pos < bits.len() {
        let mut window = 0u8;
        for i in 0..4 {
            // Windows at the end of the stream are padded with zeros.
            let bit = bits.get(pos + i).unwrap_or(false);
            window = window << 1 | bit as u8;
        }

        let (entry, pulse) = table.lookup(window);
        if entry.error_flag {
            bad_patterns += 1;
        }
        pulses.push(*pulse);
        pos += entry.bits_consumed as usize;
    }

    (pulses, bad_patterns)
}

/// Count invalid windows in an MFM bitstream without materializing pulses.
/// Used to sanity-check track data written by the emulated controller
/// before the signal generator consumes it.
pub fn count_bad_patterns(bits: &BitVec) -> usize {
    let mut bad_patterns = 0;
    let mut pos = 0;
    while pos < bits.len() {
        let mut window = 0u8;
        for i in 0..4 {
            let bit = bits.get(pos + i).unwrap_or(false);
            window = window << 1 | bit as u8;
        }
        let entry = BitPatternEntry::classify(window);
        if entry.error_flag {
            bad_patterns += 1;
        }
        pos += entry.bits_consumed as usize;
    }
    bad_patterns
}

/// Decode a sequence of pulse durations back into an MFM bitstream at a
/// fixed bit period. Inverse of [encode_stream] for streams whose greedy
/// window decomposition contains no "01" or "11" windows.
pub fn decode_pulses(pulses: &[EncodedPulse], bit_cell_ticks: u32) -> BitVec {
    let mut bits = BitVec::new();
    for pulse in pulses {
        let cells = (pulse.duration_ticks / bit_cell_ticks).max(1);
        bits.push(pulse.assert_ticks > 0);
        for _ in 1..cells {
            bits.push(false);
        }
    }
    bits
}
