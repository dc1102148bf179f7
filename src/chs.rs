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

    src/chs.rs

    Defines the DiskCh structure for physical cylinder/head addressing.
*/

use std::fmt::Display;

/// A structure representing a physical track address as the two components of
/// a cylinder/head pair:
///  - Cylinder (c)
///  - Head (h)
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DiskCh {
    c: u16,
    h: u8,
}

impl DiskCh {
    /// Create a new `DiskCh` from cylinder and head components.
    pub fn new(c: u16, h: u8) -> Self {
        Self { c, h }
    }

    /// Return the cylinder (c) component.
    pub fn c(&self) -> u16 {
        self.c
    }

    /// Return the head (h) component.
    pub fn h(&self) -> u8 {
        self.h
    }

    /// Set the cylinder (c) component.
    pub fn set_c(&mut self, c: u16) {
        self.c = c;
    }

    /// Set the head (h) component.
    pub fn set_h(&mut self, h: u8) {
        self.h = h;
    }

    /// Return the `DiskCh` of the next track in cylinder-major order for a
    /// drive with the given head count.
    pub fn next_track(&self, heads: u8) -> DiskCh {
        if self.h + 1 < heads {
            DiskCh::new(self.c, self.h + 1)
        }
        else {
            DiskCh::new(self.c + 1, 0)
        }
    }

    /// Return the zero-based ordinal of this track in cylinder-major order.
    pub fn track_index(&self, heads: u8) -> usize {
        self.c as usize * heads as usize + self.h as usize
    }
}

impl From<(u16, u8)> for DiskCh {
    fn from((c, h): (u16, u8)) -> Self {
        DiskCh { c, h }
    }
}

impl Display for DiskCh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:3} h:{}]", self.c, self.h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_track_wraps_heads() {
        let ch = DiskCh::new(3, 0);
        assert_eq!(ch.next_track(2), DiskCh::new(3, 1));
        assert_eq!(ch.next_track(2).next_track(2), DiskCh::new(4, 0));
    }

    #[test]
    fn track_index_is_cylinder_major() {
        assert_eq!(DiskCh::new(0, 0).track_index(4), 0);
        assert_eq!(DiskCh::new(0, 3).track_index(4), 3);
        assert_eq!(DiskCh::new(2, 1).track_index(4), 9);
    }
}
