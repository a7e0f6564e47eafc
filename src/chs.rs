/*
    flux2imd
    Copyright 2026 The flux2imd Contributors

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

    Cylinder/head coordinates. Unlike a full sector-addressed disk image
    library, this crate never needs a sector number as part of a physical
    address (sector slots are tracked separately, per spec.md SS3 "Track");
    `DiskCh` is kept minimal.
*/
use std::fmt;
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Default, PartialOrd, Ord)]
pub struct DiskCh {
    pub(crate) c: u16,
    pub(crate) h: u8,
}

impl DiskCh {
    pub fn new(c: u16, h: u8) -> Self {
        Self { c, h }
    }

    pub fn c(&self) -> u16 {
        self.c
    }

    pub fn h(&self) -> u8 {
        self.h
    }
}

impl From<(u16, u8)> for DiskCh {
    fn from((c, h): (u16, u8)) -> Self {
        Self { c, h }
    }
}

impl Display for DiskCh {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[c:{} h:{}]", self.c, self.h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_as_bracketed_coordinate() {
        assert_eq!(format!("{}", DiskCh::new(5, 1)), "[c:5 h:1]");
    }
}
