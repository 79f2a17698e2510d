// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware-accelerated video decode sessions.
//!
//! This crate drives a decode session on top of an acceleration [backend](crate::backend): a
//! [`Display`](display::Display) is initialized on a native handle, its capabilities are
//! negotiated, and configs, surfaces and contexts are created from it. Pictures are then submitted
//! through the begin/render/end protocol of a [`Context`](context::Context), and the decoded
//! result can be read back through an [`Image`](image::Image) derived from the target surface.
//!
//! [`DecodeSession`](session::DecodeSession) bundles all of the above for the common "initialize
//! once, render many" usage.

pub mod backend;
pub mod capabilities;
pub mod config;
pub mod context;
pub mod display;
pub mod error;
pub mod image;
pub mod session;
pub mod surface;

use std::fmt;

#[cfg(feature = "vaapi")]
pub use libva;

pub use error::Result;
pub use error::VaError;

/// Alignment required by the decode pipeline for the coded height of a picture.
pub const MACROBLOCK_SIZE: u32 = 16;

/// Rounds `value` up to the next multiple of `alignment`, which must be a power of two.
///
/// Returns `None` if the result does not fit in a `u32`.
pub(crate) const fn align_up(value: u32, alignment: u32) -> Option<u32> {
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Returns this resolution with its height rounded up to the next multiple of
    /// [`MACROBLOCK_SIZE`]. This is the coded height the decode pipeline expects.
    ///
    /// Returns `None` if the rounded height does not fit in a `u32`.
    pub fn macroblock_aligned(self) -> Option<Self> {
        Some(Self {
            width: self.width,
            height: align_up(self.height, MACROBLOCK_SIZE)?,
        })
    }

    /// Whether `self` is large enough to contain `other`.
    pub fn can_contain(&self, other: Self) -> bool {
        self.width >= other.width && self.height >= other.height
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A FourCC pixel format tag, stored the way the driver reports it (little-endian).
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fourcc(pub u32);

impl Fourcc {
    pub const NV12: Fourcc = Fourcc::from_bytes(*b"NV12");
    pub const I420: Fourcc = Fourcc::from_bytes(*b"I420");
    pub const YV12: Fourcc = Fourcc::from_bytes(*b"YV12");
    pub const P010: Fourcc = Fourcc::from_bytes(*b"P010");
    pub const Y800: Fourcc = Fourcc::from_bytes(*b"Y800");

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl From<u32> for Fourcc {
    fn from(fourcc: u32) -> Self {
        Self(fourcc)
    }
}

impl From<&[u8; 4]> for Fourcc {
    fn from(bytes: &[u8; 4]) -> Self {
        Self::from_bytes(*bytes)
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.to_bytes() {
            let c = if c.is_ascii_graphic() { c as char } else { '.' };
            write!(f, "{}", c)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fourcc({}, {:#010x})", self, self.0)
    }
}

/// Location of one plane inside a mapped image.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Offset of the first byte of the plane from the start of the mapping.
    pub offset: usize,
    /// Number of bytes between two consecutive lines of the plane.
    pub stride: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macroblock_alignment() {
        assert_eq!(
            Resolution::from((320, 240)).macroblock_aligned(),
            Some(Resolution::from((320, 240)))
        );
        assert_eq!(
            Resolution::from((320, 235)).macroblock_aligned(),
            Some(Resolution::from((320, 240)))
        );
        assert_eq!(
            Resolution::from((16, 1)).macroblock_aligned(),
            Some(Resolution::from((16, 16)))
        );
        // Width is left alone.
        assert_eq!(
            Resolution::from((17, 16)).macroblock_aligned(),
            Some(Resolution::from((17, 16)))
        );
    }

    #[test]
    fn macroblock_alignment_overflow() {
        assert_eq!(Resolution::from((320, u32::MAX)).macroblock_aligned(), None);
        assert_eq!(Resolution::from((320, u32::MAX - 14)).macroblock_aligned(), None);
        assert_eq!(
            Resolution::from((320, u32::MAX - 15)).macroblock_aligned(),
            Some(Resolution::from((320, u32::MAX - 15)))
        );
        assert_eq!(align_up(u32::MAX, 64), None);
        assert_eq!(align_up(100, 64), Some(128));
    }

    #[test]
    fn fourcc_display() {
        assert_eq!(Fourcc::NV12.to_string(), "NV12");
        assert_eq!(Fourcc::from(b"I420"), Fourcc::I420);
        assert_eq!(Fourcc(0x3231564e), Fourcc::NV12);
    }
}
