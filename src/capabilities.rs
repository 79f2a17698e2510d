// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Capability negotiation: which profiles, entrypoints and attributes a display supports.
//!
//! These queries do not change the state of the display. A negotiation miss is recoverable (the
//! caller can try another profile), whereas creating a config for a combination that was not
//! negotiated is a hard failure of that attempt.

use std::fmt;

use enumn::N;

use crate::backend::Backend;
use crate::display::Display;
use crate::error::Result;
use crate::error::VaError;

/// Value reported for an attribute the driver does not implement for a profile/entrypoint pair.
pub const ATTRIB_NOT_SUPPORTED: u32 = 0x8000_0000;

/// Codec profiles, numbered like `VAProfile`.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Profile {
    None = -1,
    Mpeg2Simple = 0,
    Mpeg2Main = 1,
    Mpeg4Simple = 2,
    Mpeg4AdvancedSimple = 3,
    Mpeg4Main = 4,
    H264Main = 6,
    H264High = 7,
    Vc1Simple = 8,
    Vc1Main = 9,
    Vc1Advanced = 10,
    H263Baseline = 11,
    JpegBaseline = 12,
    H264ConstrainedBaseline = 13,
    Vp8Version0_3 = 14,
    H264MultiviewHigh = 15,
    H264StereoHigh = 16,
    HevcMain = 17,
    HevcMain10 = 18,
    Vp9Profile0 = 19,
    Vp9Profile1 = 20,
    Vp9Profile2 = 21,
    Vp9Profile3 = 22,
    HevcMain12 = 23,
    HevcMain422_10 = 24,
    HevcMain422_12 = 25,
    HevcMain444 = 26,
    HevcMain444_10 = 27,
    HevcMain444_12 = 28,
    HevcSccMain = 29,
    HevcSccMain10 = 30,
    HevcSccMain444 = 31,
    Av1Profile0 = 32,
    Av1Profile1 = 33,
    HevcSccMain444_10 = 34,
}

/// Pipeline stages, numbered like `VAEntrypoint`.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Entrypoint {
    /// Variable-length decode, i.e. full hardware decoding.
    Vld = 1,
    Izz = 2,
    Idct = 3,
    MoComp = 4,
    Deblocking = 5,
    EncSlice = 6,
    EncPicture = 7,
    EncSliceLp = 8,
    VideoProc = 10,
    Fei = 11,
    Stats = 12,
}

/// Kinds of configuration attributes, numbered like `VAConfigAttribType`.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ConfigAttribType {
    RtFormat = 0,
    SpatialResidual = 1,
    SpatialClipping = 2,
    IntraResidual = 3,
    Encryption = 4,
    RateControl = 5,
    DecSliceMode = 6,
    DecJpeg = 7,
    DecProcessing = 8,
    EncPackedHeaders = 10,
    EncInterlaced = 11,
    EncMaxRefFrames = 13,
    EncMaxSlices = 14,
    EncSliceStructure = 15,
    EncMacroblockInfo = 16,
    MaxPictureWidth = 18,
    MaxPictureHeight = 19,
    EncJpeg = 20,
    EncQualityRange = 21,
}

/// A configuration attribute: a kind and its numeric value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigAttrib {
    pub kind: ConfigAttribType,
    pub value: u32,
}

impl ConfigAttrib {
    pub fn new(kind: ConfigAttribType, value: u32) -> Self {
        Self { kind, value }
    }

    /// Attribute of `kind` to be filled by [`Display::get_config_attributes`].
    pub fn query(kind: ConfigAttribType) -> Self {
        Self { kind, value: 0 }
    }

    pub fn is_supported(&self) -> bool {
        self.value != ATTRIB_NOT_SUPPORTED
    }
}

/// Render target formats, as reported by the [`ConfigAttribType::RtFormat`] attribute.
///
/// This is a bit mask: the attribute reports all supported formats at once.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RtFormat(pub u32);

impl RtFormat {
    pub const YUV420: RtFormat = RtFormat(0x0000_0001);
    pub const YUV422: RtFormat = RtFormat(0x0000_0002);
    pub const YUV444: RtFormat = RtFormat(0x0000_0004);
    pub const YUV411: RtFormat = RtFormat(0x0000_0008);
    pub const YUV400: RtFormat = RtFormat(0x0000_0010);
    pub const YUV420_10: RtFormat = RtFormat(0x0000_0100);
    pub const YUV422_10: RtFormat = RtFormat(0x0000_0200);
    pub const YUV444_10: RtFormat = RtFormat(0x0000_0400);
    pub const YUV420_12: RtFormat = RtFormat(0x0000_1000);
    pub const YUV422_12: RtFormat = RtFormat(0x0000_2000);
    pub const YUV444_12: RtFormat = RtFormat(0x0000_4000);
    pub const RGB16: RtFormat = RtFormat(0x0001_0000);
    pub const RGB32: RtFormat = RtFormat(0x0002_0000);
    pub const RGBP: RtFormat = RtFormat(0x0010_0000);

    /// Whether all the formats of `other` are part of `self`.
    ///
    /// The not-supported sentinel never contains anything.
    pub fn contains(self, other: RtFormat) -> bool {
        self.0 != ATTRIB_NOT_SUPPORTED && other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RtFormat {
    type Output = RtFormat;

    fn bitor(self, rhs: Self) -> Self::Output {
        RtFormat(self.0 | rhs.0)
    }
}

impl fmt::Display for RtFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            RtFormat::YUV420 => "YUV420",
            RtFormat::YUV422 => "YUV422",
            RtFormat::YUV444 => "YUV444",
            RtFormat::YUV411 => "YUV411",
            RtFormat::YUV400 => "YUV400",
            RtFormat::YUV420_10 => "YUV420_10",
            RtFormat::YUV422_10 => "YUV422_10",
            RtFormat::YUV444_10 => "YUV444_10",
            RtFormat::YUV420_12 => "YUV420_12",
            RtFormat::YUV422_12 => "YUV422_12",
            RtFormat::YUV444_12 => "YUV444_12",
            RtFormat::RGB16 => "RGB16",
            RtFormat::RGB32 => "RGB32",
            RtFormat::RGBP => "RGBP",
            other => return write!(f, "unknown VA rt_format {:#x}", other.0),
        };

        f.write_str(name)
    }
}

impl fmt::Debug for RtFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RtFormat({})", self)
    }
}

impl<B: Backend> Display<B> {
    /// Returns the profiles supported by the display.
    ///
    /// Profiles this crate does not know about are left out.
    pub fn query_config_profiles(&self) -> Result<Vec<Profile>> {
        self.ensure_live()?;

        let max = self.backend().max_num_profiles();
        let raw = self.check(
            "vaQueryConfigProfiles",
            VaError::Driver,
            self.backend().query_config_profiles(),
        )?;
        // Anything past the advertised maximum is ignored.
        Ok(raw.into_iter().take(max).filter_map(Profile::n).collect())
    }

    /// Returns the entrypoints supported for `profile`. The list may be empty.
    pub fn query_config_entrypoints(&self, profile: Profile) -> Result<Vec<Entrypoint>> {
        self.ensure_live()?;

        let max = self.backend().max_num_entrypoints();
        let raw = self.check(
            "vaQueryConfigEntrypoints",
            VaError::Driver,
            self.backend().query_config_entrypoints(profile as i32),
        )?;

        Ok(raw.into_iter().take(max).filter_map(Entrypoint::n).collect())
    }

    /// Fills the value of each attribute of `attribs` for the `profile`/`entrypoint` pair.
    ///
    /// Attributes that are not implemented receive [`ATTRIB_NOT_SUPPORTED`].
    pub fn get_config_attributes(
        &self,
        profile: Profile,
        entrypoint: Entrypoint,
        attribs: &mut [ConfigAttrib],
    ) -> Result<()> {
        self.ensure_live()?;

        self.check(
            "vaGetConfigAttributes",
            VaError::Driver,
            self.backend()
                .get_config_attributes(profile as i32, entrypoint as u32, attribs),
        )
    }

    /// Returns the value of the attribute `kind` for the `profile`/`entrypoint` pair.
    ///
    /// An attribute the driver does not implement is not an error: its value is
    /// [`ATTRIB_NOT_SUPPORTED`].
    pub fn get_config_attribute(
        &self,
        profile: Profile,
        entrypoint: Entrypoint,
        kind: ConfigAttribType,
    ) -> Result<u32> {
        let mut attribs = [ConfigAttrib::query(kind)];
        self.get_config_attributes(profile, entrypoint, &mut attribs)?;

        Ok(attribs[0].value)
    }

    /// Checks that `profile` and `entrypoint` are supported, and that `format` is one of the
    /// render target formats available for them.
    pub fn check_decode_support(
        &self,
        profile: Profile,
        entrypoint: Entrypoint,
        format: RtFormat,
    ) -> Result<()> {
        if !self.query_config_profiles()?.contains(&profile) {
            return Err(VaError::NotSupported(format!("profile {:?}", profile)));
        }

        if !self.query_config_entrypoints(profile)?.contains(&entrypoint) {
            return Err(VaError::NotSupported(format!(
                "entrypoint {:?} for profile {:?}",
                entrypoint, profile
            )));
        }

        let formats = RtFormat(self.get_config_attribute(
            profile,
            entrypoint,
            ConfigAttribType::RtFormat,
        )?);
        if !formats.contains(format) {
            return Err(VaError::NotSupported(format!(
                "render target format {} for profile {:?} and entrypoint {:?}",
                format, profile, entrypoint
            )));
        }

        Ok(())
    }
}
