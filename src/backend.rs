// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Acceleration backends.
//!
//! A backend is the thin, status-returning layer the rest of this crate is built on. Its entry
//! points map one-to-one to those of the native acceleration API (VA-API for
//! [`vaapi`](crate::backend::vaapi)): they take and return raw numeric identifiers and report
//! failure as a non-zero [`Status`]. Turning these statuses into typed errors, tracking the
//! lifetime of the objects and enforcing the picture submission protocol is the job of the
//! layers above.
//!
//! Backends are single-threaded per connection. None of their methods may be called
//! concurrently on the same backend.

pub mod dummy;
#[cfg(feature = "vaapi")]
pub mod vaapi;

use std::ffi::c_char;
use std::ffi::c_void;
use std::ptr::NonNull;

use crate::capabilities::ConfigAttrib;
use crate::display::Version;
use crate::image::ImageDescriptor;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: $name = $name(0xffff_ffff);
        }
    };
}

id_type!(
    /// Identifier of a configuration object.
    ConfigId
);
id_type!(
    /// Identifier of a surface.
    SurfaceId
);
id_type!(
    /// Identifier of a decode context.
    ContextId
);
id_type!(
    /// Identifier of a typed memory buffer, including the buffers backing derived images.
    BufferId
);
id_type!(
    /// Identifier of an image descriptor.
    ImageId
);

/// Status code returned by a backend entry point. Zero means success.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0x00);
    pub const ERROR_OPERATION_FAILED: Status = Status(0x01);
    pub const ERROR_ALLOCATION_FAILED: Status = Status(0x02);
    pub const ERROR_INVALID_DISPLAY: Status = Status(0x03);
    pub const ERROR_INVALID_CONFIG: Status = Status(0x04);
    pub const ERROR_INVALID_CONTEXT: Status = Status(0x05);
    pub const ERROR_INVALID_SURFACE: Status = Status(0x06);
    pub const ERROR_INVALID_BUFFER: Status = Status(0x07);
    pub const ERROR_INVALID_IMAGE: Status = Status(0x08);
    pub const ERROR_ATTR_NOT_SUPPORTED: Status = Status(0x0a);
    pub const ERROR_MAX_NUM_EXCEEDED: Status = Status(0x0b);
    pub const ERROR_UNSUPPORTED_PROFILE: Status = Status(0x0c);
    pub const ERROR_UNSUPPORTED_ENTRYPOINT: Status = Status(0x0d);
    pub const ERROR_UNSUPPORTED_RT_FORMAT: Status = Status(0x0e);
    pub const ERROR_UNSUPPORTED_BUFFERTYPE: Status = Status(0x0f);
    pub const ERROR_SURFACE_BUSY: Status = Status(0x10);
    pub const ERROR_INVALID_PARAMETER: Status = Status(0x12);
    pub const ERROR_RESOLUTION_NOT_SUPPORTED: Status = Status(0x13);
    pub const ERROR_UNIMPLEMENTED: Status = Status(0x14);
    pub const ERROR_DECODING_ERROR: Status = Status(0x17);
    pub const ERROR_UNKNOWN: Status = Status(-1);

    /// Converts a raw status into a `Result`.
    pub fn check(raw: i32) -> Result<(), Status> {
        match raw {
            0 => Ok(()),
            status => Err(Status(status)),
        }
    }

    /// Generic description of the status, matching the wording used by libva.
    ///
    /// Backends with their own status-to-string facility should prefer it.
    pub fn description(self) -> &'static str {
        match self {
            Status::SUCCESS => "success (no error)",
            Status::ERROR_OPERATION_FAILED => "operation failed",
            Status::ERROR_ALLOCATION_FAILED => "resource allocation failed",
            Status::ERROR_INVALID_DISPLAY => "invalid VADisplay",
            Status::ERROR_INVALID_CONFIG => "invalid VAConfigID",
            Status::ERROR_INVALID_CONTEXT => "invalid VAContextID",
            Status::ERROR_INVALID_SURFACE => "invalid VASurfaceID",
            Status::ERROR_INVALID_BUFFER => "invalid VABufferID",
            Status::ERROR_INVALID_IMAGE => "invalid VAImageID",
            Status::ERROR_ATTR_NOT_SUPPORTED => "attribute not supported",
            Status::ERROR_MAX_NUM_EXCEEDED => "list argument exceeds maximum number",
            Status::ERROR_UNSUPPORTED_PROFILE => "the requested VAProfile is not supported",
            Status::ERROR_UNSUPPORTED_ENTRYPOINT => "the requested VAEntryPoint is not supported",
            Status::ERROR_UNSUPPORTED_RT_FORMAT => "the requested RT Format is not supported",
            Status::ERROR_UNSUPPORTED_BUFFERTYPE => "the requested VABufferType is not supported",
            Status::ERROR_SURFACE_BUSY => "surface is in use",
            Status::ERROR_INVALID_PARAMETER => "invalid parameter",
            Status::ERROR_RESOLUTION_NOT_SUPPORTED => "resolution not supported",
            Status::ERROR_UNIMPLEMENTED => "the requested function is not implemented",
            Status::ERROR_DECODING_ERROR => "internal decoding error",
            _ => "unknown libva error",
        }
    }
}

/// Signature of the diagnostic callbacks a backend invokes, possibly from its own threads.
pub type MessageCallback = unsafe extern "C" fn(user_context: *mut c_void, message: *const c_char);

/// Raw entry points of an acceleration backend.
///
/// One value of this trait stands for one native display connection. All methods report failure
/// as the raw [`Status`] returned by the native call, without any interpretation.
pub trait Backend {
    /// Registers the error and info message callbacks. `None` unregisters them.
    ///
    /// # Safety
    ///
    /// `user_context` is handed back verbatim to the callbacks, possibly from another thread. It
    /// must stay valid until the callbacks are unregistered or [`Backend::terminate`] returned.
    unsafe fn set_message_callbacks(
        &self,
        error: Option<MessageCallback>,
        info: Option<MessageCallback>,
        user_context: *mut c_void,
    );

    fn initialize(&self) -> Result<Version, Status>;
    fn terminate(&self) -> Result<(), Status>;

    /// Returns the backend's description of `status`.
    fn status_str(&self, status: Status) -> String;
    fn vendor_string(&self) -> String;

    fn max_num_profiles(&self) -> usize;
    fn max_num_entrypoints(&self) -> usize;
    /// Returns the raw values of the supported profiles.
    fn query_config_profiles(&self) -> Result<Vec<i32>, Status>;
    /// Returns the raw values of the entrypoints supported for `profile`.
    fn query_config_entrypoints(&self, profile: i32) -> Result<Vec<u32>, Status>;
    /// Fills the `value` of each attribute in `attribs`, using the not-supported sentinel for the
    /// attributes the driver does not know about.
    fn get_config_attributes(
        &self,
        profile: i32,
        entrypoint: u32,
        attribs: &mut [ConfigAttrib],
    ) -> Result<(), Status>;

    fn create_config(
        &self,
        profile: i32,
        entrypoint: u32,
        attribs: &[ConfigAttrib],
    ) -> Result<ConfigId, Status>;
    fn destroy_config(&self, config: ConfigId) -> Result<(), Status>;

    fn create_surface(&self, rt_format: u32, width: u32, height: u32)
        -> Result<SurfaceId, Status>;
    fn destroy_surface(&self, surface: SurfaceId) -> Result<(), Status>;
    /// Blocks until all pending operations on `surface` are complete.
    fn sync_surface(&self, surface: SurfaceId) -> Result<(), Status>;
    fn query_surface_status(&self, surface: SurfaceId) -> Result<u32, Status>;

    fn create_context(
        &self,
        config: ConfigId,
        width: u32,
        height: u32,
        flags: u32,
        render_targets: &[SurfaceId],
    ) -> Result<ContextId, Status>;
    fn destroy_context(&self, context: ContextId) -> Result<(), Status>;

    /// Creates a buffer of `buffer_type` on `context`, initialized with a copy of `size` bytes
    /// read from `data`.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads of `size` bytes for the duration of the call.
    unsafe fn create_buffer(
        &self,
        context: ContextId,
        buffer_type: u32,
        data: *const c_void,
        size: usize,
    ) -> Result<BufferId, Status>;
    fn destroy_buffer(&self, buffer: BufferId) -> Result<(), Status>;
    /// Maps `buffer` into the client's address space.
    ///
    /// The returned pointer is valid until the matching [`Backend::unmap_buffer`] call.
    fn map_buffer(&self, buffer: BufferId) -> Result<NonNull<u8>, Status>;
    fn unmap_buffer(&self, buffer: BufferId) -> Result<(), Status>;

    fn begin_picture(&self, context: ContextId, target: SurfaceId) -> Result<(), Status>;
    fn render_picture(&self, context: ContextId, buffers: &[BufferId]) -> Result<(), Status>;
    fn end_picture(&self, context: ContextId) -> Result<(), Status>;

    /// Derives an image sharing the storage of `surface`.
    fn derive_image(&self, surface: SurfaceId) -> Result<ImageDescriptor, Status>;
    fn destroy_image(&self, image: ImageId) -> Result<(), Status>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_check() {
        assert_eq!(Status::check(0), Ok(()));
        assert_eq!(Status::check(0x10), Err(Status::ERROR_SURFACE_BUSY));
        assert_eq!(Status::ERROR_SURFACE_BUSY.description(), "surface is in use");
        assert_eq!(Status(0x7777).description(), "unknown libva error");
    }
}
