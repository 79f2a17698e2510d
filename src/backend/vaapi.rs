// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VAAPI backend, calling into libva through the raw bindings of `cros-libva`.
//!
//! [`DrmDisplay`] acquires a native display on a DRM render node. The resulting [`VaapiBackend`]
//! is a thin wrapper around the libva entry points: statuses are returned untouched so the
//! session layer can turn them into typed errors.

use std::cell::Cell;
use std::ffi::c_void;
use std::ffi::CStr;
use std::ffi::CString;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::ptr::NonNull;

use anyhow::anyhow;
use anyhow::Context as _;
use nix::sys::stat::stat;
use nix::sys::stat::SFlag;

use crate::backend::Backend;
use crate::backend::BufferId;
use crate::backend::ConfigId;
use crate::backend::ContextId;
use crate::backend::ImageId;
use crate::backend::MessageCallback;
use crate::backend::Status;
use crate::backend::SurfaceId;
use crate::capabilities::ConfigAttrib;
use crate::display::DisplaySource;
use crate::display::Version;
use crate::image::ImageDescriptor;
use crate::Fourcc;
use crate::PlaneLayout;

/// Default DRM render node.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/dri/renderD128";

/// Environment variable libva reads the driver search path from.
const DRIVERS_PATH_VAR: &str = "LIBVA_DRIVERS_PATH";

fn to_raw_attribs(attribs: &[ConfigAttrib]) -> Vec<libva::VAConfigAttrib> {
    attribs
        .iter()
        .map(|a| libva::VAConfigAttrib {
            type_: a.kind as u32 as _,
            value: a.value,
        })
        .collect()
}

/// A libva display opened on a DRM device.
pub struct VaapiBackend {
    display: libva::VADisplay,
    /// Keeps the device open for as long as the display uses it.
    _device: File,
    terminated: Cell<bool>,
}

impl VaapiBackend {
    fn call(&self, status: libva::VAStatus) -> Result<(), Status> {
        Status::check(status as i32)
    }
}

impl Backend for VaapiBackend {
    unsafe fn set_message_callbacks(
        &self,
        error: Option<MessageCallback>,
        info: Option<MessageCallback>,
        user_context: *mut c_void,
    ) {
        // SAFETY: `self.display` is a valid display. The validity of `user_context` is
        // guaranteed by the caller.
        unsafe {
            libva::vaSetErrorCallback(self.display, error, user_context);
            libva::vaSetInfoCallback(self.display, info, user_context);
        }
    }

    fn initialize(&self) -> Result<Version, Status> {
        let mut major = 0;
        let mut minor = 0;

        // SAFETY: `self.display` is a valid display and the version pointers are valid.
        self.call(unsafe { libva::vaInitialize(self.display, &mut major, &mut minor) })?;

        Ok(Version {
            major: major as i32,
            minor: minor as i32,
        })
    }

    fn terminate(&self) -> Result<(), Status> {
        self.terminated.set(true);
        // SAFETY: `self.display` is a valid display.
        self.call(unsafe { libva::vaTerminate(self.display) })
    }

    fn status_str(&self, status: Status) -> String {
        // SAFETY: `vaErrorStr` always returns a static, NUL-terminated string.
        let message = unsafe { CStr::from_ptr(libva::vaErrorStr(status.0 as _)) };
        message.to_string_lossy().into_owned()
    }

    fn vendor_string(&self) -> String {
        // SAFETY: `self.display` is a valid display.
        let vendor = unsafe { libva::vaQueryVendorString(self.display) };
        if vendor.is_null() {
            return String::new();
        }

        // SAFETY: the vendor string is owned by the display and NUL-terminated.
        let vendor = unsafe { CStr::from_ptr(vendor) };
        vendor.to_string_lossy().into_owned()
    }

    fn max_num_profiles(&self) -> usize {
        // SAFETY: `self.display` is a valid display.
        let max = unsafe { libva::vaMaxNumProfiles(self.display) };
        max.max(0) as usize
    }

    fn max_num_entrypoints(&self) -> usize {
        // SAFETY: `self.display` is a valid display.
        let max = unsafe { libva::vaMaxNumEntrypoints(self.display) };
        max.max(0) as usize
    }

    fn query_config_profiles(&self) -> Result<Vec<i32>, Status> {
        let mut profiles = vec![0; self.max_num_profiles()];
        let mut count = 0;

        // SAFETY: `profiles` has room for the maximum number of profiles the driver can return.
        self.call(unsafe {
            libva::vaQueryConfigProfiles(self.display, profiles.as_mut_ptr(), &mut count)
        })?;
        profiles.truncate(count as usize);

        Ok(profiles.into_iter().map(|p| p as i32).collect())
    }

    fn query_config_entrypoints(&self, profile: i32) -> Result<Vec<u32>, Status> {
        let mut entrypoints = vec![0; self.max_num_entrypoints()];
        let mut count = 0;

        // SAFETY: `entrypoints` has room for the maximum number of entrypoints the driver can
        // return.
        self.call(unsafe {
            libva::vaQueryConfigEntrypoints(
                self.display,
                profile as _,
                entrypoints.as_mut_ptr(),
                &mut count,
            )
        })?;
        entrypoints.truncate(count as usize);

        Ok(entrypoints.into_iter().map(|e| e as u32).collect())
    }

    fn get_config_attributes(
        &self,
        profile: i32,
        entrypoint: u32,
        attribs: &mut [ConfigAttrib],
    ) -> Result<(), Status> {
        let mut raw = to_raw_attribs(attribs);

        // SAFETY: `raw` is valid for the number of elements passed.
        self.call(unsafe {
            libva::vaGetConfigAttributes(
                self.display,
                profile as _,
                entrypoint as _,
                raw.as_mut_ptr(),
                raw.len() as _,
            )
        })?;

        for (attrib, raw) in attribs.iter_mut().zip(raw) {
            attrib.value = raw.value;
        }

        Ok(())
    }

    fn create_config(
        &self,
        profile: i32,
        entrypoint: u32,
        attribs: &[ConfigAttrib],
    ) -> Result<ConfigId, Status> {
        let mut raw = to_raw_attribs(attribs);
        let mut id = 0;

        // SAFETY: `raw` is valid for the number of elements passed, and `id` is a valid
        // destination.
        self.call(unsafe {
            libva::vaCreateConfig(
                self.display,
                profile as _,
                entrypoint as _,
                raw.as_mut_ptr(),
                raw.len() as _,
                &mut id,
            )
        })?;

        Ok(ConfigId(id))
    }

    fn destroy_config(&self, config: ConfigId) -> Result<(), Status> {
        // SAFETY: `self.display` is a valid display.
        self.call(unsafe { libva::vaDestroyConfig(self.display, config.0) })
    }

    fn create_surface(
        &self,
        rt_format: u32,
        width: u32,
        height: u32,
    ) -> Result<SurfaceId, Status> {
        let mut id = 0;

        // SAFETY: `id` has room for the single surface requested. No attributes are passed.
        self.call(unsafe {
            libva::vaCreateSurfaces(
                self.display,
                rt_format,
                width,
                height,
                &mut id,
                1,
                std::ptr::null_mut(),
                0,
            )
        })?;

        Ok(SurfaceId(id))
    }

    fn destroy_surface(&self, surface: SurfaceId) -> Result<(), Status> {
        let mut id = surface.0;

        // SAFETY: `id` is valid for the single surface passed.
        self.call(unsafe { libva::vaDestroySurfaces(self.display, &mut id, 1) })
    }

    fn sync_surface(&self, surface: SurfaceId) -> Result<(), Status> {
        // SAFETY: `self.display` is a valid display.
        self.call(unsafe { libva::vaSyncSurface(self.display, surface.0) })
    }

    fn query_surface_status(&self, surface: SurfaceId) -> Result<u32, Status> {
        let mut status = 0;

        // SAFETY: `status` is a valid destination.
        self.call(unsafe { libva::vaQuerySurfaceStatus(self.display, surface.0, &mut status) })?;

        Ok(status as u32)
    }

    fn create_context(
        &self,
        config: ConfigId,
        width: u32,
        height: u32,
        flags: u32,
        render_targets: &[SurfaceId],
    ) -> Result<ContextId, Status> {
        let mut targets: Vec<libva::VASurfaceID> = render_targets.iter().map(|s| s.0).collect();
        let mut id = 0;

        // SAFETY: `targets` is valid for the number of elements passed, and `id` is a valid
        // destination.
        self.call(unsafe {
            libva::vaCreateContext(
                self.display,
                config.0,
                width as _,
                height as _,
                flags as _,
                targets.as_mut_ptr(),
                targets.len() as _,
                &mut id,
            )
        })?;

        Ok(ContextId(id))
    }

    fn destroy_context(&self, context: ContextId) -> Result<(), Status> {
        // SAFETY: `self.display` is a valid display.
        self.call(unsafe { libva::vaDestroyContext(self.display, context.0) })
    }

    unsafe fn create_buffer(
        &self,
        context: ContextId,
        buffer_type: u32,
        data: *const c_void,
        size: usize,
    ) -> Result<BufferId, Status> {
        let size = u32::try_from(size).map_err(|_| Status::ERROR_ALLOCATION_FAILED)?;
        let mut id = 0;

        // SAFETY: libva only reads `size` bytes from `data`, which the caller guarantees to be
        // valid.
        self.call(unsafe {
            libva::vaCreateBuffer(
                self.display,
                context.0,
                buffer_type as _,
                size,
                1,
                data as *mut c_void,
                &mut id,
            )
        })?;

        Ok(BufferId(id))
    }

    fn destroy_buffer(&self, buffer: BufferId) -> Result<(), Status> {
        // SAFETY: `self.display` is a valid display.
        self.call(unsafe { libva::vaDestroyBuffer(self.display, buffer.0) })
    }

    fn map_buffer(&self, buffer: BufferId) -> Result<NonNull<u8>, Status> {
        let mut data = std::ptr::null_mut();

        // SAFETY: `data` is a valid destination.
        self.call(unsafe { libva::vaMapBuffer(self.display, buffer.0, &mut data) })?;

        NonNull::new(data as *mut u8).ok_or(Status::ERROR_OPERATION_FAILED)
    }

    fn unmap_buffer(&self, buffer: BufferId) -> Result<(), Status> {
        // SAFETY: `self.display` is a valid display.
        self.call(unsafe { libva::vaUnmapBuffer(self.display, buffer.0) })
    }

    fn begin_picture(&self, context: ContextId, target: SurfaceId) -> Result<(), Status> {
        // SAFETY: `self.display` is a valid display.
        self.call(unsafe { libva::vaBeginPicture(self.display, context.0, target.0) })
    }

    fn render_picture(&self, context: ContextId, buffers: &[BufferId]) -> Result<(), Status> {
        let mut ids: Vec<libva::VABufferID> = buffers.iter().map(|b| b.0).collect();

        // SAFETY: `ids` is valid for the number of elements passed.
        self.call(unsafe {
            libva::vaRenderPicture(self.display, context.0, ids.as_mut_ptr(), ids.len() as _)
        })
    }

    fn end_picture(&self, context: ContextId) -> Result<(), Status> {
        // SAFETY: `self.display` is a valid display.
        self.call(unsafe { libva::vaEndPicture(self.display, context.0) })
    }

    fn derive_image(&self, surface: SurfaceId) -> Result<ImageDescriptor, Status> {
        // SAFETY: `VAImage` is a plain C structure for which all zeroes is a valid value.
        let mut image: libva::VAImage = unsafe { std::mem::zeroed() };

        // SAFETY: `image` is a valid destination.
        self.call(unsafe { libva::vaDeriveImage(self.display, surface.0, &mut image) })?;

        let num_planes = (image.num_planes as usize).min(image.pitches.len());
        let planes = image.offsets[..num_planes]
            .iter()
            .zip(&image.pitches[..num_planes])
            .map(|(offset, pitch)| PlaneLayout {
                offset: *offset as usize,
                stride: *pitch as usize,
            })
            .collect();

        Ok(ImageDescriptor {
            id: ImageId(image.image_id),
            buffer: BufferId(image.buf),
            format: Fourcc(image.format.fourcc),
            width: image.width as u32,
            height: image.height as u32,
            data_size: image.data_size as usize,
            planes,
        })
    }

    fn destroy_image(&self, image: ImageId) -> Result<(), Status> {
        // SAFETY: `self.display` is a valid display.
        self.call(unsafe { libva::vaDestroyImage(self.display, image.0) })
    }
}

impl Drop for VaapiBackend {
    fn drop(&mut self) {
        // Also releases a display whose initialization failed.
        if !self.terminated.get() {
            // SAFETY: `self.display` is a valid display that is not used afterwards.
            unsafe { libva::vaTerminate(self.display) };
        }
    }
}

/// Options for acquiring a display on a DRM device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrmOptions {
    /// DRM device node to open.
    pub device_path: PathBuf,
    /// Name of the driver to load instead of the one libva would pick.
    pub driver_name: Option<String>,
    /// Directory to load the driver from, exported as `LIBVA_DRIVERS_PATH`.
    pub drivers_path: Option<PathBuf>,
}

impl Default for DrmOptions {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            driver_name: None,
            drivers_path: None,
        }
    }
}

impl DrmOptions {
    /// Checks that the device is a character device and that the drivers path, if any, is a
    /// directory.
    pub fn validate(&self) -> anyhow::Result<()> {
        let st = stat(&self.device_path)
            .with_context(|| format!("cannot stat {}", self.device_path.display()))?;
        if SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT != SFlag::S_IFCHR {
            return Err(anyhow!(
                "{} is not a character device",
                self.device_path.display()
            ));
        }

        if let Some(drivers_path) = &self.drivers_path {
            if !drivers_path.is_dir() {
                return Err(anyhow!(
                    "drivers path {} is not a directory",
                    drivers_path.display()
                ));
            }
        }

        Ok(())
    }
}

/// Source of a display opened on a DRM device.
#[derive(Clone, Debug, Default)]
pub struct DrmDisplay {
    options: DrmOptions,
}

impl DrmDisplay {
    pub fn new(options: DrmOptions) -> Self {
        Self { options }
    }
}

impl DisplaySource for DrmDisplay {
    type Backend = VaapiBackend;

    fn acquire(self) -> anyhow::Result<VaapiBackend> {
        let options = self.options;
        options.validate()?;

        if let Some(drivers_path) = &options.drivers_path {
            log::debug!("loading VA drivers from {}", drivers_path.display());
            std::env::set_var(DRIVERS_PATH_VAR, drivers_path);
        }

        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&options.device_path)
            .with_context(|| format!("failed to open {}", options.device_path.display()))?;

        // SAFETY: `device` is an open DRM device and outlives the display.
        let display = unsafe { libva::vaGetDisplayDRM(device.as_raw_fd()) };
        if display.is_null() {
            return Err(anyhow!(
                "no VA display for {}",
                options.device_path.display()
            ));
        }

        let backend = VaapiBackend {
            display,
            _device: device,
            terminated: Cell::new(false),
        };

        if let Some(driver_name) = options.driver_name {
            log::debug!("forcing VA driver {}", driver_name);
            let name = CString::new(driver_name)?;
            // SAFETY: `name` is a valid C string that outlives the call.
            let status = unsafe { libva::vaSetDriverName(backend.display, name.as_ptr() as *mut _) };
            Status::check(status as i32).map_err(|status| {
                anyhow!("vaSetDriverName failed: {}", backend.status_str(status))
            })?;
        }

        log::debug!("acquired VA display on {}", options.device_path.display());

        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = DrmOptions::default();

        assert_eq!(options.device_path, PathBuf::from("/dev/dri/renderD128"));
        assert!(options.driver_name.is_none());
        assert!(options.drivers_path.is_none());
    }

    #[test]
    fn reject_regular_file_as_device() {
        let options = DrmOptions {
            device_path: PathBuf::from("Cargo.toml"),
            ..Default::default()
        };

        assert!(options.validate().is_err());
    }

    #[test]
    fn reject_missing_drivers_path() {
        let options = DrmOptions {
            device_path: PathBuf::from("/dev/null"),
            drivers_path: Some(PathBuf::from("/nonexistent/dri")),
            ..Default::default()
        };

        assert!(options.validate().is_err());

        let options = DrmOptions {
            device_path: PathBuf::from("/dev/null"),
            drivers_path: Some(std::env::temp_dir()),
            ..Default::default()
        };
        options.validate().unwrap();
    }
}
