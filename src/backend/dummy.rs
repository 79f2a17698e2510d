// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the session layer run so we
//! can test it in isolation.
//!
//! The dummy backend simulates a small decode-only driver in memory: it tracks the objects it
//! hands out, enforces the same ordering rules a real driver would, and lets tests inject
//! failures and diagnostic messages.

use std::cell::Cell;
use std::cell::RefCell;
use std::cell::RefMut;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ffi::CString;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::align_up;
use crate::backend::Backend;
use crate::backend::BufferId;
use crate::backend::ConfigId;
use crate::backend::ContextId;
use crate::backend::ImageId;
use crate::backend::MessageCallback;
use crate::backend::Status;
use crate::backend::SurfaceId;
use crate::capabilities::ConfigAttrib;
use crate::capabilities::ConfigAttribType;
use crate::capabilities::Entrypoint;
use crate::capabilities::Profile;
use crate::capabilities::RtFormat;
use crate::capabilities::ATTRIB_NOT_SUPPORTED;
use crate::display::DisplaySource;
use crate::display::Version;
use crate::image::ImageDescriptor;
use crate::surface::SurfaceStatus;
use crate::Fourcc;
use crate::PlaneLayout;
use crate::Resolution;

const VENDOR: &str = "Dummy VA driver 1.0";
const MAX_PICTURE_SIZE: u32 = 4096;
/// Raw profile value reported by the driver that does not match any known profile.
const UNKNOWN_PROFILE: i32 = 99;
const IMAGE_PITCH_ALIGNMENT: u32 = 64;
const NUM_BUFFER_TYPES: u32 = 14;

/// Number of calls made to each entry point of a [`DummyBackend`].
///
/// Clones share the same counters, so a counter can outlive the backend it was obtained from.
#[derive(Clone, Debug, Default)]
pub struct CallCounter(Rc<RefCell<HashMap<&'static str, usize>>>);

impl CallCounter {
    /// Returns the number of times entry point `call` has been invoked, successfully or not.
    pub fn get(&self, call: &str) -> usize {
        self.0.borrow().get(call).copied().unwrap_or(0)
    }

    fn increment(&self, call: &'static str) {
        *self.0.borrow_mut().entry(call).or_insert(0) += 1;
    }
}

#[derive(Clone, Copy)]
struct Callbacks {
    error: Option<MessageCallback>,
    info: Option<MessageCallback>,
    user_context: *mut c_void,
}

struct SurfaceState {
    rt_format: u32,
    resolution: Resolution,
    /// Raw `SurfaceStatus` value.
    status: u32,
    image: Option<ImageId>,
}

struct ContextState {
    resolution: Resolution,
    render_targets: Vec<SurfaceId>,
    picture: Option<SurfaceId>,
    rendered: Vec<BufferId>,
}

struct BufferState {
    data: Vec<u8>,
    mapped: bool,
}

struct ImageState {
    surface: SurfaceId,
    buffer: BufferId,
}

struct State {
    initialized: bool,
    next_id: u32,
    /// Supported entrypoints of each supported profile, by raw value.
    entrypoints: BTreeMap<i32, Vec<u32>>,
    configs: HashMap<ConfigId, (i32, u32)>,
    surfaces: HashMap<SurfaceId, SurfaceState>,
    contexts: HashMap<ContextId, ContextState>,
    buffers: HashMap<BufferId, BufferState>,
    images: HashMap<ImageId, ImageState>,
}

impl State {
    fn new() -> Self {
        let vld = vec![Entrypoint::Vld as u32];
        let entrypoints = BTreeMap::from([
            (Profile::Mpeg2Main as i32, vld.clone()),
            (Profile::H264Main as i32, vld.clone()),
            (
                Profile::H264High as i32,
                vec![Entrypoint::Vld as u32, Entrypoint::EncSlice as u32],
            ),
            (Profile::JpegBaseline as i32, vld.clone()),
            (Profile::HevcMain as i32, vld),
        ]);

        Self {
            initialized: false,
            next_id: 1,
            entrypoints,
            configs: Default::default(),
            surfaces: Default::default(),
            contexts: Default::default(),
            buffers: Default::default(),
            images: Default::default(),
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_pair(&self, profile: i32, entrypoint: u32) -> Result<(), Status> {
        let entrypoints = self
            .entrypoints
            .get(&profile)
            .ok_or(Status::ERROR_UNSUPPORTED_PROFILE)?;

        if entrypoints.contains(&entrypoint) {
            Ok(())
        } else {
            Err(Status::ERROR_UNSUPPORTED_ENTRYPOINT)
        }
    }

    fn attribute_value(profile: i32, entrypoint: u32, kind: ConfigAttribType) -> u32 {
        let decode = entrypoint == Entrypoint::Vld as u32;

        match kind {
            ConfigAttribType::RtFormat if decode && profile == Profile::JpegBaseline as i32 => {
                (RtFormat::YUV420 | RtFormat::YUV400 | RtFormat::YUV422 | RtFormat::YUV444).0
            }
            ConfigAttribType::RtFormat if decode => (RtFormat::YUV420 | RtFormat::YUV400).0,
            ConfigAttribType::RtFormat => RtFormat::YUV420.0,
            ConfigAttribType::MaxPictureWidth | ConfigAttribType::MaxPictureHeight => {
                MAX_PICTURE_SIZE
            }
            _ => ATTRIB_NOT_SUPPORTED,
        }
    }

    fn surface_mut(&mut self, surface: SurfaceId) -> Result<&mut SurfaceState, Status> {
        self.surfaces
            .get_mut(&surface)
            .ok_or(Status::ERROR_INVALID_SURFACE)
    }

    fn context_mut(&mut self, context: ContextId) -> Result<&mut ContextState, Status> {
        self.contexts
            .get_mut(&context)
            .ok_or(Status::ERROR_INVALID_CONTEXT)
    }

    fn buffer_mut(&mut self, buffer: BufferId) -> Result<&mut BufferState, Status> {
        self.buffers
            .get_mut(&buffer)
            .ok_or(Status::ERROR_INVALID_BUFFER)
    }
}

/// In-memory backend simulating a decode-only driver.
pub struct DummyBackend {
    state: RefCell<State>,
    calls: CallCounter,
    /// Failures to inject on the next call of each entry point.
    failures: RefCell<HashMap<&'static str, Status>>,
    callbacks: Cell<Option<Callbacks>>,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State::new()),
            calls: Default::default(),
            failures: Default::default(),
            callbacks: Cell::new(None),
        }
    }

    /// Returns the number of times entry point `call` has been invoked.
    pub fn call_count(&self, call: &str) -> usize {
        self.calls.get(call)
    }

    /// Returns a handle to the call counters of this backend.
    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Makes the next invocation of entry point `call` fail with `status`.
    pub fn fail_next(&self, call: &'static str, status: Status) {
        self.failures.borrow_mut().insert(call, status);
    }

    /// Replaces the entrypoints supported for `profile`, adding the profile if needed.
    pub fn set_entrypoints(&self, profile: Profile, entrypoints: &[Entrypoint]) {
        self.state.borrow_mut().entrypoints.insert(
            profile as i32,
            entrypoints.iter().map(|e| *e as u32).collect(),
        );
    }

    /// Sends `message` through the registered error callback, as a driver would.
    pub fn emit_error(&self, message: &str) {
        self.emit(message, |callbacks| callbacks.error);
    }

    /// Sends `message` through the registered info callback, as a driver would.
    pub fn emit_info(&self, message: &str) {
        self.emit(message, |callbacks| callbacks.info);
    }

    fn emit(&self, message: &str, select: fn(&Callbacks) -> Option<MessageCallback>) {
        let Some(callbacks) = self.callbacks.get() else {
            return;
        };
        let Some(callback) = select(&callbacks) else {
            return;
        };
        let Ok(message) = CString::new(message) else {
            return;
        };

        // SAFETY: the registrant guarantees `user_context` is valid while the callbacks are
        // registered, and `message` outlives the call.
        unsafe { callback(callbacks.user_context, message.as_ptr()) };
    }

    /// Returns the coded size `context` was created with.
    pub fn context_size(&self, context: ContextId) -> Option<Resolution> {
        self.state
            .borrow()
            .contexts
            .get(&context)
            .map(|c| c.resolution)
    }

    /// Returns the size of `buffer`, or `None` if it does not exist.
    pub fn buffer_size(&self, buffer: BufferId) -> Option<usize> {
        self.state
            .borrow()
            .buffers
            .get(&buffer)
            .map(|b| b.data.len())
    }

    /// Returns the content of `buffer`, or `None` if it does not exist.
    pub fn buffer_data(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .buffers
            .get(&buffer)
            .map(|b| b.data.clone())
    }

    /// Overrides the raw status reported for `surface` until it is next synced or rendered to.
    pub fn set_surface_status(&self, surface: SurfaceId, status: u32) {
        if let Some(surface) = self.state.borrow_mut().surfaces.get_mut(&surface) {
            surface.status = status;
        }
    }

    /// Whether `buffer` is currently mapped.
    pub fn is_mapped(&self, buffer: BufferId) -> bool {
        self.state
            .borrow()
            .buffers
            .get(&buffer)
            .map(|b| b.mapped)
            .unwrap_or(false)
    }

    /// Returns all the buffers rendered on `context` so far, in submission order.
    pub fn rendered_buffers(&self, context: ContextId) -> Vec<BufferId> {
        self.state
            .borrow()
            .contexts
            .get(&context)
            .map(|c| c.rendered.clone())
            .unwrap_or_default()
    }

    /// Number of objects of any kind currently allocated.
    pub fn live_objects(&self) -> usize {
        let state = self.state.borrow();
        state.configs.len()
            + state.surfaces.len()
            + state.contexts.len()
            + state.buffers.len()
            + state.images.len()
    }

    /// Records a call to entry point `call`, failing if a failure has been injected for it.
    fn enter(&self, call: &'static str) -> Result<(), Status> {
        self.calls.increment(call);

        match self.failures.borrow_mut().remove(call) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    /// Records a call to entry point `call` and returns the driver state if the display is
    /// initialized.
    fn enter_initialized(&self, call: &'static str) -> Result<RefMut<'_, State>, Status> {
        self.enter(call)?;

        let state = self.state.borrow_mut();
        if state.initialized {
            Ok(state)
        } else {
            Err(Status::ERROR_INVALID_DISPLAY)
        }
    }
}

impl Backend for DummyBackend {
    unsafe fn set_message_callbacks(
        &self,
        error: Option<MessageCallback>,
        info: Option<MessageCallback>,
        user_context: *mut c_void,
    ) {
        self.callbacks.set(match (error, info) {
            (None, None) => None,
            (error, info) => Some(Callbacks {
                error,
                info,
                user_context,
            }),
        });
    }

    fn initialize(&self) -> Result<Version, Status> {
        self.enter("vaInitialize")?;
        self.state.borrow_mut().initialized = true;
        self.emit_info(&format!("{} initialized", VENDOR));

        Ok(Version {
            major: 1,
            minor: 20,
        })
    }

    fn terminate(&self) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaTerminate")?;
        state.initialized = false;
        self.callbacks.set(None);

        Ok(())
    }

    fn status_str(&self, status: Status) -> String {
        status.description().to_string()
    }

    fn vendor_string(&self) -> String {
        VENDOR.to_string()
    }

    fn max_num_profiles(&self) -> usize {
        16
    }

    fn max_num_entrypoints(&self) -> usize {
        8
    }

    fn query_config_profiles(&self) -> Result<Vec<i32>, Status> {
        let state = self.enter_initialized("vaQueryConfigProfiles")?;

        let mut profiles: Vec<i32> = state.entrypoints.keys().copied().collect();
        profiles.push(UNKNOWN_PROFILE);
        Ok(profiles)
    }

    fn query_config_entrypoints(&self, profile: i32) -> Result<Vec<u32>, Status> {
        let state = self.enter_initialized("vaQueryConfigEntrypoints")?;

        state
            .entrypoints
            .get(&profile)
            .cloned()
            .ok_or(Status::ERROR_UNSUPPORTED_PROFILE)
    }

    fn get_config_attributes(
        &self,
        profile: i32,
        entrypoint: u32,
        attribs: &mut [ConfigAttrib],
    ) -> Result<(), Status> {
        let state = self.enter_initialized("vaGetConfigAttributes")?;
        state.check_pair(profile, entrypoint)?;

        for attrib in attribs {
            attrib.value = State::attribute_value(profile, entrypoint, attrib.kind);
        }

        Ok(())
    }

    fn create_config(
        &self,
        profile: i32,
        entrypoint: u32,
        attribs: &[ConfigAttrib],
    ) -> Result<ConfigId, Status> {
        let mut state = self.enter_initialized("vaCreateConfig")?;
        state.check_pair(profile, entrypoint)?;

        for attrib in attribs {
            let supported = State::attribute_value(profile, entrypoint, attrib.kind);
            match attrib.kind {
                ConfigAttribType::RtFormat => {
                    if !RtFormat(supported).contains(RtFormat(attrib.value)) {
                        return Err(Status::ERROR_UNSUPPORTED_RT_FORMAT);
                    }
                }
                _ if supported == ATTRIB_NOT_SUPPORTED => {
                    return Err(Status::ERROR_ATTR_NOT_SUPPORTED)
                }
                _ => (),
            }
        }

        let id = ConfigId(state.allocate_id());
        state.configs.insert(id, (profile, entrypoint));
        Ok(id)
    }

    fn destroy_config(&self, config: ConfigId) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaDestroyConfig")?;

        state
            .configs
            .remove(&config)
            .map(|_| ())
            .ok_or(Status::ERROR_INVALID_CONFIG)
    }

    fn create_surface(
        &self,
        rt_format: u32,
        width: u32,
        height: u32,
    ) -> Result<SurfaceId, Status> {
        let mut state = self.enter_initialized("vaCreateSurfaces")?;

        if rt_format == 0 {
            return Err(Status::ERROR_UNSUPPORTED_RT_FORMAT);
        }
        if width == 0 || height == 0 || width > MAX_PICTURE_SIZE || height > MAX_PICTURE_SIZE {
            return Err(Status::ERROR_ALLOCATION_FAILED);
        }

        let id = SurfaceId(state.allocate_id());
        state.surfaces.insert(
            id,
            SurfaceState {
                rt_format,
                resolution: Resolution { width, height },
                status: SurfaceStatus::Ready as u32,
                image: None,
            },
        );
        Ok(id)
    }

    fn destroy_surface(&self, surface: SurfaceId) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaDestroySurfaces")?;

        let in_use = state
            .contexts
            .values()
            .any(|c| c.render_targets.contains(&surface));
        if in_use || state.surface_mut(surface)?.image.is_some() {
            return Err(Status::ERROR_SURFACE_BUSY);
        }

        state.surfaces.remove(&surface);
        Ok(())
    }

    fn sync_surface(&self, surface: SurfaceId) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaSyncSurface")?;

        // Decoding is instantaneous here: once synced, the surface is ready.
        state.surface_mut(surface)?.status = SurfaceStatus::Ready as u32;
        Ok(())
    }

    fn query_surface_status(&self, surface: SurfaceId) -> Result<u32, Status> {
        let mut state = self.enter_initialized("vaQuerySurfaceStatus")?;

        Ok(state.surface_mut(surface)?.status)
    }

    fn create_context(
        &self,
        config: ConfigId,
        width: u32,
        height: u32,
        _flags: u32,
        render_targets: &[SurfaceId],
    ) -> Result<ContextId, Status> {
        let mut state = self.enter_initialized("vaCreateContext")?;

        if !state.configs.contains_key(&config) {
            return Err(Status::ERROR_INVALID_CONFIG);
        }
        if width == 0 || height == 0 || width > MAX_PICTURE_SIZE || height > MAX_PICTURE_SIZE {
            return Err(Status::ERROR_RESOLUTION_NOT_SUPPORTED);
        }
        if render_targets.iter().any(|s| !state.surfaces.contains_key(s)) {
            return Err(Status::ERROR_INVALID_SURFACE);
        }

        let id = ContextId(state.allocate_id());
        state.contexts.insert(
            id,
            ContextState {
                resolution: Resolution { width, height },
                render_targets: render_targets.to_vec(),
                picture: None,
                rendered: Vec::new(),
            },
        );
        Ok(id)
    }

    fn destroy_context(&self, context: ContextId) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaDestroyContext")?;

        state
            .contexts
            .remove(&context)
            .map(|_| ())
            .ok_or(Status::ERROR_INVALID_CONTEXT)
    }

    unsafe fn create_buffer(
        &self,
        context: ContextId,
        buffer_type: u32,
        data: *const c_void,
        size: usize,
    ) -> Result<BufferId, Status> {
        let mut state = self.enter_initialized("vaCreateBuffer")?;

        state.context_mut(context)?;
        if buffer_type >= NUM_BUFFER_TYPES {
            return Err(Status::ERROR_UNSUPPORTED_BUFFERTYPE);
        }

        let data = if size == 0 || data.is_null() {
            Vec::new()
        } else {
            // SAFETY: guaranteed by the caller.
            let data = unsafe { std::slice::from_raw_parts(data as *const u8, size) };
            data.to_vec()
        };

        let id = BufferId(state.allocate_id());
        state.buffers.insert(id, BufferState { data, mapped: false });
        Ok(id)
    }

    fn destroy_buffer(&self, buffer: BufferId) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaDestroyBuffer")?;

        if state.images.values().any(|i| i.buffer == buffer) {
            return Err(Status::ERROR_INVALID_BUFFER);
        }
        state
            .buffers
            .remove(&buffer)
            .map(|_| ())
            .ok_or(Status::ERROR_INVALID_BUFFER)
    }

    fn map_buffer(&self, buffer: BufferId) -> Result<NonNull<u8>, Status> {
        let mut state = self.enter_initialized("vaMapBuffer")?;

        let buffer = state.buffer_mut(buffer)?;
        buffer.mapped = true;
        // The heap storage of the vector does not move until the buffer is destroyed.
        NonNull::new(buffer.data.as_mut_ptr()).ok_or(Status::ERROR_OPERATION_FAILED)
    }

    fn unmap_buffer(&self, buffer: BufferId) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaUnmapBuffer")?;

        let buffer = state.buffer_mut(buffer)?;
        if !buffer.mapped {
            return Err(Status::ERROR_OPERATION_FAILED);
        }
        buffer.mapped = false;
        Ok(())
    }

    fn begin_picture(&self, context: ContextId, target: SurfaceId) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaBeginPicture")?;

        state.surface_mut(target)?;
        let context = state.context_mut(context)?;
        if context.picture.is_some() {
            return Err(Status::ERROR_OPERATION_FAILED);
        }
        context.picture = Some(target);
        Ok(())
    }

    fn render_picture(&self, context: ContextId, buffers: &[BufferId]) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaRenderPicture")?;

        if buffers.iter().any(|b| !state.buffers.contains_key(b)) {
            return Err(Status::ERROR_INVALID_BUFFER);
        }
        let context = state.context_mut(context)?;
        if context.picture.is_none() {
            return Err(Status::ERROR_OPERATION_FAILED);
        }
        context.rendered.extend_from_slice(buffers);
        Ok(())
    }

    fn end_picture(&self, context: ContextId) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaEndPicture")?;

        let target = state
            .context_mut(context)?
            .picture
            .take()
            .ok_or(Status::ERROR_OPERATION_FAILED)?;
        state.surface_mut(target)?.status = SurfaceStatus::Rendering as u32;
        Ok(())
    }

    fn derive_image(&self, surface: SurfaceId) -> Result<ImageDescriptor, Status> {
        let mut state = self.enter_initialized("vaDeriveImage")?;

        let target = state.surface_mut(surface)?;
        if target.image.is_some() {
            return Err(Status::ERROR_SURFACE_BUSY);
        }
        // Only 4:2:0 surfaces are stored in a directly mappable layout.
        if target.rt_format != RtFormat::YUV420.0 {
            return Err(Status::ERROR_OPERATION_FAILED);
        }
        let Resolution { width, height } = target.resolution;

        let pitch =
            align_up(width, IMAGE_PITCH_ALIGNMENT).ok_or(Status::ERROR_ALLOCATION_FAILED)? as usize;
        let luma_size = pitch * height as usize;
        let chroma_size = pitch * height.div_ceil(2) as usize;
        let data_size = luma_size + chroma_size;

        let id = ImageId(state.allocate_id());
        let buffer = BufferId(state.allocate_id());
        state.buffers.insert(
            buffer,
            BufferState {
                data: vec![0; data_size],
                mapped: false,
            },
        );
        state.images.insert(id, ImageState { surface, buffer });
        state.surface_mut(surface)?.image = Some(id);

        Ok(ImageDescriptor {
            id,
            buffer,
            format: Fourcc::NV12,
            width,
            height,
            data_size,
            planes: vec![
                PlaneLayout {
                    offset: 0,
                    stride: pitch,
                },
                PlaneLayout {
                    offset: luma_size,
                    stride: pitch,
                },
            ],
        })
    }

    fn destroy_image(&self, image: ImageId) -> Result<(), Status> {
        let mut state = self.enter_initialized("vaDestroyImage")?;

        let image = state
            .images
            .remove(&image)
            .ok_or(Status::ERROR_INVALID_IMAGE)?;
        state.buffers.remove(&image.buffer);
        if let Some(surface) = state.surfaces.get_mut(&image.surface) {
            surface.image = None;
        }

        Ok(())
    }
}

impl DisplaySource for DummyBackend {
    type Backend = Self;

    fn acquire(self) -> anyhow::Result<Self> {
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized() -> DummyBackend {
        let backend = DummyBackend::new();
        backend.initialize().unwrap();
        backend
    }

    #[test]
    fn calls_before_initialize_fail() {
        let backend = DummyBackend::new();

        assert_eq!(
            backend.create_surface(RtFormat::YUV420.0, 16, 16),
            Err(Status::ERROR_INVALID_DISPLAY)
        );
        assert_eq!(backend.terminate(), Err(Status::ERROR_INVALID_DISPLAY));
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let backend = initialized();
        backend.fail_next("vaCreateSurfaces", Status::ERROR_ALLOCATION_FAILED);

        assert_eq!(
            backend.create_surface(RtFormat::YUV420.0, 16, 16),
            Err(Status::ERROR_ALLOCATION_FAILED)
        );
        assert!(backend.create_surface(RtFormat::YUV420.0, 16, 16).is_ok());
        assert_eq!(backend.call_count("vaCreateSurfaces"), 2);
    }

    #[test]
    fn surface_in_use_cannot_be_destroyed() {
        let backend = initialized();
        let config = backend
            .create_config(Profile::H264High as i32, Entrypoint::Vld as u32, &[])
            .unwrap();
        let surface = backend.create_surface(RtFormat::YUV420.0, 64, 64).unwrap();
        let context = backend.create_context(config, 64, 64, 0, &[surface]).unwrap();

        assert_eq!(backend.destroy_surface(surface), Err(Status::ERROR_SURFACE_BUSY));
        backend.destroy_context(context).unwrap();
        backend.destroy_surface(surface).unwrap();
        backend.destroy_config(config).unwrap();
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn surface_status_follows_decoding() {
        let backend = initialized();
        let config = backend
            .create_config(Profile::H264High as i32, Entrypoint::Vld as u32, &[])
            .unwrap();
        let surface = backend.create_surface(RtFormat::YUV420.0, 64, 64).unwrap();
        let context = backend.create_context(config, 64, 64, 0, &[surface]).unwrap();

        backend.begin_picture(context, surface).unwrap();
        backend.end_picture(context).unwrap();
        assert_eq!(
            backend.query_surface_status(surface),
            Ok(SurfaceStatus::Rendering as u32)
        );
        backend.sync_surface(surface).unwrap();
        assert_eq!(
            backend.query_surface_status(surface),
            Ok(SurfaceStatus::Ready as u32)
        );
    }

    #[test]
    fn buffer_content_is_copied() {
        let backend = initialized();
        let config = backend
            .create_config(Profile::H264High as i32, Entrypoint::Vld as u32, &[])
            .unwrap();
        let surface = backend.create_surface(RtFormat::YUV420.0, 64, 64).unwrap();
        let context = backend.create_context(config, 64, 64, 0, &[surface]).unwrap();

        let data = [1u8, 2, 3, 4];
        // SAFETY: `data` is valid for reads of its length.
        let buffer = unsafe {
            backend.create_buffer(context, 5, data.as_ptr() as *const c_void, data.len())
        }
        .unwrap();
        assert_eq!(backend.buffer_data(buffer), Some(data.to_vec()));

        // SAFETY: no data is read for an empty buffer.
        let res = unsafe { backend.create_buffer(context, 42, std::ptr::null(), 0) };
        assert_eq!(res, Err(Status::ERROR_UNSUPPORTED_BUFFERTYPE));
    }
}
