// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode contexts and the picture submission protocol.
//!
//! A [`Context`] is a decode pipeline bound to a [`Config`] and a render target. Pictures are
//! submitted to it in three steps:
//!
//! 1. [`Context::begin_picture`] selects the surface the picture is decoded into,
//! 2. [`Context::render_picture`] submits the parameter and data buffers of the picture, possibly
//!    in several calls,
//! 3. [`Context::end_picture`] tells the backend to start decoding.
//!
//! Only one picture can be in flight at a time on a given context. Calls made out of this order
//! are rejected with [`VaError::Usage`] without reaching the backend.

use std::ffi::c_void;
use std::rc::Rc;

use crate::backend::Backend;
use crate::backend::BufferId;
use crate::backend::ContextId;
use crate::backend::SurfaceId;
use crate::config::Config;
use crate::display::Display;
use crate::error::Result;
use crate::error::VaError;
use crate::surface::Surface;
use crate::Resolution;

/// Types of the buffers that can be submitted to a context, numbered like `VABufferType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BufferType {
    PictureParameter = 0,
    IqMatrix = 1,
    BitPlane = 2,
    SliceGroupMap = 3,
    SliceParameter = 4,
    SliceData = 5,
    MacroblockParameter = 6,
    ResidualData = 7,
    DeblockingParameter = 8,
    Image = 9,
    ProtectedSliceData = 10,
    QMatrix = 11,
    HuffmanTable = 12,
    Probability = 13,
}

/// Flags passed at context creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContextFlags(pub u32);

impl ContextFlags {
    /// The stream only contains progressive (non-interlaced) pictures.
    pub const PROGRESSIVE: ContextFlags = ContextFlags(0x1);
}

/// Submission state of a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PictureState {
    /// No picture is being submitted.
    Idle,
    /// A picture targeting the given surface has begun and accepts buffers.
    Open(SurfaceId),
}

pub struct Context<B: Backend> {
    display: Rc<Display<B>>,
    id: Option<ContextId>,
    render_target: SurfaceId,
    coded_resolution: Resolution,
    state: PictureState,
    /// Buffers created on this context and not submitted yet.
    pending_buffers: Vec<BufferId>,
    /// Buffers submitted as part of a picture, kept alive until the picture is synced.
    submitted_buffers: Vec<BufferId>,
}

impl<B: Backend> Context<B> {
    pub fn id(&self) -> Result<ContextId> {
        self.id.ok_or_else(|| VaError::usage("context has been destroyed"))
    }

    pub fn state(&self) -> PictureState {
        self.state
    }

    /// Returns the coded resolution of the context, i.e. its size rounded up to the macroblock
    /// alignment.
    pub fn coded_resolution(&self) -> Resolution {
        self.coded_resolution
    }

    pub fn render_target(&self) -> SurfaceId {
        self.render_target
    }

    pub fn display(&self) -> &Rc<Display<B>> {
        &self.display
    }

    /// Creates a buffer of `buffer_type` containing a copy of `data`.
    pub fn create_buffer(&mut self, buffer_type: BufferType, data: &[u8]) -> Result<BufferId> {
        // SAFETY: `data` is a valid slice for the duration of the call.
        unsafe { self.create_buffer_raw(buffer_type, data.as_ptr() as *const c_void, data.len()) }
    }

    /// Creates a buffer of `buffer_type` containing a copy of the fixed-size record `param`.
    ///
    /// `T` must have the exact memory layout the backend expects for this buffer type, e.g. a
    /// `#[repr(C)]` picture parameter structure. The bytes of `param` are not interpreted here.
    pub fn create_param_buffer<T: Copy>(
        &mut self,
        buffer_type: BufferType,
        param: &T,
    ) -> Result<BufferId> {
        // SAFETY: `param` is a valid reference for the duration of the call.
        unsafe {
            self.create_buffer_raw(
                buffer_type,
                param as *const T as *const c_void,
                std::mem::size_of::<T>(),
            )
        }
    }

    /// # Safety
    ///
    /// `data` must be valid for reads of `size` bytes.
    unsafe fn create_buffer_raw(
        &mut self,
        buffer_type: BufferType,
        data: *const c_void,
        size: usize,
    ) -> Result<BufferId> {
        let id = self.id()?;

        let buffer = self.display.check(
            "vaCreateBuffer",
            VaError::Driver,
            // SAFETY: guaranteed by the caller.
            unsafe {
                self.display
                    .backend()
                    .create_buffer(id, buffer_type as u32, data, size)
            },
        )?;
        self.pending_buffers.push(buffer);

        Ok(buffer)
    }

    /// Starts a new picture decoded into `target`.
    pub fn begin_picture(&mut self, target: &Surface<B>) -> Result<()> {
        let id = self.id()?;
        if let PictureState::Open(surface) = self.state {
            return Err(VaError::usage(format!(
                "a picture targeting surface {} is already open",
                surface.0
            )));
        }
        let surface = target.id()?;

        self.display.check(
            "vaBeginPicture",
            VaError::Driver,
            self.display.backend().begin_picture(id, surface),
        )?;
        self.state = PictureState::Open(surface);

        Ok(())
    }

    /// Submits `buffers` for the open picture, in the given order.
    ///
    /// Each buffer must have been created on this context and can only be submitted once.
    pub fn render_picture(&mut self, buffers: &[BufferId]) -> Result<()> {
        let id = self.id()?;
        if self.state == PictureState::Idle {
            return Err(VaError::usage("render_picture called without an open picture"));
        }
        if let Some(buffer) = buffers.iter().find(|b| !self.pending_buffers.contains(b)) {
            return Err(VaError::usage(format!(
                "buffer {} was not created by this context or has already been submitted",
                buffer.0
            )));
        }
        if let Some((_, buffer)) = buffers
            .iter()
            .enumerate()
            .find(|(i, b)| buffers[..*i].contains(b))
        {
            return Err(VaError::usage(format!("buffer {} is submitted twice", buffer.0)));
        }

        self.display.check(
            "vaRenderPicture",
            VaError::Driver,
            self.display.backend().render_picture(id, buffers),
        )?;
        self.pending_buffers.retain(|b| !buffers.contains(b));
        self.submitted_buffers.extend_from_slice(buffers);

        Ok(())
    }

    /// Ends the open picture, letting the backend start processing it. Does not block.
    ///
    /// The context is back to idle after this call, even if the backend reports an error.
    pub fn end_picture(&mut self) -> Result<()> {
        let id = self.id()?;
        if self.state == PictureState::Idle {
            return Err(VaError::usage("end_picture called without an open picture"));
        }

        self.state = PictureState::Idle;
        self.display.check(
            "vaEndPicture",
            VaError::Driver,
            self.display.backend().end_picture(id),
        )
    }

    /// Destroys the buffers of the pictures submitted so far.
    ///
    /// Must only be called once these pictures have completed, e.g. after syncing their target
    /// surface.
    pub fn release_submitted_buffers(&mut self) -> Result<()> {
        let buffers = std::mem::take(&mut self.submitted_buffers);
        self.destroy_buffers(buffers)
    }

    /// Destroys `buffers`, returning the first error after trying all of them.
    fn destroy_buffers(&self, buffers: Vec<BufferId>) -> Result<()> {
        let mut res = Ok(());

        for buffer in buffers {
            let r = self.display.check(
                "vaDestroyBuffer",
                VaError::Driver,
                self.display.backend().destroy_buffer(buffer),
            );
            if res.is_ok() {
                res = r;
            }
        }

        res
    }

    /// Destroys the context and the buffers it still owns.
    ///
    /// Fails if a picture is open. Does nothing if the context has already been destroyed.
    pub fn destroy(&mut self) -> Result<()> {
        if self.id.is_none() {
            return Ok(());
        }
        if let PictureState::Open(_) = self.state {
            return Err(VaError::usage("cannot destroy a context with an open picture"));
        }

        self.release()
    }

    /// Releases the native resources whatever the state of the context.
    fn release(&mut self) -> Result<()> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };

        self.state = PictureState::Idle;
        let mut buffers = std::mem::take(&mut self.pending_buffers);
        buffers.append(&mut self.submitted_buffers);
        let buffers_res = self.destroy_buffers(buffers);

        self.display.object_destroyed();
        let res = self.display.check(
            "vaDestroyContext",
            VaError::Driver,
            self.display.backend().destroy_context(id),
        );

        buffers_res.and(res)
    }
}

impl<B: Backend> Drop for Context<B> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            self.display.report(&e);
        }
    }
}

impl<B: Backend> Display<B> {
    /// Creates a context for `config`, decoding into `render_target`.
    ///
    /// `height` is rounded up to the next multiple of [`MACROBLOCK_SIZE`](crate::MACROBLOCK_SIZE),
    /// as required by the decode pipeline. Fails with [`VaError::Usage`] if the rounded height does
    /// not fit in a `u32`.
    pub fn create_context(
        self: &Rc<Self>,
        config: &Config<B>,
        width: u32,
        height: u32,
        flags: ContextFlags,
        render_target: &Surface<B>,
    ) -> Result<Context<B>> {
        self.ensure_live()?;

        let coded_resolution = Resolution { width, height }
            .macroblock_aligned()
            .ok_or_else(|| {
                VaError::usage(format!("coded height of {}x{} overflows", width, height))
            })?;
        let render_target = render_target.id()?;
        let id = self.check(
            "vaCreateContext",
            VaError::Driver,
            self.backend().create_context(
                config.id()?,
                coded_resolution.width,
                coded_resolution.height,
                flags.0,
                &[render_target],
            ),
        )?;
        self.object_created();

        Ok(Context {
            display: Rc::clone(self),
            id: Some(id),
            render_target,
            coded_resolution,
            state: PictureState::Idle,
            pending_buffers: Vec::new(),
            submitted_buffers: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::Status;
    use crate::capabilities::Entrypoint;
    use crate::capabilities::Profile;
    use crate::capabilities::RtFormat;
    use crate::display::tests::open_dummy;

    /// Stand-in for a codec picture parameter record.
    #[derive(Clone, Copy, Default)]
    #[repr(C)]
    struct PictureParams {
        width: u16,
        height: u16,
        flags: u32,
    }

    struct Fixture {
        display: Rc<Display<DummyBackend>>,
        _config: Config<DummyBackend>,
        surface: Surface<DummyBackend>,
    }

    fn fixture() -> Fixture {
        let display = open_dummy();
        let config = display.create_config(Profile::H264High, Entrypoint::Vld, &[]).unwrap();
        let surface = display.create_surface(RtFormat::YUV420, 320, 240).unwrap();

        Fixture {
            display,
            _config: config,
            surface,
        }
    }

    fn context(f: &Fixture, height: u32) -> Context<DummyBackend> {
        f.display
            .create_context(&f._config, 320, height, ContextFlags::PROGRESSIVE, &f.surface)
            .unwrap()
    }

    #[test]
    fn coded_height_is_macroblock_aligned() {
        let f = fixture();

        assert_eq!(context(&f, 240).coded_resolution(), Resolution::from((320, 240)));
        let ctx = context(&f, 235);
        assert_eq!(ctx.coded_resolution(), Resolution::from((320, 240)));
        // The backend saw the aligned size too.
        assert_eq!(
            f.display.backend().context_size(ctx.id().unwrap()),
            Some(Resolution::from((320, 240)))
        );
    }

    #[test]
    fn overflowing_height_is_rejected_before_the_backend() {
        let f = fixture();

        let err = f
            .display
            .create_context(&f._config, 320, u32::MAX, ContextFlags::PROGRESSIVE, &f.surface)
            .err()
            .unwrap();
        assert!(matches!(err, VaError::Usage(_)));
        assert_eq!(f.display.backend().call_count("vaCreateContext"), 0);

        // The largest height that still rounds is left for the backend to judge.
        let err = f
            .display
            .create_context(&f._config, 320, u32::MAX - 15, ContextFlags::PROGRESSIVE, &f.surface)
            .err()
            .unwrap();
        assert_eq!(err.status(), Some(Status::ERROR_RESOLUTION_NOT_SUPPORTED));
        assert_eq!(f.display.backend().call_count("vaCreateContext"), 1);
    }

    #[test]
    fn submission_protocol() {
        let f = fixture();
        let mut ctx = context(&f, 240);

        let params = ctx
            .create_param_buffer(BufferType::PictureParameter, &PictureParams::default())
            .unwrap();
        let slice = ctx.create_buffer(BufferType::SliceData, &[0u8; 64]).unwrap();
        assert_ne!(params, slice);
        assert_eq!(
            f.display.backend().buffer_size(params),
            Some(std::mem::size_of::<PictureParams>())
        );

        ctx.begin_picture(&f.surface).unwrap();
        assert_eq!(ctx.state(), PictureState::Open(f.surface.id().unwrap()));
        ctx.render_picture(&[params, slice]).unwrap();
        ctx.end_picture().unwrap();
        assert_eq!(ctx.state(), PictureState::Idle);

        // Submission order is preserved.
        assert_eq!(f.display.backend().rendered_buffers(ctx.id().unwrap()), vec![params, slice]);
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let f = fixture();
        let mut ctx = context(&f, 240);
        let slice = ctx.create_buffer(BufferType::SliceData, &[1, 2, 3]).unwrap();

        assert!(matches!(ctx.render_picture(&[slice]), Err(VaError::Usage(_))));
        assert!(matches!(ctx.end_picture(), Err(VaError::Usage(_))));

        ctx.begin_picture(&f.surface).unwrap();
        assert!(matches!(ctx.begin_picture(&f.surface), Err(VaError::Usage(_))));
        assert!(matches!(ctx.destroy(), Err(VaError::Usage(_))));

        let backend = f.display.backend();
        assert_eq!(backend.call_count("vaBeginPicture"), 1);
        assert_eq!(backend.call_count("vaRenderPicture"), 0);
        assert_eq!(backend.call_count("vaEndPicture"), 0);
        assert_eq!(backend.call_count("vaDestroyContext"), 0);
    }

    #[test]
    fn buffers_are_submitted_once() {
        let f = fixture();
        let mut ctx = context(&f, 240);
        let slice = ctx.create_buffer(BufferType::SliceData, &[1, 2, 3]).unwrap();

        ctx.begin_picture(&f.surface).unwrap();
        ctx.render_picture(&[slice]).unwrap();
        assert!(matches!(ctx.render_picture(&[slice]), Err(VaError::Usage(_))));
        assert!(matches!(ctx.render_picture(&[BufferId(4242)]), Err(VaError::Usage(_))));
        ctx.end_picture().unwrap();

        f.surface.sync().unwrap();
        ctx.release_submitted_buffers().unwrap();
        assert_eq!(f.display.backend().buffer_size(slice), None);
    }

    #[test]
    fn duplicate_buffer_in_one_submission_is_rejected() {
        let f = fixture();
        let mut ctx = context(&f, 240);
        let params = ctx.create_buffer(BufferType::PictureParameter, &[0; 8]).unwrap();
        let slice = ctx.create_buffer(BufferType::SliceData, &[1, 2, 3]).unwrap();

        ctx.begin_picture(&f.surface).unwrap();
        let err = ctx.render_picture(&[params, slice, params]).unwrap_err();
        assert!(matches!(err, VaError::Usage(_)));
        assert_eq!(f.display.backend().call_count("vaRenderPicture"), 0);

        // Nothing was consumed: the same buffers can still be submitted once each.
        ctx.render_picture(&[params, slice]).unwrap();
        ctx.end_picture().unwrap();
        assert_eq!(f.display.backend().rendered_buffers(ctx.id().unwrap()), vec![params, slice]);

        f.surface.sync().unwrap();
        ctx.release_submitted_buffers().unwrap();
        assert_eq!(f.display.backend().call_count("vaDestroyBuffer"), 2);
    }

    #[test]
    fn begin_picture_failure_keeps_context_idle() {
        let f = fixture();
        let mut ctx = context(&f, 240);
        f.display.backend().fail_next("vaBeginPicture", Status::ERROR_INVALID_SURFACE);

        let err = ctx.begin_picture(&f.surface).unwrap_err();
        assert!(matches!(err, VaError::Driver(_)));
        assert_eq!(err.driver_status().unwrap().message, "invalid VASurfaceID");
        assert_eq!(ctx.state(), PictureState::Idle);

        ctx.begin_picture(&f.surface).unwrap();
    }

    #[test]
    fn destroy_is_idempotent() {
        let f = fixture();
        let mut ctx = context(&f, 240);
        let pending = ctx.create_buffer(BufferType::SliceData, &[0; 4]).unwrap();

        ctx.destroy().unwrap();
        ctx.destroy().unwrap();
        assert!(matches!(ctx.id(), Err(VaError::Usage(_))));
        assert!(matches!(
            ctx.create_buffer(BufferType::SliceData, &[0; 4]),
            Err(VaError::Usage(_))
        ));
        drop(ctx);

        let backend = f.display.backend();
        assert_eq!(backend.call_count("vaDestroyContext"), 1);
        // Buffers still owned by the context went away with it.
        assert_eq!(backend.buffer_size(pending), None);
    }

    #[test]
    fn drop_with_open_picture() {
        let f = fixture();
        let mut ctx = context(&f, 240);

        ctx.begin_picture(&f.surface).unwrap();
        drop(ctx);
        assert_eq!(f.display.backend().call_count("vaDestroyContext"), 1);
    }
}
