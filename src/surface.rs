// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::rc::Rc;

use enumn::N;

use crate::backend::Backend;
use crate::backend::Status;
use crate::backend::SurfaceId;
use crate::capabilities::RtFormat;
use crate::display::Display;
use crate::error::DriverStatus;
use crate::error::Result;
use crate::error::VaError;
use crate::Resolution;

/// Rendering status of a surface, numbered like `VASurfaceStatus`.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SurfaceStatus {
    Rendering = 1,
    Displaying = 2,
    Ready = 4,
    Skipped = 8,
}

/// A hardware picture buffer, used as decode target.
///
/// A surface must outlive every [`Context`](crate::context::Context) that references it as a
/// render target: destroying a surface still in use by a context is undefined behavior for the
/// backend. This is not checked at runtime, so owners must destroy their contexts first.
pub struct Surface<B: Backend> {
    display: Rc<Display<B>>,
    id: Option<SurfaceId>,
    rt_format: RtFormat,
    resolution: Resolution,
}

impl<B: Backend> Surface<B> {
    pub fn id(&self) -> Result<SurfaceId> {
        self.id.ok_or_else(|| VaError::usage("surface has been destroyed"))
    }

    pub fn rt_format(&self) -> RtFormat {
        self.rt_format
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn display(&self) -> &Rc<Display<B>> {
        &self.display
    }

    /// Blocks until all pending operations on the surface have completed.
    ///
    /// This is the only call that waits on the hardware, for a duration that depends on it. It
    /// cannot be cancelled: a caller enforcing a timeout must do so externally and must not reuse
    /// a session abandoned in the middle of this call.
    pub fn sync(&self) -> Result<()> {
        let id = self.id()?;

        self.display.check(
            "vaSyncSurface",
            VaError::Driver,
            self.display.backend().sync_surface(id),
        )
    }

    /// Returns the current rendering status of the surface without blocking.
    pub fn query_status(&self) -> Result<SurfaceStatus> {
        let id = self.id()?;

        let raw = self.display.check(
            "vaQuerySurfaceStatus",
            VaError::Driver,
            self.display.backend().query_surface_status(id),
        )?;

        // A value outside the documented set is a driver fault, not a caller mistake.
        SurfaceStatus::n(raw).ok_or_else(|| {
            VaError::Driver(DriverStatus {
                call: "vaQuerySurfaceStatus",
                status: Status::ERROR_UNKNOWN,
                message: format!("unknown surface status {:#x}", raw),
            })
        })
    }

    /// Destroys the surface. Does nothing if it has already been destroyed.
    pub fn destroy(&mut self) -> Result<()> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };

        self.display.object_destroyed();
        self.display.check(
            "vaDestroySurfaces",
            VaError::Driver,
            self.display.backend().destroy_surface(id),
        )
    }
}

impl<B: Backend> Drop for Surface<B> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            self.display.report(&e);
        }
    }
}

impl<B: Backend> Display<B> {
    /// Creates a single surface of `rt_format` and size `width`x`height`.
    pub fn create_surface(
        self: &Rc<Self>,
        rt_format: RtFormat,
        width: u32,
        height: u32,
    ) -> Result<Surface<B>> {
        self.ensure_live()?;

        let id = self.check(
            "vaCreateSurfaces",
            VaError::ResourceExhausted,
            self.backend().create_surface(rt_format.0, width, height),
        )?;
        self.object_created();

        Ok(Surface {
            display: Rc::clone(self),
            id: Some(id),
            rt_format,
            resolution: Resolution { width, height },
        })
    }
}
