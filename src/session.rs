// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! "Initialize once, render many" decode sessions.
//!
//! A [`DecodeSession`] negotiates a decode pipeline for a profile and render target format, then
//! creates and owns the [`Config`], [`Surface`] and [`Context`] it needs. Each call to
//! [`DecodeSession::render`] decodes one picture into the session's surface and waits for the
//! hardware to complete it, after which the surface can be read back through
//! [`Surface::derive_image`].

use std::rc::Rc;

use crate::backend::Backend;
use crate::backend::BufferId;
use crate::capabilities::ConfigAttrib;
use crate::capabilities::ConfigAttribType;
use crate::capabilities::Entrypoint;
use crate::capabilities::Profile;
use crate::capabilities::RtFormat;
use crate::config::Config;
use crate::context::Context;
use crate::context::ContextFlags;
use crate::display::Display;
use crate::error::Result;
use crate::error::VaError;
use crate::surface::Surface;

/// A decode pipeline rendering into a single surface.
///
/// The native objects are released by [`DecodeSession::dispose`] or when the session is dropped,
/// context first, then surface, then config.
pub struct DecodeSession<B: Backend> {
    display: Rc<Display<B>>,
    // Field order matters: the context must be dropped before the surface it renders into.
    context: Option<Context<B>>,
    surface: Option<Surface<B>>,
    config: Option<Config<B>>,
    initialized: bool,
    disposed: bool,
}

impl<B: Backend> DecodeSession<B> {
    pub fn new(display: Rc<Display<B>>) -> Self {
        Self {
            display,
            context: None,
            surface: None,
            config: None,
            initialized: false,
            disposed: false,
        }
    }

    pub fn display(&self) -> &Rc<Display<B>> {
        &self.display
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.disposed {
            Err(VaError::usage("decode session has been disposed"))
        } else {
            Ok(())
        }
    }

    /// Prepares the session to decode pictures of `profile` into a `width`x`height` surface of
    /// `format`.
    ///
    /// Returns [`VaError::NotSupported`] without creating anything if the display cannot decode
    /// `profile` into `format`. If creating one of the native objects fails, the objects created
    /// before it are kept until the session is disposed.
    pub fn initialize(
        &mut self,
        profile: Profile,
        format: RtFormat,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.ensure_not_disposed()?;
        if self.initialized || self.config.is_some() {
            return Err(VaError::usage("decode session is already initialized"));
        }

        self.display
            .check_decode_support(profile, Entrypoint::Vld, format)?;

        let config = self.display.create_config(
            profile,
            Entrypoint::Vld,
            &[ConfigAttrib::new(ConfigAttribType::RtFormat, format.0)],
        )?;
        let config = self.config.insert(config);

        let surface = self.display.create_surface(format, width, height)?;
        let surface = self.surface.insert(surface);

        // The context rounds the coded height up to a macroblock multiple.
        let context =
            self.display
                .create_context(config, width, height, ContextFlags::PROGRESSIVE, surface)?;
        self.context = Some(context);
        self.initialized = true;

        Ok(())
    }

    /// Returns the surface pictures are decoded into.
    pub fn surface(&self) -> Result<&Surface<B>> {
        self.ensure_not_disposed()?;
        self.surface
            .as_ref()
            .filter(|_| self.initialized)
            .ok_or_else(|| VaError::usage("decode session is not initialized"))
    }

    /// Returns the context of the session, e.g. to create the buffers of the next picture.
    pub fn context_mut(&mut self) -> Result<&mut Context<B>> {
        self.ensure_not_disposed()?;
        if !self.initialized {
            return Err(VaError::usage("decode session is not initialized"));
        }
        self.context
            .as_mut()
            .ok_or_else(|| VaError::usage("decode session is not initialized"))
    }

    /// Decodes one picture made of `buffers` into the session's surface.
    ///
    /// The buffers are submitted in the given order and must have been created on the session's
    /// context. This call blocks until the hardware has finished decoding the picture. The
    /// buffers are destroyed once the picture is complete.
    pub fn render(&mut self, buffers: &[BufferId]) -> Result<()> {
        self.ensure_not_disposed()?;
        let (Some(context), Some(surface), true) =
            (self.context.as_mut(), self.surface.as_ref(), self.initialized)
        else {
            return Err(VaError::usage("render called before initialize"));
        };

        context.begin_picture(surface)?;
        let rendered = context.render_picture(buffers);
        // The picture must be closed even if the submission failed.
        let ended = context.end_picture();
        rendered.and(ended)?;

        surface.sync()?;
        context.release_submitted_buffers()
    }

    /// Releases the context, the surface and the config of the session, in that order.
    ///
    /// Each object is released at most once, including after a partially failed
    /// [`DecodeSession::initialize`]. All of them are released even if one fails, and the first
    /// error is returned. Calling this method again does nothing.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.initialized = false;

        let mut res = Ok(());
        if let Some(mut context) = self.context.take() {
            res = res.and(context.destroy());
        }
        if let Some(mut surface) = self.surface.take() {
            let r = surface.destroy();
            if res.is_ok() {
                res = r;
            }
        }
        if let Some(mut config) = self.config.take() {
            let r = config.destroy();
            if res.is_ok() {
                res = r;
            }
        }

        res
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl<B: Backend> Drop for DecodeSession<B> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            self.display.report(&e);
        }
    }
}
