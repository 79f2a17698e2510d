// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::rc::Rc;

use crate::backend::Backend;
use crate::backend::ConfigId;
use crate::capabilities::ConfigAttrib;
use crate::capabilities::Entrypoint;
use crate::capabilities::Profile;
use crate::display::Display;
use crate::error::Result;
use crate::error::VaError;

/// A negotiated (profile, entrypoint, attributes) tuple, required to create a
/// [`Context`](crate::context::Context).
///
/// The config is destroyed by [`Config::destroy`] or when dropped. It must be destroyed before the
/// display is terminated, but it does not need to outlive the contexts created from it.
pub struct Config<B: Backend> {
    display: Rc<Display<B>>,
    id: Option<ConfigId>,
    profile: Profile,
    entrypoint: Entrypoint,
}

impl<B: Backend> Config<B> {
    pub fn id(&self) -> Result<ConfigId> {
        self.id.ok_or_else(|| VaError::usage("config has been destroyed"))
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn entrypoint(&self) -> Entrypoint {
        self.entrypoint
    }

    pub fn display(&self) -> &Rc<Display<B>> {
        &self.display
    }

    /// Destroys the config. Does nothing if it has already been destroyed.
    pub fn destroy(&mut self) -> Result<()> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };

        self.display.object_destroyed();
        self.display.check(
            "vaDestroyConfig",
            VaError::Driver,
            self.display.backend().destroy_config(id),
        )
    }
}

impl<B: Backend> Drop for Config<B> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            self.display.report(&e);
        }
    }
}

impl<B: Backend> Display<B> {
    /// Creates a config for `profile` and `entrypoint`.
    ///
    /// The pair should have been negotiated first: a combination the driver does not support
    /// fails with [`VaError::Configuration`].
    pub fn create_config(
        self: &Rc<Self>,
        profile: Profile,
        entrypoint: Entrypoint,
        attribs: &[ConfigAttrib],
    ) -> Result<Config<B>> {
        self.ensure_live()?;

        let id = self.check(
            "vaCreateConfig",
            VaError::Configuration,
            self.backend()
                .create_config(profile as i32, entrypoint as u32, attribs),
        )?;
        self.object_created();

        Ok(Config {
            display: Rc::clone(self),
            id: Some(id),
            profile,
            entrypoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Status;
    use crate::capabilities::ConfigAttribType;
    use crate::capabilities::RtFormat;
    use crate::display::tests::open_dummy;

    #[test]
    fn create_and_destroy() {
        let display = open_dummy();
        let mut config = display
            .create_config(
                Profile::H264High,
                Entrypoint::Vld,
                &[ConfigAttrib::new(ConfigAttribType::RtFormat, RtFormat::YUV420.0)],
            )
            .unwrap();

        assert_eq!(config.profile(), Profile::H264High);
        assert_eq!(config.entrypoint(), Entrypoint::Vld);
        assert!(config.id().is_ok());

        config.destroy().unwrap();
        config.destroy().unwrap();
        assert!(matches!(config.id(), Err(VaError::Usage(_))));
        drop(config);
        assert_eq!(display.backend().call_count("vaDestroyConfig"), 1);
    }

    #[test]
    fn rejected_combination() {
        let display = open_dummy();

        let err = display
            .create_config(Profile::JpegBaseline, Entrypoint::EncSlice, &[])
            .err()
            .unwrap();
        assert!(matches!(err, VaError::Configuration(_)));
        assert_eq!(err.status(), Some(Status::ERROR_UNSUPPORTED_ENTRYPOINT));

        let err = display
            .create_config(
                Profile::H264High,
                Entrypoint::Vld,
                &[ConfigAttrib::new(ConfigAttribType::RtFormat, RtFormat::RGB32.0)],
            )
            .err()
            .unwrap();
        assert_eq!(err.status(), Some(Status::ERROR_UNSUPPORTED_RT_FORMAT));

        // Nothing was created, so the display can go away.
        display.terminate().unwrap();
    }
}
