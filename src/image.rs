// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! CPU access to the content of a decoded surface.
//!
//! An [`Image`] is derived from a surface and shares its storage. Its memory can be mapped into
//! the client's address space through [`Image::map`] for as long as the returned
//! [`ImageMapping`] lives.
//!
//! While an image derived from a surface is alive, backends typically refuse other direct
//! operations on that surface (including deriving another image) with a "surface busy" status.
//! The image must be destroyed before the surface can be used that way again.

use std::ops::Deref;
use std::ptr::NonNull;

use crate::backend::Backend;
use crate::backend::BufferId;
use crate::backend::ImageId;
use crate::error::Result;
use crate::error::VaError;
use crate::surface::Surface;
use crate::Fourcc;
use crate::PlaneLayout;
use crate::Resolution;

/// Description of an image, as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub id: ImageId,
    /// Buffer holding the pixel data of the image.
    pub buffer: BufferId,
    pub format: Fourcc,
    pub width: u32,
    pub height: u32,
    /// Size of the mapped data, in bytes.
    pub data_size: usize,
    pub planes: Vec<PlaneLayout>,
}

impl ImageDescriptor {
    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }
}

/// An image derived from a [`Surface`].
///
/// The image is destroyed by [`Image::destroy`] or when dropped. Destroying it does not affect the
/// surface it was derived from.
pub struct Image<'a, B: Backend> {
    surface: &'a Surface<B>,
    descriptor: ImageDescriptor,
    destroyed: bool,
}

impl<'a, B: Backend> Image<'a, B> {
    /// Derives an image sharing the storage of `surface`.
    ///
    /// The surface should have been synced beforehand. Fails with [`VaError::OperationFailed`] if
    /// the backend cannot expose the storage of the surface directly, in which case the content
    /// must be obtained through a copy instead.
    pub fn derive_from(surface: &'a Surface<B>) -> Result<Self> {
        let id = surface.id()?;
        let display = surface.display();

        let descriptor = display.check(
            "vaDeriveImage",
            VaError::OperationFailed,
            display.backend().derive_image(id),
        )?;

        Ok(Self {
            surface,
            descriptor,
            destroyed: false,
        })
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed {
            Err(VaError::usage("image has been destroyed"))
        } else {
            Ok(())
        }
    }

    /// Maps the image data into the client's address space.
    ///
    /// The data is unmapped when the returned mapping is dropped.
    pub fn map(&mut self) -> Result<ImageMapping<'_, 'a, B>> {
        self.ensure_live()?;

        let display = self.surface.display();
        let data = display.check(
            "vaMapBuffer",
            VaError::Driver,
            display.backend().map_buffer(self.descriptor.buffer),
        )?;

        Ok(ImageMapping {
            image: self,
            data,
            mapped: true,
        })
    }

    /// Destroys the image. Does nothing if it has already been destroyed.
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }

        self.destroyed = true;
        let display = self.surface.display();
        display.check(
            "vaDestroyImage",
            VaError::Driver,
            display.backend().destroy_image(self.descriptor.id),
        )
    }
}

impl<'a, B: Backend> Drop for Image<'a, B> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            self.surface.display().report(&e);
        }
    }
}

/// The data of an [`Image`], mapped into the client's address space.
///
/// Dereferences to the `data_size` bytes of the image. The planes are found at the offsets and
/// strides given by the image descriptor.
pub struct ImageMapping<'m, 'a, B: Backend> {
    image: &'m Image<'a, B>,
    data: NonNull<u8>,
    mapped: bool,
}

impl<'m, 'a, B: Backend> ImageMapping<'m, 'a, B> {
    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.image.descriptor
    }

    /// Returns the bytes of plane `index`, starting at its offset.
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let plane = self.image.descriptor.planes.get(index)?;
        self.get(plane.offset..)
    }

    /// Unmaps the data, reporting any error.
    pub fn unmap(mut self) -> Result<()> {
        self.unmap_inner()
    }

    fn unmap_inner(&mut self) -> Result<()> {
        if !self.mapped {
            return Ok(());
        }

        self.mapped = false;
        let display = self.image.surface.display();
        display.check(
            "vaUnmapBuffer",
            VaError::Driver,
            display.backend().unmap_buffer(self.image.descriptor.buffer),
        )
    }
}

impl<'m, 'a, B: Backend> Deref for ImageMapping<'m, 'a, B> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the backend guarantees that the mapping covers `data_size` bytes and stays valid
        // until the buffer is unmapped, which cannot happen while `self` is borrowed.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.image.descriptor.data_size) }
    }
}

impl<'m, 'a, B: Backend> Drop for ImageMapping<'m, 'a, B> {
    fn drop(&mut self) {
        if let Err(e) = self.unmap_inner() {
            self.image.surface.display().report(&e);
        }
    }
}

impl<B: Backend> Surface<B> {
    /// Derives an [`Image`] giving CPU access to the content of this surface.
    pub fn derive_image(&self) -> Result<Image<'_, B>> {
        Image::derive_from(self)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::Status;
    use crate::capabilities::RtFormat;
    use crate::display::tests::open_dummy;
    use crate::display::Display;

    fn surface(display: &Rc<Display<DummyBackend>>) -> Surface<DummyBackend> {
        display.create_surface(RtFormat::YUV420, 320, 240).unwrap()
    }

    #[test]
    fn derive_map_unmap_destroy() {
        let display = open_dummy();
        let surface = surface(&display);

        let mut image = surface.derive_image().unwrap();
        let descriptor = image.descriptor().clone();
        assert_eq!(descriptor.format, Fourcc::NV12);
        assert_eq!(descriptor.resolution(), Resolution::from((320, 240)));
        assert_eq!(descriptor.planes.len(), 2);

        {
            let mapping = image.map().unwrap();
            assert_eq!(mapping.len(), descriptor.data_size);
            let chroma = mapping.plane(1).unwrap();
            assert_eq!(chroma.len(), descriptor.data_size - descriptor.planes[1].offset);
            assert!(mapping.plane(2).is_none());
            mapping.unmap().unwrap();
        }
        image.destroy().unwrap();
        image.destroy().unwrap();
        drop(image);

        let backend = display.backend();
        assert_eq!(backend.call_count("vaMapBuffer"), 1);
        assert_eq!(backend.call_count("vaUnmapBuffer"), 1);
        assert_eq!(backend.call_count("vaDestroyImage"), 1);

        // The busy state is gone: the surface can be derived again.
        let image = surface.derive_image().unwrap();
        assert_eq!(image.descriptor().resolution(), Resolution::from((320, 240)));
    }

    #[test]
    fn derive_while_image_alive_is_busy() {
        let display = open_dummy();
        let surface = surface(&display);

        let image = surface.derive_image().unwrap();
        let err = surface.derive_image().err().unwrap();
        assert!(matches!(err, VaError::OperationFailed(_)));
        assert_eq!(err.status(), Some(Status::ERROR_SURFACE_BUSY));

        drop(image);
        surface.derive_image().unwrap();
    }

    #[test]
    fn mapping_is_released_on_drop() {
        let display = open_dummy();
        let surface = surface(&display);
        let mut image = surface.derive_image().unwrap();
        let buffer = image.descriptor().buffer;

        {
            let mapping = image.map().unwrap();
            assert_eq!(mapping.descriptor().buffer, buffer);
            assert!(display.backend().is_mapped(buffer));
        }
        assert!(!display.backend().is_mapped(buffer));
        assert_eq!(display.backend().call_count("vaUnmapBuffer"), 1);

        // Mapping again after the previous one is gone works.
        let mapping = image.map().unwrap();
        drop(mapping);
        image.destroy().unwrap();
        assert!(matches!(image.map(), Err(VaError::Usage(_))));
    }

    #[test]
    fn no_direct_mapping_for_format() {
        let display = open_dummy();
        let surface = display.create_surface(RtFormat::YUV444, 64, 64).unwrap();

        let err = surface.derive_image().err().unwrap();
        assert!(matches!(err, VaError::OperationFailed(_)));
        assert_eq!(err.status(), Some(Status::ERROR_OPERATION_FAILED));
    }
}
