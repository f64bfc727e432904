//! Planar RGB image buffer consumed by the multimodal backend.

use crate::error::ImageError;

/// An image with all red samples, then all green, then all blue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanarRgbImage {
    width: u32,
    height: u32,
    planes: Vec<u8>,
}

impl PlanarRgbImage {
    /// Wrap an existing plane buffer; its length must be `3 * width * height`.
    pub fn from_planes(width: u32, height: u32, planes: Vec<u8>) -> Result<Self, ImageError> {
        let expected = plane_len(width, height) * 3;
        if planes.len() != expected {
            return Err(ImageError::InvalidPlanes {
                expected,
                actual: planes.len(),
            });
        }
        Ok(Self {
            width,
            height,
            planes,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The full `R…G…B…` buffer.
    pub fn planes(&self) -> &[u8] {
        &self.planes
    }

    pub fn red(&self) -> &[u8] {
        self.plane(0)
    }

    pub fn green(&self) -> &[u8] {
        self.plane(1)
    }

    pub fn blue(&self) -> &[u8] {
        self.plane(2)
    }

    pub fn into_planes(self) -> Vec<u8> {
        self.planes
    }

    fn plane(&self, index: usize) -> &[u8] {
        let len = plane_len(self.width, self.height);
        &self.planes[index * len..(index + 1) * len]
    }
}

fn plane_len(width: u32, height: u32) -> usize {
    width as usize * height as usize
}
