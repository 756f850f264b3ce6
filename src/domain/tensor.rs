//! Preprocessed image tensor handed to the classifier.

/// Channels per pixel (R, G, B).
pub const CHANNELS: usize = 3;

/// A single image in NHWC layout with batch size 1.
///
/// Values are RGB in `[0, 1]`, row-major, channels interleaved:
/// `data[(y * width + x) * 3 + c]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// Model input shape `[1, height, width, 3]`.
    #[must_use]
    pub fn shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, CHANNELS]
    }

    /// RGB triple at `(x, y)`, if in bounds.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }
}
