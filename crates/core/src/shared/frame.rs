use ndarray::ArrayView3;

/// A single captured camera frame: contiguous RGB24 bytes in row-major
/// order.
///
/// Format conversion happens at the capture boundary only; the recognition
/// layer reads pixel data through the `ndarray` view. `index` is assigned
/// by the track that produced the frame and increases monotonically for
/// the lifetime of that track.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    index: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * 3,
            "data length must equal width * height * 3"
        );
        Self {
            data,
            width,
            height,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// `(height, width, 3)` view over the pixel data.
    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape((self.height as usize, self.width as usize, 3), &self.data)
            .expect("Frame data length must match dimensions")
    }
}
