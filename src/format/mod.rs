//! Video format handling.
//!
//! - Capability descriptors: parsing, intersection, typed validation
//! - Pixel conversion: red/blue swap, I420 to RGB decode

pub mod caps;
mod convert;

pub use caps::{negotiate, CapsSet, CapsStructure, CapsValue, PixelFormat, ScanMode, VideoCaps};
pub use convert::{
    i420_to_rgb, packed_stride, rgb_to_i420, swap_red_blue, yuv_to_rgb, I420Layout,
};
