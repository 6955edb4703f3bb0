//! Eye-patch geometry, tensor conversion and gaze overlay.

mod eye_patch;
mod normalize;
mod overlay;

pub use eye_patch::{extract_eye_patches, eye_box};
pub use normalize::{normalize_patch, patch_to_chw, IMAGENET_MEAN, IMAGENET_STD};
pub use overlay::{draw_gaze, side_by_side};
