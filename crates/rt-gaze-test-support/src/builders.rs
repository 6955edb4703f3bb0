//! Synthetic frames, faces, datasets and weight files for testing.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use image::{DynamicImage, Rgb, RgbImage};
use rt_gaze_adapters::DatasetWriter;
use rt_gaze_core::domain::{
    BoundingBox, GazeAngles, GazeSample, HeadPose, ImageInfo, Landmarks, Point2, NUM_LANDMARKS,
};
use rt_gaze_core::inference::{Backbone, BlazeFace, GazeNet, Landmarks68, DETECTOR_INPUT_SIZE};
use rt_gaze_core::pose::{CameraIntrinsics, FaceModel};

/// Distance of the synthetic face from the camera, in model units.
const FACE_DEPTH: f64 = 1500.0;

/// Builder for creating synthetic test frames.
pub struct SyntheticImageBuilder;

impl SyntheticImageBuilder {
    /// Creates a frame filled with one color.
    #[must_use]
    pub fn uniform(width: u32, height: u32, color: [u8; 3]) -> ImageInfo {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        ImageInfo::new("synthetic://uniform", DynamicImage::ImageRgb8(img))
    }

    /// Creates a frame with a horizontal red and a vertical green ramp.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn gradient(width: u32, height: u32) -> ImageInfo {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let r = ((u32::from(u8::MAX) * x) / width.max(1)) as u8;
            let g = ((u32::from(u8::MAX) * y) / height.max(1)) as u8;
            Rgb([r, g, 128])
        });
        ImageInfo::new("synthetic://gradient", DynamicImage::ImageRgb8(img))
    }

    /// Wraps an image under a chosen path.
    #[must_use]
    pub fn named(path: &str, image: RgbImage) -> ImageInfo {
        ImageInfo::new(path, DynamicImage::ImageRgb8(image))
    }
}

/// Face box and landmarks of a face looking straight at the camera from the
/// middle of a `width x height` frame.
///
/// All 68 landmarks project from the dense face model, so the head pose
/// solve recovers a near-zero rotation with either built-in model.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn frontal_face(width: u32, height: u32) -> (BoundingBox, Landmarks) {
    let camera = CameraIntrinsics::from_image(width, height);
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);

    let points = FaceModel::dense()
        .points()
        .iter()
        .map(|p| {
            let (u, v) = camera.project([p[0], p[1], p[2] + FACE_DEPTH]);
            Point2::new(u as f32, v as f32)
        })
        .collect();

    let bbox = BoundingBox::new(cx - 120.0, cy - 120.0, 240.0, 260.0);
    match Landmarks::new(points) {
        Some(landmarks) => (bbox, landmarks),
        None => unreachable!("the dense model has {NUM_LANDMARKS} points"),
    }
}

/// A labelled record with `size x size` eye patches.
///
/// Pixel values and labels depend on `subject` and `index` so records are
/// distinguishable.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn synthetic_sample(subject: usize, index: usize, size: u32) -> GazeSample {
    let shade = ((subject * 13 + index * 7) % 200) as u8;
    let left = RgbImage::from_fn(size, size, |x, _| Rgb([shade, (x % 256) as u8, 64]));
    let right = RgbImage::from_fn(size, size, |_, y| Rgb([64, (y % 256) as u8, shade]));
    let t = index as f32 * 0.01;
    GazeSample {
        subject,
        left,
        right,
        head_pose: HeadPose::new(0.05 - t, 0.02 + t),
        gaze: GazeAngles::new(-0.1 + t, 0.15 - t),
    }
}

/// Writes a dataset file with `per_subject` records for each subject.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_synthetic_dataset(
    path: impl AsRef<Path>,
    subjects: &[usize],
    per_subject: usize,
    size: u32,
) -> anyhow::Result<()> {
    let mut writer = DatasetWriter::new();
    for &subject in subjects {
        for index in 0..per_subject {
            writer.push(&synthetic_sample(subject, index, size))?;
        }
    }
    writer.write(path)
}

/// Builds a network with `build` and saves it with every weight set to zero.
///
/// Zeroed detector weights make every score `sigmoid(0) = 0.5`.
///
/// # Errors
///
/// Returns an error if the network cannot be built or the file written.
pub fn write_zero_weights<T>(
    path: impl AsRef<Path>,
    build: impl FnOnce(VarBuilder<'_>) -> anyhow::Result<T>,
) -> anyhow::Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    build(vb)?;
    for var in varmap.all_vars() {
        var.set(&Tensor::zeros(var.shape(), var.dtype(), var.device())?)?;
    }
    varmap.save(path)?;
    Ok(())
}

/// Builds a network with `build`, zeroes every weight and then overwrites the
/// named tensors.
///
/// # Errors
///
/// Returns an error if the network cannot be built, a name is unknown, or the
/// file cannot be written.
pub fn write_biased_weights<T>(
    path: impl AsRef<Path>,
    build: impl FnOnce(VarBuilder<'_>) -> anyhow::Result<T>,
    biases: &[(&str, Vec<f32>)],
) -> anyhow::Result<()> {
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    build(vb)?;
    for var in varmap.all_vars() {
        var.set(&Tensor::zeros(var.shape(), var.dtype(), var.device())?)?;
    }
    for (name, values) in biases {
        varmap.set_one(name, Tensor::new(values.as_slice(), &Device::Cpu)?)?;
    }
    varmap.save(path)?;
    Ok(())
}

/// Writes detector and landmark weights that find [`frontal_face`] in every
/// `width x height` frame.
///
/// The detector scores every anchor high with a box covering the whole
/// frame; the landmark regressor emits the frontal landmarks regardless of
/// the pixels.
///
/// # Errors
///
/// Returns an error if the weight files cannot be written.
#[allow(clippy::cast_precision_loss)]
pub fn write_frontal_detectors(
    models_dir: impl AsRef<Path>,
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    let models_dir = models_dir.as_ref();
    // Box width and height of two input sides clamp to the full frame.
    let full_frame = 2.0 * DETECTOR_INPUT_SIZE as f32;
    let regressor = |channels: usize| -> Vec<f32> {
        (0..channels)
            .map(|c| if matches!(c % 16, 2 | 3) { full_frame } else { 0.0 })
            .collect()
    };
    write_biased_weights(
        models_dir.join("blazeface.safetensors"),
        BlazeFace::new,
        &[
            ("classifier_16.bias", vec![6.0; 2]),
            ("regressor_16.bias", regressor(32)),
            ("classifier_8.bias", vec![6.0; 6]),
            ("regressor_8.bias", regressor(96)),
        ],
    )?;

    // The enlarged crop around a full-frame box is the frame itself.
    let (_, landmarks) = frontal_face(width, height);
    let relative: Vec<f32> = landmarks
        .points()
        .iter()
        .flat_map(|p| [p.x / width as f32, p.y / height as f32])
        .collect();
    write_biased_weights(
        models_dir.join("landmarks68.safetensors"),
        Landmarks68::new,
        &[("fc2.bias", relative)],
    )
}

/// Saves a freshly initialized gaze network checkpoint.
///
/// # Errors
///
/// Returns an error if the network cannot be built or the file written.
pub fn write_gaze_checkpoint(
    path: impl AsRef<Path>,
    backbone: Backbone,
    num_out: usize,
) -> anyhow::Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    GazeNet::new(backbone, num_out, vb)?;
    varmap.save(path)?;
    Ok(())
}
