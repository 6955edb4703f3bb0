//! 3-D face model points matched against detected landmarks.

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::{Landmarks, Point2, NUM_LANDMARKS};

/// Landmark indices used by the built-in six-point model:
/// nose tip, chin, outer eye corners, mouth corners.
const GENERIC_INDICES: [usize; 6] = [30, 8, 36, 45, 48, 54];

/// Generic head model matching [`GENERIC_INDICES`], in camera-aligned axes
/// (x right, y down, z away from the viewer) so a frontal face solves to the
/// identity rotation.
const GENERIC_POINTS: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],
    [0.0, 330.0, 65.0],
    [-225.0, -170.0, 135.0],
    [225.0, -170.0, 135.0],
    [-150.0, 150.0, 125.0],
    [150.0, 150.0, 125.0],
];

/// Mean head shape for all 68 landmarks, same axes and units as
/// [`GENERIC_POINTS`] (which it contains at the generic indices).
const DENSE_POINTS: [[f64; 3]; NUM_LANDMARKS] = [
    // jaw line
    [-330.0, -100.0, 330.0],
    [-325.0, -20.0, 320.0],
    [-315.0, 60.0, 305.0],
    [-300.0, 135.0, 285.0],
    [-270.0, 205.0, 255.0],
    [-225.0, 260.0, 215.0],
    [-165.0, 300.0, 165.0],
    [-90.0, 325.0, 105.0],
    [0.0, 330.0, 65.0],
    [90.0, 325.0, 105.0],
    [165.0, 300.0, 165.0],
    [225.0, 260.0, 215.0],
    [270.0, 205.0, 255.0],
    [300.0, 135.0, 285.0],
    [315.0, 60.0, 305.0],
    [325.0, -20.0, 320.0],
    [330.0, -100.0, 330.0],
    // eyebrows
    [-280.0, -230.0, 170.0],
    [-230.0, -260.0, 130.0],
    [-170.0, -270.0, 100.0],
    [-110.0, -262.0, 80.0],
    [-55.0, -245.0, 70.0],
    [55.0, -245.0, 70.0],
    [110.0, -262.0, 80.0],
    [170.0, -270.0, 100.0],
    [230.0, -260.0, 130.0],
    [280.0, -230.0, 170.0],
    // nose bridge and tip
    [0.0, -190.0, 85.0],
    [0.0, -125.0, 60.0],
    [0.0, -60.0, 30.0],
    [0.0, 0.0, 0.0],
    // nostrils
    [-60.0, 55.0, 75.0],
    [-30.0, 65.0, 60.0],
    [0.0, 70.0, 50.0],
    [30.0, 65.0, 60.0],
    [60.0, 55.0, 75.0],
    // right eye, outer corner first
    [-225.0, -170.0, 135.0],
    [-185.0, -195.0, 120.0],
    [-130.0, -195.0, 118.0],
    [-85.0, -165.0, 125.0],
    [-130.0, -150.0, 122.0],
    [-185.0, -150.0, 125.0],
    // left eye, inner corner first
    [85.0, -165.0, 125.0],
    [130.0, -195.0, 118.0],
    [185.0, -195.0, 120.0],
    [225.0, -170.0, 135.0],
    [185.0, -150.0, 125.0],
    [130.0, -150.0, 122.0],
    // outer lip
    [-150.0, 150.0, 125.0],
    [-95.0, 125.0, 95.0],
    [-40.0, 112.0, 78.0],
    [0.0, 118.0, 75.0],
    [40.0, 112.0, 78.0],
    [95.0, 125.0, 95.0],
    [150.0, 150.0, 125.0],
    [95.0, 185.0, 100.0],
    [40.0, 200.0, 85.0],
    [0.0, 203.0, 82.0],
    [-40.0, 200.0, 85.0],
    [-95.0, 185.0, 100.0],
    // inner lip
    [-125.0, 150.0, 115.0],
    [-40.0, 140.0, 85.0],
    [0.0, 142.0, 83.0],
    [40.0, 140.0, 85.0],
    [125.0, 150.0, 115.0],
    [40.0, 160.0, 85.0],
    [0.0, 162.0, 83.0],
    [-40.0, 160.0, 85.0],
];

/// Model points paired with the landmark index each one corresponds to.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceModel {
    points: Vec<[f64; 3]>,
    indices: Vec<usize>,
}

impl FaceModel {
    /// The built-in six-point generic head model.
    #[must_use]
    pub fn generic() -> Self {
        Self {
            points: GENERIC_POINTS.to_vec(),
            indices: GENERIC_INDICES.to_vec(),
        }
    }

    /// The built-in model covering all 68 landmarks; the default.
    ///
    /// More correspondences than the six-point model keep the solve stable
    /// under landmark jitter.
    #[must_use]
    pub fn dense() -> Self {
        Self {
            points: DENSE_POINTS.to_vec(),
            indices: (0..NUM_LANDMARKS).collect(),
        }
    }

    /// Builds a model covering all 68 landmarks.
    ///
    /// # Errors
    ///
    /// Returns an error unless exactly 68 points are given.
    pub fn full(points: Vec<[f64; 3]>) -> Result<Self> {
        if points.len() != NUM_LANDMARKS {
            anyhow::bail!(
                "face model needs {NUM_LANDMARKS} points, got {}",
                points.len()
            );
        }
        Ok(Self {
            points,
            indices: (0..NUM_LANDMARKS).collect(),
        })
    }

    /// Parses the 204-value text format: all x values, then all y values,
    /// then all z values, whitespace separated. The z axis is flipped on load.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not hold 204 numbers.
    pub fn parse(text: &str) -> Result<Self> {
        let values = text
            .split_whitespace()
            .map(|v| {
                v.parse::<f64>()
                    .with_context(|| format!("invalid face model value '{v}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        if values.len() != NUM_LANDMARKS * 3 {
            anyhow::bail!(
                "face model file must hold {} values, got {}",
                NUM_LANDMARKS * 3,
                values.len()
            );
        }

        let points = (0..NUM_LANDMARKS)
            .map(|i| {
                [
                    values[i],
                    values[NUM_LANDMARKS + i],
                    -values[2 * NUM_LANDMARKS + i],
                ]
            })
            .collect();

        Self::full(points)
    }

    /// Loads a model file in the format accepted by [`FaceModel::parse`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read face model: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid face model: {}", path.display()))
    }

    /// Model points.
    #[must_use]
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Number of correspondences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the model has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Picks the landmarks that correspond to the model points, in order.
    #[must_use]
    pub fn image_points(&self, landmarks: &Landmarks) -> Vec<Point2> {
        self.indices
            .iter()
            .filter_map(|&i| landmarks.get(i))
            .collect()
    }
}

impl Default for FaceModel {
    fn default() -> Self {
        Self::dense()
    }
}
