//! Mock implementations of core port traits.

use std::sync::{Arc, Mutex, PoisonError};

use candle_core::Tensor;
use image::DynamicImage;
use rt_gaze_core::domain::{GazeAngles, GazeRegressor, GazeResult, GazeSample, ImageInfo, Landmarks};
use rt_gaze_core::ports::{
    DatasetProvider, DetectedFace, FaceLandmarker, GazeDataset, ImageSource, ProgressEvent,
    ProgressSink, ResultOutput, TrainEvent, TrainSink,
};

/// Mock implementation of `ImageSource` for testing.
///
/// Yields pre-built images and tracks iteration for assertions.
pub struct MockImageSource {
    images: Vec<ImageInfo>,
    iteration_count: Arc<Mutex<usize>>,
}

impl MockImageSource {
    /// Creates a new mock source with the given images.
    #[must_use]
    pub fn new(images: Vec<ImageInfo>) -> Self {
        Self {
            images,
            iteration_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Creates an empty mock source.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(vec![])
    }

    /// Returns the number of times the source has been iterated.
    #[must_use]
    pub fn iteration_count(&self) -> usize {
        *self
            .iteration_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ImageSource for MockImageSource {
    fn images(&self) -> Box<dyn Iterator<Item = anyhow::Result<ImageInfo>> + Send + '_> {
        *self
            .iteration_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        Box::new(self.images.iter().cloned().map(Ok))
    }

    fn count_hint(&self) -> Option<usize> {
        Some(self.images.len())
    }
}

/// Mock implementation of `ResultOutput` for testing.
///
/// Captures results for later assertions.
#[derive(Default)]
pub struct MockResultOutput {
    results: Mutex<Vec<GazeResult>>,
    flush_count: Mutex<usize>,
}

impl MockResultOutput {
    /// Creates a new mock output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all captured results.
    #[must_use]
    pub fn results(&self) -> Vec<GazeResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of times `flush()` was called.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        *self
            .flush_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResultOutput for MockResultOutput {
    fn write(&self, result: &GazeResult) -> anyhow::Result<()> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        *self
            .flush_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// Mock implementation of `ProgressSink` for testing.
///
/// Captures events for later assertions.
#[derive(Default)]
pub struct MockProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MockProgressSink {
    /// Creates a new mock progress sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all captured events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of `Completed` events.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Completed { .. }))
            .count()
    }

    /// Returns the number of `Skipped` events.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Skipped { .. }))
            .count()
    }

    /// Returns the final counts from the `Finished` event, if any.
    #[must_use]
    pub fn finished_counts(&self) -> Option<(usize, usize)> {
        self.events().iter().find_map(|e| match e {
            ProgressEvent::Finished { processed, skipped } => Some((*processed, *skipped)),
            _ => None,
        })
    }
}

impl ProgressSink for MockProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Mock implementation of `TrainSink` for testing.
#[derive(Default)]
pub struct MockTrainSink {
    events: Mutex<Vec<TrainEvent>>,
}

impl MockTrainSink {
    /// Creates a new mock training sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all captured events.
    #[must_use]
    pub fn events(&self) -> Vec<TrainEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the `(fold, epoch)` of every finished epoch.
    #[must_use]
    pub fn finished_epochs(&self) -> Vec<(usize, usize)> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                TrainEvent::EpochFinished { fold, epoch, .. } => Some((*fold, *epoch)),
                _ => None,
            })
            .collect()
    }

    /// Returns the folds that ran a test pass.
    #[must_use]
    pub fn tested_folds(&self) -> Vec<usize> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                TrainEvent::TestFinished { fold, .. } => Some(*fold),
                _ => None,
            })
            .collect()
    }
}

impl TrainSink for MockTrainSink {
    fn on_event(&self, event: TrainEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Mock implementation of `FaceLandmarker` returning fixed detections.
#[derive(Default)]
pub struct MockLandmarker {
    faces: Vec<DetectedFace>,
    landmarks: Option<Landmarks>,
    calls: Mutex<usize>,
}

impl MockLandmarker {
    /// Reports `face` with `landmarks` on every frame.
    #[must_use]
    pub fn with_face(face: DetectedFace, landmarks: Landmarks) -> Self {
        Self {
            faces: vec![face],
            landmarks: Some(landmarks),
            calls: Mutex::new(0),
        }
    }

    /// Finds no face on any frame.
    #[must_use]
    pub fn no_faces() -> Self {
        Self::default()
    }

    /// Returns the number of frames passed to `detect_faces`.
    #[must_use]
    pub fn detect_calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FaceLandmarker for MockLandmarker {
    fn detect_faces(&self, _image: &DynamicImage) -> anyhow::Result<Vec<DetectedFace>> {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(self.faces.clone())
    }

    fn landmarks(
        &self,
        _image: &DynamicImage,
        _face: &DetectedFace,
    ) -> anyhow::Result<Option<Landmarks>> {
        Ok(self.landmarks.clone())
    }
}

/// Mock implementation of `GazeRegressor` returning a fixed gaze.
pub struct MockRegressor {
    name: String,
    gaze: GazeAngles,
    head_poses: Mutex<Vec<[f32; 2]>>,
}

impl MockRegressor {
    /// Creates a regressor that always predicts `gaze`.
    #[must_use]
    pub fn new(name: impl Into<String>, gaze: GazeAngles) -> Self {
        Self {
            name: name.into(),
            gaze,
            head_poses: Mutex::new(Vec::new()),
        }
    }

    /// Head poses received so far, in `[phi, theta]` order.
    #[must_use]
    pub fn head_poses(&self) -> Vec<[f32; 2]> {
        self.head_poses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl GazeRegressor for MockRegressor {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(
        &self,
        _left: &Tensor,
        _right: &Tensor,
        head_pose: &Tensor,
    ) -> anyhow::Result<GazeAngles> {
        let row = head_pose.flatten_all()?.to_vec1::<f32>()?;
        if let [phi, theta, ..] = row[..] {
            self.head_poses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push([phi, theta]);
        }
        Ok(self.gaze)
    }
}

/// In-memory `GazeDataset` view.
pub struct InMemoryDataset {
    subjects: Vec<usize>,
    records: Vec<GazeSample>,
}

impl GazeDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn subjects(&self) -> &[usize] {
        &self.subjects
    }

    fn get(&self, index: usize) -> anyhow::Result<GazeSample> {
        self.records
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("record {index} out of range"))
    }
}

/// In-memory `DatasetProvider` over a fixed record list.
pub struct InMemoryProvider {
    records: Arc<Vec<GazeSample>>,
    opened: Mutex<Vec<Vec<usize>>>,
}

impl InMemoryProvider {
    /// Wraps `records`.
    #[must_use]
    pub fn new(records: Vec<GazeSample>) -> Self {
        Self {
            records: Arc::new(records),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Subject lists passed to `open`, in call order.
    #[must_use]
    pub fn opened(&self) -> Vec<Vec<usize>> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DatasetProvider for InMemoryProvider {
    fn open(&self, subjects: &[usize]) -> anyhow::Result<Box<dyn GazeDataset>> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subjects.to_vec());
        let records: Vec<GazeSample> = subjects
            .iter()
            .flat_map(|s| self.records.iter().filter(move |r| r.subject == *s))
            .cloned()
            .collect();
        Ok(Box::new(InMemoryDataset {
            subjects: subjects.to_vec(),
            records,
        }))
    }
}
