//! Core pipeline and training driver exercised through the port mocks.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;

use candle_core::Device;
use rt_gaze_core::domain::{GazeAngles, GazeRegressor, GazeResult};
use rt_gaze_core::inference::{Backbone, GazeEnsemble};
use rt_gaze_core::ports::DetectedFace;
use rt_gaze_core::training::{self, HParams, LossKind, RunConfig};
use rt_gaze_core::{
    DatasetProvider, FrameOutcome, GazePipeline, ImageSource, PipelineConfig, ProgressEvent,
    ProgressSink, ResultOutput, TrainEvent,
};
use rt_gaze_test_support::{
    frontal_face, synthetic_sample, InMemoryProvider, MockImageSource, MockLandmarker,
    MockProgressSink, MockRegressor, MockResultOutput, MockTrainSink, SyntheticImageBuilder,
};

const INPUT: u32 = 32;

fn frontal_landmarker() -> MockLandmarker {
    let (bbox, landmarks) = frontal_face(640, 480);
    MockLandmarker::with_face(DetectedFace { bbox, score: 0.9 }, landmarks)
}

fn pipeline(landmarker: MockLandmarker, regressor: Box<dyn GazeRegressor>) -> GazePipeline {
    let config = PipelineConfig {
        input_size: INPUT,
        ..PipelineConfig::default()
    };
    GazePipeline::new(Box::new(landmarker), regressor, config, Device::Cpu).unwrap()
}

#[test]
fn test_pipeline_averages_ensemble_members() {
    let ensemble = GazeEnsemble::new(vec![
        Box::new(MockRegressor::new("a", GazeAngles::new(0.2, -0.4))),
        Box::new(MockRegressor::new("b", GazeAngles::new(0.4, 0.0))),
    ])
    .unwrap();
    let frame = SyntheticImageBuilder::uniform(640, 480, [120, 100, 90]);

    let outcome = pipeline(frontal_landmarker(), Box::new(ensemble))
        .process(&frame)
        .unwrap();
    let FrameOutcome::Estimated(estimate) = outcome else {
        panic!("expected an estimate, got {outcome:?}");
    };
    assert_eq!(estimate.models, 2);
    assert!((estimate.gaze.theta - 0.3).abs() < 1e-6);
    assert!((estimate.gaze.phi + 0.2).abs() < 1e-6);
}

#[test]
fn test_regressor_receives_frontal_head_pose() {
    let regressor = Arc::new(MockRegressor::new("fixed", GazeAngles::default()));

    struct Shared(Arc<MockRegressor>);
    impl GazeRegressor for Shared {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn predict(
            &self,
            left: &candle_core::Tensor,
            right: &candle_core::Tensor,
            head_pose: &candle_core::Tensor,
        ) -> anyhow::Result<GazeAngles> {
            self.0.predict(left, right, head_pose)
        }
    }

    let frame = SyntheticImageBuilder::gradient(640, 480);
    let pipeline = pipeline(frontal_landmarker(), Box::new(Shared(Arc::clone(&regressor))));
    pipeline.process(&frame).unwrap();
    pipeline.process(&frame).unwrap();

    let poses = regressor.head_poses();
    assert_eq!(poses.len(), 2);
    for [phi, theta] in poses {
        assert!(phi.abs() < 1e-2, "phi {phi}");
        assert!(theta.abs() < 1e-2, "theta {theta}");
    }
}

#[test]
fn test_frame_loop_reports_skips_and_results() {
    let frames = vec![
        SyntheticImageBuilder::uniform(640, 480, [10, 10, 10]),
        SyntheticImageBuilder::gradient(640, 480),
    ];
    let source = MockImageSource::new(frames);
    let landmarker = frontal_landmarker();
    let faceless = MockLandmarker::no_faces();
    let with_face = pipeline(
        landmarker,
        Box::new(MockRegressor::new("fixed", GazeAngles::new(0.1, 0.1))),
    );
    let without_face = pipeline(
        faceless,
        Box::new(MockRegressor::new("fixed", GazeAngles::new(0.1, 0.1))),
    );
    let output = MockResultOutput::new();
    let progress = MockProgressSink::new();

    let (mut processed, mut skipped) = (0, 0);
    for (index, image) in source.images().enumerate() {
        let image = image.unwrap();
        let pipeline = if index == 0 { &without_face } else { &with_face };
        match pipeline.process(&image).unwrap() {
            FrameOutcome::Estimated(estimate) => {
                let result = GazeResult::from_estimate(&image, &estimate, "t".to_string());
                output.write(&result).unwrap();
                progress.on_event(ProgressEvent::Completed { result });
                processed += 1;
            }
            FrameOutcome::Skipped(reason) => {
                progress.on_event(ProgressEvent::skipped(image.path.clone(), reason));
                skipped += 1;
            }
        }
    }
    output.flush().unwrap();
    progress.on_event(ProgressEvent::Finished { processed, skipped });

    assert_eq!(source.iteration_count(), 1);
    assert_eq!(output.results().len(), 1);
    assert_eq!(output.results()[0].models, 1);
    assert_eq!(output.flush_count(), 1);
    assert_eq!(progress.completed_count(), 1);
    assert_eq!(progress.skipped_count(), 1);
    assert_eq!(progress.finished_counts(), Some((1, 1)));
}

#[test]
fn test_single_split_run_with_in_memory_provider() {
    let records = (0..=16)
        .flat_map(|s| (0..2).map(move |i| synthetic_sample(s, i, INPUT)))
        .collect();
    let mock = Arc::new(InMemoryProvider::new(records));
    let provider: Arc<dyn DatasetProvider> = Arc::clone(&mock) as Arc<dyn DatasetProvider>;
    let save_dir = tempfile::tempdir().unwrap();
    let sink = MockTrainSink::new();

    let config = RunConfig {
        hparams: HParams {
            loss_fn: LossKind::Pinball,
            batch_size: 8,
            model_base: Backbone::MobileNet,
            num_io_workers: 1,
            input_size: INPUT,
            ..HParams::default()
        },
        max_epochs: 1,
        save_dir: save_dir.path().to_path_buf(),
        k_fold_validation: false,
        device: Device::Cpu,
    };
    let report = training::run(&config, &provider, &sink).unwrap();

    assert_eq!(report.folds.len(), 1);
    assert!(report.test_summary().is_none());
    assert_eq!(sink.finished_epochs(), vec![(0, 0)]);
    assert!(sink.tested_folds().is_empty());
    assert_eq!(
        sink.events()[0],
        TrainEvent::FoldStarted { fold: 0, folds: 1 }
    );

    let train: Vec<usize> = (0..=15).collect();
    let opened = mock.opened();
    assert!(opened.contains(&train));
    assert!(opened.contains(&vec![16]));
    assert!(opened.iter().all(|s| *s == train || *s == vec![16]));
}
