//! Safetensors-backed gaze dataset store.
//!
//! One file holds every subject as four tensors:
//!
//! | name | dtype | shape |
//! |---|---|---|
//! | `subject_<ss>/left` | `u8` | `[N, H, W, 3]` |
//! | `subject_<ss>/right` | `u8` | `[N, H, W, 3]` |
//! | `subject_<ss>/head` | `f32` | `[N, 2]` (`phi`, `theta`) |
//! | `subject_<ss>/gaze` | `f32` | `[N, 2]` (`theta`, `phi`) |
//!
//! `<ss>` is the zero-padded subject index.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use image::RgbImage;
use rt_gaze_core::{DatasetProvider, GazeAngles, GazeDataset, GazeSample, HeadPose};
use safetensors::tensor::{Metadata, TensorView};
use safetensors::Dtype;
use serde::Serialize;
use tracing::{debug, info};

const LEFT: &str = "left";
const RIGHT: &str = "right";
const HEAD: &str = "head";
const GAZE: &str = "gaze";

/// Bytes of one `[f32; 2]` label row.
const LABEL_BYTES: usize = 8;

/// Largest JSON header accepted.
const MAX_HEADER_BYTES: u64 = 100_000_000;

fn tensor_name(subject: usize, field: &str) -> String {
    format!("subject_{subject:02}/{field}")
}

/// Splits `subject_<ss>/<field>` into its parts.
fn parse_name(name: &str) -> Option<(usize, &str)> {
    let (subject, field) = name.strip_prefix("subject_")?.split_once('/')?;
    Some((subject.parse().ok()?, field))
}

/// Byte ranges of one subject's tensors inside the file.
#[derive(Debug, Clone)]
struct SubjectIndex {
    records: usize,
    height: u32,
    width: u32,
    left: Range<u64>,
    right: Range<u64>,
    head: Range<u64>,
    gaze: Range<u64>,
}

impl SubjectIndex {
    fn image_bytes(&self) -> usize {
        self.height as usize * self.width as usize * 3
    }
}

/// Open file handle plus the per-subject index.
///
/// Only the header is read up front; records are read on demand.
struct Store {
    path: PathBuf,
    file: Mutex<File>,
    subjects: BTreeMap<usize, SubjectIndex>,
}

#[derive(Default)]
struct PartialSubject {
    left: Option<(Vec<usize>, Range<u64>)>,
    right: Option<(Vec<usize>, Range<u64>)>,
    head: Option<(Vec<usize>, Range<u64>)>,
    gaze: Option<(Vec<usize>, Range<u64>)>,
}

/// Reads the length-prefixed JSON header and checks every tensor fits the file.
fn read_header(file: &mut File, file_len: u64) -> Result<(u64, Metadata)> {
    let mut prefix = [0u8; 8];
    file.read_exact(&mut prefix).context("file is shorter than its header")?;
    let header_len = u64::from_le_bytes(prefix);
    if header_len > MAX_HEADER_BYTES || header_len + 8 > file_len {
        anyhow::bail!("header length {header_len} does not fit a {file_len} byte file");
    }
    let mut header = vec![0u8; usize::try_from(header_len)?];
    file.read_exact(&mut header)?;
    let metadata: Metadata =
        serde_json::from_slice(&header).context("header is not safetensors metadata")?;

    let data_start = 8 + header_len;
    let data_len = file_len - data_start;
    for (name, info) in metadata.tensors() {
        let (start, end) = info.data_offsets;
        let (start, end) = (u64::try_from(start)?, u64::try_from(end)?);
        if start > end || end > data_len {
            anyhow::bail!("tensor '{name}' lies outside the file");
        }
        let elements: usize = info.shape.iter().product();
        if (elements * info.dtype.size()) as u64 != end - start {
            anyhow::bail!("tensor '{name}' byte length does not match its shape");
        }
    }
    Ok((data_start, metadata))
}

impl Store {
    fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
        let file_len = file.metadata()?.len();
        let (data_start, metadata) = read_header(&mut file, file_len)
            .with_context(|| format!("Failed to parse dataset: {}", path.display()))?;

        let mut partial: BTreeMap<usize, PartialSubject> = BTreeMap::new();
        for (name, info) in metadata.tensors() {
            let Some((subject, field)) = parse_name(&name) else {
                debug!("Ignoring tensor '{name}'");
                continue;
            };
            let expected = match field {
                LEFT | RIGHT => Dtype::U8,
                HEAD | GAZE => Dtype::F32,
                _ => {
                    debug!("Ignoring tensor '{name}'");
                    continue;
                }
            };
            if info.dtype != expected {
                anyhow::bail!("Tensor '{name}' is {:?}, expected {expected:?}", info.dtype);
            }
            let (start, end) = info.data_offsets;
            let range = data_start + start as u64..data_start + end as u64;
            let entry = partial.entry(subject).or_default();
            let slot = match field {
                LEFT => &mut entry.left,
                RIGHT => &mut entry.right,
                HEAD => &mut entry.head,
                _ => &mut entry.gaze,
            };
            *slot = Some((info.shape.clone(), range));
        }

        let subjects = partial
            .into_iter()
            .map(|(subject, p)| Ok((subject, Self::index_subject(subject, p)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .with_context(|| format!("Invalid dataset: {}", path.display()))?;

        info!(
            "Opened dataset {} with {} subjects",
            path.display(),
            subjects.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            subjects,
        })
    }

    fn index_subject(subject: usize, p: PartialSubject) -> Result<SubjectIndex> {
        let missing = |field: &str| anyhow::anyhow!("missing '{}'", tensor_name(subject, field));
        let (left_shape, left) = p.left.ok_or_else(|| missing(LEFT))?;
        let (right_shape, right) = p.right.ok_or_else(|| missing(RIGHT))?;
        let (head_shape, head) = p.head.ok_or_else(|| missing(HEAD))?;
        let (gaze_shape, gaze) = p.gaze.ok_or_else(|| missing(GAZE))?;

        let [records, height, width, 3] = left_shape[..] else {
            anyhow::bail!(
                "'{}' must be [N, H, W, 3], got {left_shape:?}",
                tensor_name(subject, LEFT)
            );
        };
        if right_shape != left_shape {
            anyhow::bail!(
                "'{}' has shape {right_shape:?}, left eye has {left_shape:?}",
                tensor_name(subject, RIGHT)
            );
        }
        for (field, shape) in [(HEAD, &head_shape), (GAZE, &gaze_shape)] {
            if shape[..] != [records, 2] {
                anyhow::bail!(
                    "'{}' must be [{records}, 2], got {shape:?}",
                    tensor_name(subject, field)
                );
            }
        }

        Ok(SubjectIndex {
            records,
            height: u32::try_from(height).context("eye patch height overflows u32")?,
            width: u32::try_from(width).context("eye patch width overflows u32")?,
            left,
            right,
            head,
            gaze,
        })
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("dataset file lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }

    fn image(&self, index: &SubjectIndex, range: &Range<u64>, row: usize) -> Result<RgbImage> {
        let size = index.image_bytes();
        let mut bytes = vec![0u8; size];
        self.read(range.start + (row * size) as u64, &mut bytes)?;
        RgbImage::from_raw(index.width, index.height, bytes)
            .context("eye patch buffer does not match its shape")
    }

    fn label(&self, range: &Range<u64>, row: usize) -> Result<[f32; 2]> {
        let mut bytes = [0u8; LABEL_BYTES];
        self.read(range.start + (row * LABEL_BYTES) as u64, &mut bytes)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    fn sample(&self, subject: usize, row: usize) -> Result<GazeSample> {
        let index = self
            .subjects
            .get(&subject)
            .with_context(|| format!("Subject {subject} is not in the dataset"))?;
        let [phi, theta] = self.label(&index.head, row)?;
        let [gaze_theta, gaze_phi] = self.label(&index.gaze, row)?;
        Ok(GazeSample {
            subject,
            left: self.image(index, &index.left, row)?,
            right: self.image(index, &index.right, row)?,
            head_pose: HeadPose::new(phi, theta),
            gaze: GazeAngles::new(gaze_theta, gaze_phi),
        })
    }
}

/// Record count and patch size of one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectSummary {
    /// Subject index.
    pub subject: usize,
    /// Number of records.
    pub records: usize,
    /// Eye patch height in pixels.
    pub height: u32,
    /// Eye patch width in pixels.
    pub width: u32,
}

/// Contents of a dataset file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    /// Dataset file.
    pub path: String,
    /// Per-subject counts, by subject index.
    pub subjects: Vec<SubjectSummary>,
    /// Records across all subjects.
    pub total_records: usize,
}

/// Summarizes a dataset file without decoding any record.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid dataset.
pub fn dataset_info(path: impl AsRef<Path>) -> Result<DatasetSummary> {
    Ok(SafetensorsDatasetProvider::open_file(path)?.summary())
}

/// Opens subject-scoped views of one dataset file.
///
/// Every view shares one open handle; records are read when requested.
#[derive(Clone)]
pub struct SafetensorsDatasetProvider {
    store: Arc<Store>,
}

impl SafetensorsDatasetProvider {
    /// Opens a dataset file and indexes its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not safetensors, or a
    /// subject's tensors are missing or inconsistent.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store: Arc::new(Store::open(path.as_ref())?),
        })
    }

    /// Subject indices present in the file.
    #[must_use]
    pub fn subjects(&self) -> Vec<usize> {
        self.store.subjects.keys().copied().collect()
    }

    /// Per-subject record counts.
    #[must_use]
    pub fn summary(&self) -> DatasetSummary {
        let subjects: Vec<SubjectSummary> = self
            .store
            .subjects
            .iter()
            .map(|(&subject, index)| SubjectSummary {
                subject,
                records: index.records,
                height: index.height,
                width: index.width,
            })
            .collect();
        DatasetSummary {
            path: self.store.path.display().to_string(),
            total_records: subjects.iter().map(|s| s.records).sum(),
            subjects,
        }
    }
}

impl DatasetProvider for SafetensorsDatasetProvider {
    fn open(&self, subjects: &[usize]) -> Result<Box<dyn GazeDataset>> {
        let mut rows = Vec::new();
        for &subject in subjects {
            let index = self.store.subjects.get(&subject).with_context(|| {
                format!(
                    "Subject {subject} is not in {}",
                    self.store.path.display()
                )
            })?;
            rows.extend((0..index.records).map(|row| (subject, row)));
        }
        debug!("Opened view over subjects {subjects:?}: {} records", rows.len());
        Ok(Box::new(SafetensorsDataset {
            store: Arc::clone(&self.store),
            subjects: subjects.to_vec(),
            rows,
        }))
    }
}

/// Read-only view over the records of some subjects.
pub struct SafetensorsDataset {
    store: Arc<Store>,
    subjects: Vec<usize>,
    rows: Vec<(usize, usize)>,
}

impl GazeDataset for SafetensorsDataset {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn subjects(&self) -> &[usize] {
        &self.subjects
    }

    fn get(&self, index: usize) -> Result<GazeSample> {
        let &(subject, row) = self
            .rows
            .get(index)
            .with_context(|| format!("Record {index} out of range ({})", self.rows.len()))?;
        self.store.sample(subject, row)
    }
}

#[derive(Default)]
struct SubjectBuffer {
    size: Option<(u32, u32)>,
    left: Vec<u8>,
    right: Vec<u8>,
    head: Vec<f32>,
    gaze: Vec<f32>,
}

/// Builds dataset files in the layout [`SafetensorsDatasetProvider`] reads.
#[derive(Default)]
pub struct DatasetWriter {
    subjects: BTreeMap<usize, SubjectBuffer>,
}

impl DatasetWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the eye patches differ in size from each other or
    /// from earlier records of the same subject.
    pub fn push(&mut self, sample: &GazeSample) -> Result<()> {
        let size = sample.left.dimensions();
        if sample.right.dimensions() != size {
            anyhow::bail!(
                "left and right eye patches differ in size: {size:?} vs {:?}",
                sample.right.dimensions()
            );
        }
        let buf = self.subjects.entry(sample.subject).or_default();
        match buf.size {
            Some(existing) if existing != size => anyhow::bail!(
                "subject {} has {existing:?} eye patches, got {size:?}",
                sample.subject
            ),
            _ => buf.size = Some(size),
        }
        buf.left.extend_from_slice(sample.left.as_raw());
        buf.right.extend_from_slice(sample.right.as_raw());
        buf.head.extend(sample.head_pose.to_array());
        buf.gaze.extend(sample.gaze.to_array());
        Ok(())
    }

    /// Number of records pushed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subjects.values().map(|b| b.head.len() / 2).sum()
    }

    /// Returns true if nothing was pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is empty or the file cannot be written.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if self.is_empty() {
            anyhow::bail!("refusing to write an empty dataset");
        }

        let mut views: HashMap<String, TensorView<'_>> = HashMap::with_capacity(self.subjects.len() * 4);
        for (&subject, buf) in &self.subjects {
            let (width, height) = buf.size.unwrap_or_default();
            let records = buf.head.len() / 2;
            let image_shape = vec![records, height as usize, width as usize, 3];
            views.insert(
                tensor_name(subject, LEFT),
                TensorView::new(Dtype::U8, image_shape.clone(), &buf.left)?,
            );
            views.insert(
                tensor_name(subject, RIGHT),
                TensorView::new(Dtype::U8, image_shape, &buf.right)?,
            );
            views.insert(
                tensor_name(subject, HEAD),
                TensorView::new(Dtype::F32, vec![records, 2], bytemuck::cast_slice(&buf.head))?,
            );
            views.insert(
                tensor_name(subject, GAZE),
                TensorView::new(Dtype::F32, vec![records, 2], bytemuck::cast_slice(&buf.gaze))?,
            );
        }

        safetensors::serialize_to_file(&views, &None, path)
            .with_context(|| format!("Failed to write dataset: {}", path.display()))?;
        info!(
            "Wrote {} records of {} subjects to {}",
            self.len(),
            self.subjects.len(),
            path.display()
        );
        Ok(())
    }
}
