//! Integration tests for filesystem image loading.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use image::{Rgb, RgbImage};
use rt_gaze_adapters::FsImageSource;
use rt_gaze_core::ImageSource;

fn write_png(path: &Path, width: u32, height: u32) {
    RgbImage::from_pixel(width, height, Rgb([10, 20, 30]))
        .save(path)
        .expect("write png");
}

#[test]
fn test_load_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    write_png(&path, 12, 8);

    let source = FsImageSource::new(vec![path], false);
    assert_eq!(source.count_hint(), Some(1));
    let info = source.images().next().unwrap().expect("should load PNG");
    assert_eq!((info.width, info.height), (12, 8));
    assert!(info.path.ends_with("frame.png"));
}

#[test]
fn test_directory_is_sorted_and_filtered() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("b.png"), 4, 4);
    write_png(&dir.path().join("a.png"), 4, 4);
    std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

    let source = FsImageSource::new(vec![dir.path().to_path_buf()], false);
    let paths: Vec<String> = source.images().map(|i| i.unwrap().path).collect();
    assert_eq!(paths.len(), 2);
    assert!(paths[0].ends_with("a.png"));
    assert!(paths[1].ends_with("b.png"));
}

#[test]
fn test_recursion_is_opt_in() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("nested");
    std::fs::create_dir(&nested).unwrap();
    write_png(&dir.path().join("top.png"), 4, 4);
    write_png(&nested.join("deep.png"), 4, 4);

    let flat = FsImageSource::new(vec![dir.path().to_path_buf()], false);
    assert_eq!(flat.count_hint(), Some(1));

    let recursive = FsImageSource::new(vec![dir.path().to_path_buf()], true);
    assert_eq!(recursive.count_hint(), Some(2));
}

#[test]
fn test_corrupt_image_is_an_item_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"not a jpeg").unwrap();

    let source = FsImageSource::new(vec![path], false);
    let item = source.images().next().unwrap();
    assert!(item.is_err());
}
