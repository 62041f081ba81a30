use std::fs;

use anyhow::Result;
use image::{Rgb, RgbImage};

use battery_counter::preprocess::collect_images;
use battery_counter::{BatchPreprocessor, EnhanceConfig, Enhancer};

fn sample(seed: u8) -> RgbImage {
    RgbImage::from_fn(48, 32, |x, y| {
        Rgb([seed.wrapping_add(x as u8), seed.wrapping_add(y as u8), seed])
    })
}

#[test]
fn corrupt_image_is_logged_and_skipped() -> Result<()> {
    let input = tempfile::tempdir()?;
    let output = tempfile::tempdir()?;

    fs::create_dir_all(input.path().join("session_a"))?;
    sample(10).save(input.path().join("session_a/battery_001.jpg"))?;
    sample(90).save(input.path().join("battery_002.png"))?;
    fs::write(input.path().join("battery_003.jpg"), b"definitely not a jpeg")?;
    fs::write(input.path().join("notes.txt"), b"ignored")?;

    let preprocessor = BatchPreprocessor::new(Enhancer::default());
    let report = preprocessor.run(input.path(), output.path())?;

    assert_eq!(report.found, 3);
    assert_eq!(report.processed(), 2);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("battery_003.jpg"));

    assert!(output.path().join("session_a/battery_001.jpg").is_file());
    assert!(output.path().join("battery_002.png").is_file());
    assert!(!output.path().join("battery_003.jpg").exists());
    assert_eq!(collect_images(output.path())?.len(), 2);
    Ok(())
}

#[test]
fn outputs_keep_dimensions_and_are_enhanced() -> Result<()> {
    let input = tempfile::tempdir()?;
    let output = tempfile::tempdir()?;
    let original = sample(40);
    original.save(input.path().join("frame.png"))?;

    let report = BatchPreprocessor::new(Enhancer::default()).run(input.path(), output.path())?;
    assert_eq!(report.processed(), 1);

    let written = image::open(output.path().join("frame.png"))?.to_rgb8();
    assert_eq!(written.dimensions(), original.dimensions());
    assert_ne!(written, original);
    Ok(())
}

#[test]
fn resize_is_applied_to_outputs() -> Result<()> {
    let input = tempfile::tempdir()?;
    let output = tempfile::tempdir()?;
    sample(5).save(input.path().join("a.bmp"))?;

    let report = BatchPreprocessor::new(Enhancer::new(EnhanceConfig::passthrough()))
        .with_resize(Some((24, 16)))
        .run(input.path(), output.path())?;
    assert_eq!(report.processed(), 1);
    let written = image::open(output.path().join("a.bmp"))?.to_rgb8();
    assert_eq!(written.dimensions(), (24, 16));
    Ok(())
}

#[test]
fn empty_input_produces_empty_report() -> Result<()> {
    let input = tempfile::tempdir()?;
    let output = tempfile::tempdir()?;
    let report = BatchPreprocessor::new(Enhancer::default()).run(input.path(), output.path())?;
    assert_eq!(report.found, 0);
    assert!(report.failures.is_empty());
    Ok(())
}
