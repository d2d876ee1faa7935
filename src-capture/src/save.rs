//! Writing a captured frame pair into an experiment directory.
//!
//! Colour goes to `<experiment>/RGB/<name>.<ext>` through the `image`
//! encoders; depth goes to `<experiment>/Depth/<name>.txt` as one distance in
//! metres per line, row-major.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use plotcam_common::{ImageFormat, Rotation};
use tracing::debug;

use crate::capture::FramePair;

pub const RGB_DIR: &str = "RGB";
pub const DEPTH_DIR: &str = "Depth";

/// How frame pairs are written to disk.
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    pub rotation: Rotation,
    /// Metres per Z16 depth unit
    pub depth_scale: f32,
    pub image_format: ImageFormat,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            rotation: Rotation::default(),
            depth_scale: 0.001,
            image_format: ImageFormat::default(),
        }
    }
}

/// Files produced by one save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPaths {
    pub color: PathBuf,
    pub depth: PathBuf,
}

/// Error type for save operations.
#[derive(Debug)]
pub enum SaveError {
    /// The experiment is missing its `RGB` or `Depth` directory
    MissingDirectory(PathBuf),
    /// Writing the depth file failed
    Io(std::io::Error),
    /// Encoding the colour image failed
    Encode(String),
}

impl std::fmt::Display for SaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveError::MissingDirectory(path) => {
                write!(f, "Experiment directory missing: {}", path.display())
            }
            SaveError::Io(e) => write!(f, "I/O error: {}", e),
            SaveError::Encode(e) => write!(f, "Image encoding failed: {}", e),
        }
    }
}

impl std::error::Error for SaveError {}

impl From<std::io::Error> for SaveError {
    fn from(e: std::io::Error) -> Self {
        SaveError::Io(e)
    }
}

impl From<image::ImageError> for SaveError {
    fn from(e: image::ImageError) -> Self {
        SaveError::Encode(e.to_string())
    }
}

/// Save `pair` under `experiment` as `base_name`.
///
/// The caller validates `base_name`; both target directories must already exist.
pub fn save_pair(
    pair: &FramePair,
    experiment: &Path,
    base_name: &str,
    options: &SaveOptions,
) -> Result<SavedPaths, SaveError> {
    let rgb_dir = experiment.join(RGB_DIR);
    let depth_dir = experiment.join(DEPTH_DIR);
    for dir in [&rgb_dir, &depth_dir] {
        if !dir.is_dir() {
            return Err(SaveError::MissingDirectory(dir.clone()));
        }
    }

    let color_path = rgb_dir.join(format!(
        "{}.{}",
        base_name,
        options.image_format.extension()
    ));
    let depth_path = depth_dir.join(format!("{}.txt", base_name));

    write_color(pair, &color_path, options)?;
    write_depth(pair, &depth_path, options)?;

    debug!(
        "Saved {} and {}",
        color_path.display(),
        depth_path.display()
    );

    Ok(SavedPaths {
        color: color_path,
        depth: depth_path,
    })
}

fn write_color(pair: &FramePair, path: &Path, options: &SaveOptions) -> Result<(), SaveError> {
    let rotated = pair.color.rotated(options.rotation);
    let image = image::RgbImage::from_raw(rotated.width, rotated.height, rotated.to_rgb())
        .ok_or_else(|| SaveError::Encode("colour buffer does not match its size".to_string()))?;

    let format = match options.image_format {
        ImageFormat::Bmp => image::ImageFormat::Bmp,
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
    };
    image.save_with_format(path, format)?;
    Ok(())
}

fn write_depth(pair: &FramePair, path: &Path, options: &SaveOptions) -> Result<(), SaveError> {
    let rotated = pair.depth.rotated(options.rotation);
    let mut writer = BufWriter::new(File::create(path)?);
    for &raw in &rotated.data {
        writeln!(writer, "{:.3}", raw as f32 * options.depth_scale)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ColorFrame, DepthFrame};

    fn experiment() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(RGB_DIR)).unwrap();
        std::fs::create_dir(dir.path().join(DEPTH_DIR)).unwrap();
        dir
    }

    fn pair(width: u32, height: u32) -> FramePair {
        let pixels = (width * height) as usize;
        FramePair {
            color: ColorFrame::new(width, height, (0..pixels * 3).map(|i| i as u8).collect())
                .unwrap(),
            depth: DepthFrame::new(width, height, (0..pixels).map(|i| i as u16 * 10).collect())
                .unwrap(),
        }
    }

    #[test]
    fn test_depth_file_has_one_line_per_pixel() {
        let dir = experiment();
        let saved = save_pair(&pair(5, 3), dir.path(), "001", &SaveOptions::default()).unwrap();

        assert_eq!(saved.depth, dir.path().join("Depth").join("001.txt"));
        let text = std::fs::read_to_string(&saved.depth).unwrap();
        let values: Vec<f32> = text.lines().map(|l| l.parse().unwrap()).collect();
        assert_eq!(values.len(), 15);
        assert!(values.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_depth_is_rotated_and_scaled() {
        let dir = experiment();
        // 2 wide, 1 tall: [0, 10] rotates to a column [10, 0].
        let saved = save_pair(&pair(2, 1), dir.path(), "p", &SaveOptions::default()).unwrap();
        let text = std::fs::read_to_string(&saved.depth).unwrap();
        assert_eq!(text, "0.010\n0.000\n");
    }

    #[test]
    fn test_color_written_in_display_orientation() {
        let dir = experiment();
        let options = SaveOptions {
            image_format: ImageFormat::Png,
            ..SaveOptions::default()
        };
        let saved = save_pair(&pair(4, 2), dir.path(), "002", &options).unwrap();

        assert_eq!(saved.color, dir.path().join("RGB").join("002.png"));
        let decoded = image::open(&saved.color).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (2, 4));
        // Input pixel (x=3, y=0) is BGR [9, 10, 11]; after the turn it sits
        // at the top-left and is stored as RGB.
        assert_eq!(decoded.get_pixel(0, 0).0, [11, 10, 9]);
    }

    #[test]
    fn test_default_format_is_bmp() {
        let dir = experiment();
        let saved = save_pair(&pair(3, 3), dir.path(), "003", &SaveOptions::default()).unwrap();
        assert_eq!(saved.color.extension().unwrap(), "bmp");
        assert!(saved.color.is_file());
    }

    #[test]
    fn test_missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = save_pair(&pair(2, 2), dir.path(), "001", &SaveOptions::default());
        assert!(matches!(result, Err(SaveError::MissingDirectory(_))));
    }
}
