//! Frame readers: single images and folders of numbered JPEG frames.
//!
//! Every stitching input is presented as a stack of single-channel frames.
//! A plain image file is a one-frame stack; a directory is globbed for JPEG
//! files (sorted) and presents them as `nfrms` stacked frames, standing in
//! for volumetric stack formats.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::{GrayImage, ImageReader, RgbImage};

use crate::error::{Result, StitchError};

/// Color channel used for registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Red plane.
    Red,
    /// Green plane.
    Green,
    /// Blue plane.
    Blue,
}

impl Channel {
    #[inline]
    fn index(self) -> usize {
        match self {
            Self::Red => 0,
            Self::Green => 1,
            Self::Blue => 2,
        }
    }
}

impl FromStr for Channel {
    type Err = StitchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(Self::Red),
            "g" => Ok(Self::Green),
            "b" => Ok(Self::Blue),
            other => Err(StitchError::InvalidChannel {
                requested: other.to_owned(),
            }),
        }
    }
}

/// A tile input opened for reading frames.
#[derive(Clone, Debug)]
pub struct InputFile {
    frames: Vec<PathBuf>,
    /// Frame width in pixels.
    pub xsize: u32,
    /// Frame height in pixels.
    pub ysize: u32,
    /// Channels in the source frames (1 for grayscale sources).
    pub nchannels: u8,
    /// Number of frames in the stack.
    pub nfrms: u32,
    /// Channel extracted by [`InputFile::frame`]; luma conversion when unset.
    pub channel: Option<Channel>,
}

impl InputFile {
    /// Open a single image file, or a directory of JPEG frames.
    pub fn open(path: &Path) -> Result<Self> {
        let frames = if path.is_dir() {
            let mut frames = Vec::new();
            let entries = std::fs::read_dir(path).map_err(|e| StitchError::io(path, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| StitchError::io(path, e))?;
                let p = entry.path();
                let is_jpeg = p.extension().and_then(|e| e.to_str()).is_some_and(|ext| {
                    ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg")
                });
                if is_jpeg {
                    frames.push(p);
                }
            }
            frames.sort();
            if frames.is_empty() {
                return Err(StitchError::EmptyFolder {
                    path: path.to_path_buf(),
                });
            }
            frames
        } else {
            vec![path.to_path_buf()]
        };

        // Probe geometry from the first frame.
        let first = open_reader(&frames[0])?.decode()?;
        let nchannels = first.color().channel_count();

        Ok(Self {
            xsize: first.width(),
            ysize: first.height(),
            nchannels,
            nfrms: frames.len() as u32,
            channel: None,
            frames,
        })
    }

    /// Set the registration channel.
    pub fn with_channel(mut self, channel: Option<Channel>) -> Self {
        self.channel = channel;
        self
    }

    /// Decode one frame to a single plane: the configured channel, or the
    /// luma conversion when no channel is set.
    pub fn frame(&self, index: u32) -> Result<GrayImage> {
        let path = self.frame_path(index)?;
        let img = open_reader(path)?.decode()?;
        Ok(match self.channel {
            None => img.to_luma8(),
            Some(c) => channel_plane(&img.to_rgb8(), c),
        })
    }

    /// Decode one frame to RGB (grayscale sources are replicated).
    pub fn frame_rgb(&self, index: u32) -> Result<RgbImage> {
        let path = self.frame_path(index)?;
        Ok(open_reader(path)?.decode()?.to_rgb8())
    }

    /// Central frame index, the default registration plane.
    pub fn central_frame(&self) -> u32 {
        self.nfrms / 2
    }

    fn frame_path(&self, index: u32) -> Result<&Path> {
        self.frames
            .get(index as usize)
            .map(PathBuf::as_path)
            .ok_or(StitchError::FrameOutOfRange {
                index,
                nfrms: self.nfrms,
            })
    }
}

fn open_reader(path: &Path) -> Result<ImageReader<std::io::BufReader<std::fs::File>>> {
    ImageReader::open(path).map_err(|e| StitchError::io(path, e))
}

fn channel_plane(rgb: &RgbImage, channel: Channel) -> GrayImage {
    let idx = channel.index();
    let mut out = GrayImage::new(rgb.width(), rgb.height());
    for (src, dst) in rgb.pixels().zip(out.pixels_mut()) {
        dst[0] = src[idx];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn channel_parse_matches_cli_letters() {
        assert_eq!("r".parse::<Channel>().unwrap(), Channel::Red);
        assert_eq!("g".parse::<Channel>().unwrap(), Channel::Green);
        assert_eq!("b".parse::<Channel>().unwrap(), Channel::Blue);
        let err = "x".parse::<Channel>().unwrap_err();
        assert!(err.to_string().contains("'x'"), "{err}");
    }

    #[test]
    fn single_file_opens_as_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0_0.png");
        let mut img = RgbImage::new(8, 6);
        img.put_pixel(3, 2, Rgb([200, 90, 10]));
        img.save(&path).unwrap();

        let input = InputFile::open(&path).unwrap();
        assert_eq!((input.xsize, input.ysize), (8, 6));
        assert_eq!(input.nfrms, 1);
        assert_eq!(input.nchannels, 3);
        assert_eq!(input.central_frame(), 0);

        let red = input
            .clone()
            .with_channel(Some(Channel::Red))
            .frame(0)
            .unwrap();
        assert_eq!(red.get_pixel(3, 2), &Luma([200u8]));

        let err = input.frame(1).unwrap_err();
        assert!(
            matches!(err, StitchError::FrameOutOfRange { index: 1, nfrms: 1 }),
            "{err}"
        );
    }

    #[test]
    fn directory_opens_as_sorted_stack() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("a.jpg", 10u8), ("b.jpg", 20), ("c.jpg", 30)] {
            GrayImage::from_pixel(4, 4, Luma([value]))
                .save(dir.path().join(name))
                .unwrap();
        }
        // Ignored: not a JPEG frame.
        GrayImage::from_pixel(4, 4, Luma([0]))
            .save(dir.path().join("skip.png"))
            .unwrap();

        let input = InputFile::open(dir.path()).unwrap();
        assert_eq!(input.nfrms, 3);
        assert_eq!(input.central_frame(), 1);

        // JPEG is lossy; a constant frame still decodes near its value.
        let mid = input.frame(1).unwrap();
        let v = mid.get_pixel(0, 0)[0] as i32;
        assert!((v - 20).abs() <= 3, "frame value {v}");
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = InputFile::open(dir.path()).unwrap_err();
        assert!(matches!(err, StitchError::EmptyFolder { .. }), "{err}");
    }
}
