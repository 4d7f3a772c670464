//! Raster orientation handling.
//!
//! Pictures carry an EXIF `Orientation` tag (1..=8) describing how the stored
//! rows and columns relate to the viewer's "up". [`normalize`] maps that tag to
//! [`Orientation`], and [`Orientation::apply`] turns stored pixels upright.

use image::DynamicImage;
use serde::Serialize;

use crate::error::VisionError;

/// The eight standard raster orientations, named after where "up" ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    Up,
    UpMirrored,
    Down,
    DownMirrored,
    Left,
    LeftMirrored,
    Right,
    RightMirrored,
}

impl Orientation {
    pub const ALL: [Orientation; 8] = [
        Orientation::Up,
        Orientation::UpMirrored,
        Orientation::Down,
        Orientation::DownMirrored,
        Orientation::Left,
        Orientation::LeftMirrored,
        Orientation::Right,
        Orientation::RightMirrored,
    ];

    /// EXIF tag value with the same geometric meaning.
    pub fn to_exif(self) -> u16 {
        match self {
            Orientation::Up => 1,
            Orientation::UpMirrored => 2,
            Orientation::Down => 3,
            Orientation::DownMirrored => 4,
            Orientation::LeftMirrored => 5,
            Orientation::Right => 6,
            Orientation::RightMirrored => 7,
            Orientation::Left => 8,
        }
    }

    /// Clockwise rotation (degrees) needed to bring the stored pixels upright,
    /// applied before the mirror.
    pub fn rotation_degrees(self) -> u16 {
        match self {
            Orientation::Up | Orientation::UpMirrored => 0,
            Orientation::Right | Orientation::LeftMirrored => 90,
            Orientation::Down => 180,
            // Vertical flip == 180 rotation followed by horizontal mirror
            Orientation::DownMirrored => 180,
            Orientation::Left | Orientation::RightMirrored => 270,
        }
    }

    pub fn is_mirrored(self) -> bool {
        matches!(
            self,
            Orientation::UpMirrored
                | Orientation::DownMirrored
                | Orientation::LeftMirrored
                | Orientation::RightMirrored
        )
    }

    /// Whether turning the image upright swaps width and height.
    pub fn swaps_axes(self) -> bool {
        self.rotation_degrees() % 180 == 90
    }

    /// Size of the image after [`Orientation::apply`].
    pub fn upright_dimensions(self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Turn stored pixels upright.
    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        let rotated = match self.rotation_degrees() {
            90 => img.rotate90(),
            180 => img.rotate180(),
            270 => img.rotate270(),
            _ => img,
        };
        if self.is_mirrored() {
            rotated.fliph()
        } else {
            rotated
        }
    }
}

/// Map a stored EXIF orientation tag to its canonical [`Orientation`].
///
/// Tags outside `1..=8` are rejected rather than treated as `Up`: a wrong guess
/// would mis-orient detection and misplace every overlay box.
pub fn normalize(tag: u16) -> Result<Orientation, VisionError> {
    let orientation = match tag {
        1 => Orientation::Up,
        2 => Orientation::UpMirrored,
        3 => Orientation::Down,
        4 => Orientation::DownMirrored,
        5 => Orientation::LeftMirrored,
        6 => Orientation::Right,
        7 => Orientation::RightMirrored,
        8 => Orientation::Left,
        other => return Err(VisionError::UnrecognizedOrientation(other)),
    };
    Ok(orientation)
}
