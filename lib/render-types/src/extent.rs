use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn has_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Extent of the given mip level, level 0 being this extent.
    pub fn at_mip_level(&self, mip_level: u32) -> Self {
        Self {
            width: (self.width >> mip_level).max(1),
            height: (self.height >> mip_level).max(1),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent3D {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3D {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    pub fn as_2d(&self) -> Extent2D {
        Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub fn at_mip_level(&self, mip_level: u32) -> Self {
        Self {
            width: (self.width >> mip_level).max(1),
            height: (self.height >> mip_level).max(1),
            depth: (self.depth >> mip_level).max(1),
        }
    }
}

impl From<Extent2D> for Extent3D {
    fn from(extent: Extent2D) -> Self {
        Self {
            width: extent.width,
            height: extent.height,
            depth: 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset2D {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect2D {
    pub offset: Offset2D,
    pub extent: Extent2D,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_extent_halves_per_axis_and_clamps_to_one() {
        let extent = Extent2D::new(1024, 512);
        assert_eq!(extent.at_mip_level(0), Extent2D::new(1024, 512));
        assert_eq!(extent.at_mip_level(1), Extent2D::new(512, 256));
        assert_eq!(extent.at_mip_level(9), Extent2D::new(2, 1));
        assert_eq!(extent.at_mip_level(10), Extent2D::new(1, 1));
        assert_eq!(extent.at_mip_level(20), Extent2D::new(1, 1));
    }
}
