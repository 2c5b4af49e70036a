use serde::{Deserialize, Serialize};

use crate::AssetEncoding;

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshBounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// One drawable section of a static mesh: a range of indices with one
/// material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSegment {
    pub material_path: String,
    pub first_index: u32,
    pub index_count: u32,
}

/// Static mesh geometry, deindexed into parallel per-vertex streams.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticMeshAsset {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    /// xyz tangent + w handedness.
    pub tangents: Vec<[f32; 4]>,
    pub tex_coords: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    pub segments: Vec<MeshSegment>,
    pub bounds: MeshBounds,
}

impl StaticMeshAsset {
    pub const MAGIC: &'static str = "AMSH";
    pub const VERSION: u64 = 2024012600;

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Streams must be equally long (or absent) and indices in range.
    pub fn validate(&self) -> anyhow::Result<()> {
        let count = self.positions.len();
        anyhow::ensure!(
            self.normals.is_empty() || self.normals.len() == count,
            "normal stream length mismatch"
        );
        anyhow::ensure!(
            self.tangents.is_empty() || self.tangents.len() == count,
            "tangent stream length mismatch"
        );
        anyhow::ensure!(
            self.tex_coords.is_empty() || self.tex_coords.len() == count,
            "tex-coord stream length mismatch"
        );
        anyhow::ensure!(
            self.indices.iter().all(|&i| (i as usize) < count),
            "index out of vertex range"
        );
        for segment in &self.segments {
            anyhow::ensure!(
                (segment.first_index + segment.index_count) as usize <= self.indices.len(),
                "segment index range out of bounds"
            );
        }
        Ok(())
    }

    pub fn compute_bounds(&mut self) {
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for position in &self.positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(position[axis]);
                max[axis] = max[axis].max(position[axis]);
            }
        }
        if self.positions.is_empty() {
            min = [0.0; 3];
            max = [0.0; 3];
        }
        self.bounds = MeshBounds { min, max };
    }

    pub fn write(&self, encoding: AssetEncoding) -> anyhow::Result<Vec<u8>> {
        crate::write_envelope(Self::MAGIC, Self::VERSION, encoding, self)
    }

    pub fn read(bytes: &[u8]) -> anyhow::Result<Self> {
        let asset: Self = crate::read_envelope(Self::MAGIC, Self::VERSION, bytes)?;
        asset.validate()?;
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> StaticMeshAsset {
        let mut mesh = StaticMeshAsset {
            name: "quad".into(),
            positions: vec![
                [-1.0, -1.0, 0.0],
                [1.0, -1.0, 0.0],
                [1.0, 1.0, 0.0],
                [-1.0, 1.0, 0.0],
            ],
            normals: vec![[0.0, 0.0, 1.0]; 4],
            tangents: vec![[1.0, 0.0, 0.0, 1.0]; 4],
            tex_coords: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            indices: vec![0, 1, 2, 2, 3, 0],
            segments: vec![MeshSegment {
                material_path: "materials/default.amat".into(),
                first_index: 0,
                index_count: 6,
            }],
            bounds: MeshBounds::default(),
        };
        mesh.compute_bounds();
        mesh
    }

    #[test]
    fn mesh_round_trips_and_validates() {
        let mesh = quad();
        let bytes = mesh.write(AssetEncoding::Binary).unwrap();
        let read_back = StaticMeshAsset::read(&bytes).unwrap();
        assert_eq!(read_back, mesh);
        assert_eq!(read_back.bounds.min, [-1.0, -1.0, 0.0]);
        assert_eq!(read_back.bounds.max, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn out_of_range_indices_fail_validation() {
        let mut mesh = quad();
        mesh.indices[0] = 99;
        let bytes = mesh.write(AssetEncoding::Binary).unwrap();
        assert!(StaticMeshAsset::read(&bytes).is_err());
    }
}
