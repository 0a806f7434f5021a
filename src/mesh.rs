use crate::error::{CrowdError, Result};
use glam::{Vec2, Vec3};
use gltf::mesh::Mode;
use std::path::Path;

/// Static vertex data for the instanced mesh. The shader takes the animated
/// position and normal from the VAT atlas (indexed by vertex id), so the
/// baseline attributes only carry the rest pose and texture coordinates.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CrowdVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl CrowdVertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self { position: position.to_array(), normal: normal.to_array(), uv: uv.to_array() }
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<CrowdVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: 24,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// One drawable range of the mesh. These three fields become the first,
/// third, and fourth words of the indirect draw-argument record.
#[derive(Clone, Debug)]
pub struct MeshSubset {
    pub name: Option<String>,
    pub index_offset: u32,
    pub index_count: u32,
    pub base_vertex: u32,
}

#[derive(Clone, Debug)]
pub struct CrowdMesh {
    pub vertices: Vec<CrowdVertex>,
    pub indices: Vec<u32>,
    pub subsets: Vec<MeshSubset>,
}

impl CrowdMesh {
    pub fn new(vertices: Vec<CrowdVertex>, indices: Vec<u32>) -> Self {
        let subset = MeshSubset {
            name: None,
            index_offset: 0,
            index_count: indices.len() as u32,
            base_vertex: 0,
        };
        Self { vertices, indices, subsets: vec![subset] }
    }

    pub fn subset(&self, index: usize) -> Result<&MeshSubset> {
        self.subsets
            .get(index)
            .ok_or(CrowdError::OutOfRange { what: "sub-mesh", index, len: self.subsets.len() })
    }

    /// Unit-cube stand-in used by tests and bring-up scenes.
    pub fn cube(size: f32) -> Self {
        let hs = size * 0.5;
        let corners = [
            Vec3::new(-hs, -hs, -hs),
            Vec3::new(hs, -hs, -hs),
            Vec3::new(hs, hs, -hs),
            Vec3::new(-hs, hs, -hs),
            Vec3::new(-hs, -hs, hs),
            Vec3::new(hs, -hs, hs),
            Vec3::new(hs, hs, hs),
            Vec3::new(-hs, hs, hs),
        ];
        let faces: [([usize; 4], Vec3); 6] = [
            ([0, 3, 2, 1], Vec3::NEG_Z),
            ([4, 5, 6, 7], Vec3::Z),
            ([0, 4, 7, 3], Vec3::NEG_X),
            ([1, 2, 6, 5], Vec3::X),
            ([3, 7, 6, 2], Vec3::Y),
            ([0, 1, 5, 4], Vec3::NEG_Y),
        ];
        let uv_quad = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];

        let mut vertices = Vec::with_capacity(24);
        for (corner_ids, normal) in faces {
            for (i, &corner) in corner_ids.iter().enumerate() {
                vertices.push(CrowdVertex::new(corners[corner], normal, uv_quad[i]));
            }
        }
        let mut indices = Vec::with_capacity(36);
        for face in 0..6u32 {
            let base = face * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(vertices, indices)
    }

    /// Imports the first mesh of a glTF file. Each triangle primitive becomes
    /// one subset with its own base vertex, so any of them can be selected as
    /// the indirect draw's sub-mesh.
    pub fn load_gltf(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (document, buffers, _images) = gltf::import(path)
            .map_err(|err| CrowdError::asset(format!("failed to import glTF {}: {err}", path.display())))?;
        let mesh = document
            .meshes()
            .next()
            .ok_or_else(|| CrowdError::asset(format!("no meshes in {}", path.display())))?;

        let mut vertices: Vec<CrowdVertex> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut subsets: Vec<MeshSubset> = Vec::new();

        for (primitive_index, primitive) in mesh.primitives().enumerate() {
            if primitive.mode() != Mode::Triangles {
                continue;
            }
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
            let positions: Vec<Vec3> = reader
                .read_positions()
                .ok_or_else(|| {
                    CrowdError::asset(format!("POSITION attribute missing in {}", path.display()))
                })?
                .map(Vec3::from_array)
                .collect();
            if positions.is_empty() {
                continue;
            }
            let normals: Vec<Vec3> = reader
                .read_normals()
                .map(|it| it.map(Vec3::from_array).collect())
                .unwrap_or_else(|| vec![Vec3::Y; positions.len()]);
            let uvs: Vec<Vec2> = reader
                .read_tex_coords(0)
                .map(|coords| coords.into_f32().map(Vec2::from_array).collect())
                .unwrap_or_else(|| vec![Vec2::ZERO; positions.len()]);
            let local_indices: Vec<u32> = reader
                .read_indices()
                .map(|read| read.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());

            let base_vertex = vertices.len() as u32;
            vertices.extend(positions.iter().enumerate().map(|(i, &pos)| {
                let normal = normals.get(i).copied().unwrap_or(Vec3::Y);
                let uv = uvs.get(i).copied().unwrap_or(Vec2::ZERO);
                CrowdVertex::new(pos, normal, uv)
            }));
            let index_offset = indices.len() as u32;
            indices.extend_from_slice(&local_indices);
            subsets.push(MeshSubset {
                name: Some(format!("primitive_{primitive_index}")),
                index_offset,
                index_count: local_indices.len() as u32,
                base_vertex,
            });
        }

        if subsets.is_empty() {
            return Err(CrowdError::asset(format!(
                "mesh in {} contains no triangle primitives",
                path.display()
            )));
        }
        Ok(Self { vertices, indices, subsets })
    }
}
