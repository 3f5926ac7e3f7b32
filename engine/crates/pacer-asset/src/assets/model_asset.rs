use std::sync::Arc;

use pacer_gfx::{GpuBufferHandle, UploadDevice};

use crate::assets::{Asset, AssetBehavior, AssetConfig, Finalized, FinalizeContext, LoadData};
use crate::error::AssetError;
use crate::handle::AssetKind;

/// 每个交错顶点的 float 数
pub const VERTEX_FLOATS: usize = 8;

#[derive(Clone, Debug)]
pub struct ModelConfig {
    /// 将多边形拆成三角形
    pub triangulate: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { triangulate: true }
    }
}

impl ModelConfig {
    pub(crate) fn from_asset_config(config: &AssetConfig) -> ModelConfig {
        match config {
            AssetConfig::Model(config) => config.clone(),
            _ => ModelConfig::default(),
        }
    }
}

/// 单个 mesh 的顶点数据，使用单一索引
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub name: String,
    /// xyz
    pub positions: Vec<f32>,
    /// xyz，可能为空
    pub normals: Vec<f32>,
    /// uv，可能为空
    pub texcoords: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshData {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// 上传到 GPU 的布局：交错顶点 `[position(3), normal(3), texcoord(2)]`，后面紧跟 indices
    ///
    /// 缺失的 normal / texcoord 填 0。
    pub fn gpu_bytes(&self) -> Vec<u8> {
        let vertex_count = self.vertex_count();
        let mut vertices = Vec::with_capacity(vertex_count * VERTEX_FLOATS);
        for vertex in 0..vertex_count {
            vertices.extend_from_slice(&self.positions[vertex * 3..vertex * 3 + 3]);
            for i in 0..3 {
                vertices.push(self.normals.get(vertex * 3 + i).copied().unwrap_or(0.0));
            }
            for i in 0..2 {
                vertices.push(self.texcoords.get(vertex * 2 + i).copied().unwrap_or(0.0));
            }
        }

        let mut bytes = Vec::with_capacity(vertices.len() * 4 + self.indices.len() * 4);
        bytes.extend_from_slice(bytemuck::cast_slice(&vertices));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.indices));
        bytes
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModelData {
    pub meshes: Vec<MeshData>,
}

#[derive(Clone, Debug, Default)]
pub struct ModelAsset {
    pub meshes: Arc<Vec<MeshData>>,
    /// 与 `meshes` 一一对应
    pub gpu_buffers: Vec<GpuBufferHandle>,
}

impl AssetBehavior for ModelAsset {
    const KIND: AssetKind = AssetKind::Model;
    type Config = ModelConfig;
    type Data = ModelData;

    fn post_load(data: ModelData, ctx: &mut FinalizeContext<'_>) -> Result<(Self, Finalized), AssetError> {
        let _span = tracy_client::span!("ModelAsset::post_load");
        let mut gpu_buffers = Vec::with_capacity(data.meshes.len());
        for mesh in &data.meshes {
            match ctx.device.create_mesh_buffer(&mesh.gpu_bytes(), &mesh.name) {
                Ok(buffer) => gpu_buffers.push(buffer),
                Err(e) => {
                    gpu_buffers.into_iter().for_each(|buffer| ctx.device.destroy_mesh_buffer(buffer));
                    return Err(e.into());
                }
            }
        }

        let asset = ModelAsset {
            meshes: Arc::new(data.meshes),
            gpu_buffers,
        };
        Ok((asset, Finalized::Loaded))
    }

    fn unload(&mut self, device: &mut dyn UploadDevice) {
        self.gpu_buffers.drain(..).for_each(|buffer| device.destroy_mesh_buffer(buffer));
    }

    fn empty_data() -> ModelData {
        ModelData::default()
    }

    fn from_load_data(data: LoadData) -> Option<ModelData> {
        match data {
            LoadData::Model(data) => Some(data),
            _ => None,
        }
    }

    fn into_asset(self) -> Asset {
        Asset::Model(self)
    }

    fn from_asset(asset: &Asset) -> Option<&Self> {
        match asset {
            Asset::Model(asset) => Some(asset),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_f32(bytes: &[u8]) -> Vec<f32> {
        bytes.chunks_exact(4).map(|c| f32::from_ne_bytes(c.try_into().unwrap())).collect()
    }

    #[test]
    fn test_gpu_bytes_interleave_vertex_attributes() {
        let mesh = MeshData {
            name: "tri".to_string(),
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            texcoords: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            indices: vec![0, 1, 2],
        };
        let bytes = mesh.gpu_bytes();
        assert_eq!(bytes.len(), 3 * VERTEX_FLOATS * 4 + 3 * 4);

        let floats = read_f32(&bytes[..3 * VERTEX_FLOATS * 4]);
        assert_eq!(&floats[VERTEX_FLOATS..2 * VERTEX_FLOATS], &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
        let indices: Vec<u32> = bytes[3 * VERTEX_FLOATS * 4..]
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(indices, [0, 1, 2]);
    }

    #[test]
    fn test_missing_attributes_are_zero_filled() {
        let mesh = MeshData {
            positions: vec![1.0, 2.0, 3.0],
            indices: vec![0],
            ..Default::default()
        };
        let bytes = mesh.gpu_bytes();
        let floats = read_f32(&bytes[..VERTEX_FLOATS * 4]);
        assert_eq!(floats, [1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }
}
