use std::io::{BufReader, Cursor};

use crate::assets::{AssetConfig, LoadData, MeshData, ModelConfig, ModelData};
use crate::error::AssetError;
use crate::handle::AssetKind;
use crate::loaders::AssetLoader;

/// Wavefront OBJ 模型，忽略材质文件
pub struct ObjLoader;

/// OBJ 是文本格式，没有 magic number，检查第一条有效语句的关键字
const OBJ_KEYWORDS: &[&str] = &["v", "vn", "vt", "f", "o", "g", "s", "mtllib", "usemtl"];

impl AssetLoader for ObjLoader {
    fn name(&self) -> &'static str {
        "wavefront-obj"
    }

    fn kind(&self) -> AssetKind {
        AssetKind::Model
    }

    fn can_process(&self, bytes: &[u8]) -> bool {
        let head = &bytes[..bytes.len().min(1024)];
        // 截断可能落在多字节字符中间，只取合法的前缀
        let head = match std::str::from_utf8(head) {
            Ok(text) => text,
            Err(e) => match std::str::from_utf8(&head[..e.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return false,
            },
        };

        head.lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .and_then(|line| line.split_whitespace().next())
            .is_some_and(|keyword| OBJ_KEYWORDS.contains(&keyword))
    }

    fn load_from_binary(&self, bytes: &[u8], config: &AssetConfig) -> Result<LoadData, AssetError> {
        let _span = tracy_client::span!("ObjLoader::load_from_binary");
        let config = ModelConfig::from_asset_config(config);

        let mut reader = BufReader::new(Cursor::new(bytes));
        let (models, _materials) = tobj::load_obj_buf(
            &mut reader,
            &tobj::LoadOptions {
                single_index: true,
                triangulate: config.triangulate,
                ignore_lines: true,
                ignore_points: true,
                ..Default::default()
            },
            // 材质文件不随模型一起加载
            |_| Err(tobj::LoadError::OpenFileFailed),
        )
        .map_err(|e| AssetError::decode(AssetKind::Model, e))?;

        let meshes = models
            .into_iter()
            .map(|model| MeshData {
                name: model.name,
                // 等价于 memcpy
                positions: model.mesh.positions,
                normals: model.mesh.normals,
                texcoords: model.mesh.texcoords,
                indices: model.mesh.indices,
            })
            .collect();
        Ok(LoadData::Model(ModelData { meshes }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "# quad\no quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";

    #[test]
    fn test_sniff_obj_text() {
        assert!(ObjLoader.can_process(QUAD.as_bytes()));
        assert!(!ObjLoader.can_process(b"RIFF\x00\x00\x00\x00WAVE"));
        assert!(!ObjLoader.can_process(b"hello world"));
    }

    #[test]
    fn test_quad_is_triangulated() {
        let LoadData::Model(model) = ObjLoader.load_from_binary(QUAD.as_bytes(), &ModelConfig::default().into()).unwrap()
        else {
            panic!("expected model data");
        };
        assert_eq!(model.meshes.len(), 1);
        let mesh = &model.meshes[0];
        assert_eq!(mesh.name, "quad");
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.indices.len(), 6);
    }
}
