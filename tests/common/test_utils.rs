#![allow(dead_code)]

use std::{
    path::Path,
    sync::{Mutex, Once},
    thread::{self, ThreadId},
};

use gltf_squash::{
    data_structures::{
        entities::{Image, Material, Mesh, Node, Texture},
        ids::{ImageId, MaterialId, MeshId, NodeId, TextureId},
        slots::SlotKind,
        store::EntityStore,
    },
    error::ConvertError,
    resources::{
        ktx2::{BlockEncoder, Uncompressed, VkFormat},
        texture::Raster,
    },
};
use image::{GrayAlphaImage, LumaA, Rgba, RgbaImage};
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde_json::Value;

/// Builds entity stores for graph tests. Every entity gets a unique name so
/// tests can follow it through compactions.
pub struct SceneBuilder {
    store: EntityStore,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self {
            store: EntityStore::new(),
        }
    }

    pub fn in_folder(folder: &Path) -> Self {
        Self {
            store: EntityStore::new().with_asset_root(folder),
        }
    }

    pub fn image(&mut self, uri: &str) -> ImageId {
        let name = format!("image{}", self.store.images().count());
        self.store.push_image(Image {
            name: Some(name),
            ..Image::from_uri(uri)
        })
    }

    pub fn image_without_source(&mut self) -> ImageId {
        let name = format!("image{}", self.store.images().count());
        self.store.push_image(Image {
            name: Some(name),
            ..Default::default()
        })
    }

    pub fn texture(&mut self, image: ImageId) -> TextureId {
        let name = format!("texture{}", self.store.textures().count());
        self.store.push_texture(Texture {
            name: Some(name),
            ..Texture::from_source(image)
        })
    }

    pub fn texture_with_sampler(&mut self, image: ImageId, sampler: usize) -> TextureId {
        let id = self.texture(image);
        if let Some(texture) = self.store.texture_mut(id) {
            texture.sampler = Some(sampler);
        }
        id
    }

    pub fn material(&mut self, slots: &[(SlotKind, TextureId)]) -> MaterialId {
        let name = format!("material{}", self.store.materials().count());
        self.store.push_material(Material {
            name: Some(name),
            ..Material::with_slots(slots)
        })
    }

    pub fn mesh(&mut self, materials: &[MaterialId]) -> MeshId {
        let name = format!("mesh{}", self.store.meshes().count());
        let materials: Vec<_> = materials.iter().copied().map(Some).collect();
        self.store.push_mesh(Mesh {
            name: Some(name),
            ..Mesh::with_materials(&materials)
        })
    }

    pub fn empty_mesh(&mut self) -> MeshId {
        self.mesh(&[])
    }

    pub fn node(&mut self, mesh: Option<MeshId>) -> NodeId {
        let name = format!("node{}", self.store.nodes().count());
        self.store.push_node(Node {
            name: Some(name),
            ..Node::with_mesh(mesh)
        })
    }

    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn build(self) -> EntityStore {
        self.store
    }
}

pub fn names<'a, T: 'a>(items: impl Iterator<Item = (impl Sized, &'a T)>, name: impl Fn(&T) -> Option<&str>) -> Vec<String> {
    items
        .map(|(_, item)| name(item).unwrap_or_default().to_string())
        .collect()
}

pub fn image_names(store: &EntityStore) -> Vec<String> {
    names(store.images(), |image| image.name.as_deref())
}

pub fn texture_names(store: &EntityStore) -> Vec<String> {
    names(store.textures(), |texture| texture.name.as_deref())
}

pub fn material_names(store: &EntityStore) -> Vec<String> {
    names(store.materials(), |material| material.name.as_deref())
}

pub fn mesh_names(store: &EntityStore) -> Vec<String> {
    names(store.meshes(), |mesh| mesh.name.as_deref())
}

/// An RGBA gradient that is different in every channel.
pub fn write_gradient_png(path: &Path, width: u32, height: u32) {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 255 / width) as u8, (y * 255 / height) as u8, ((x + y) % 256) as u8, 255])
    })
    .save(path)
    .unwrap();
}

/// Tangent space normals slightly off unit length.
pub fn write_normal_png(path: &Path, width: u32, height: u32) {
    RgbaImage::from_fn(width, height, |x, _| Rgba([128 + (x % 8) as u8 * 4, 128, 200, 255]))
        .save(path)
        .unwrap();
}

/// Two channel metallic/roughness map whose roughness is constant.
pub fn write_flat_roughness_png(path: &Path, width: u32, height: u32) {
    GrayAlphaImage::from_fn(width, height, |x, y| LumaA([((x + y) * 16 % 256) as u8, 77]))
        .save(path)
        .unwrap();
}

/// A scene with one node, one mesh and one material sampling `albedo.png`
/// as base colour and `normal.png` as normal map.
pub fn two_texture_scene() -> Value {
    serde_json::json!({
        "asset": {"version": "2.0", "generator": "test"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"mesh": 0, "name": "root"}],
        "meshes": [{"name": "quad", "primitives": [{"attributes": {"POSITION": 0}, "material": 0}]}],
        "accessors": [{"count": 4, "componentType": 5126, "type": "VEC3"}],
        "materials": [{
            "name": "painted",
            "pbrMetallicRoughness": {"baseColorTexture": {"index": 0}, "metallicFactor": 0.0},
            "normalTexture": {"index": 1, "scale": 1.0}
        }],
        "textures": [{"source": 0}, {"source": 1}],
        "images": [{"uri": "albedo.png"}, {"uri": "normal.png"}]
    })
}

pub fn write_document(path: &Path, document: &Value) {
    std::fs::write(path, serde_json::to_vec_pretty(document).unwrap()).unwrap();
}

pub fn read_document(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

/// vkFormat field of a KTX2 file.
pub fn ktx2_format(path: &Path) -> u32 {
    let bytes = std::fs::read(path).unwrap();
    u32::from_le_bytes(bytes[12..16].try_into().unwrap())
}

/// Supercompression scheme field of a KTX2 file.
pub fn ktx2_supercompression(path: &Path) -> u32 {
    let bytes = std::fs::read(path).unwrap();
    u32::from_le_bytes(bytes[44..48].try_into().unwrap())
}

/// Stores raw texels like [`Uncompressed`] but reports them as Basis data,
/// so the document side of the texture pass can run without a Basis encoder.
pub struct BasisLabelled;

impl BlockEncoder for BasisLabelled {
    fn name(&self) -> &str {
        "basis-labelled"
    }

    fn format(&self, channels: u8, srgb: bool) -> Option<VkFormat> {
        Uncompressed.format(channels, srgb)
    }

    fn encode(&self, level: &Raster, normal_map: bool) -> Result<Vec<u8>, ConvertError> {
        Uncompressed.encode(level, normal_map)
    }

    fn is_basis(&self) -> bool {
        true
    }
}

static RECORDS: Mutex<Vec<(ThreadId, Level, String)>> = Mutex::new(Vec::new());

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let entry = (thread::current().id(), record.level(), record.args().to_string());
        RECORDS.lock().unwrap().push(entry);
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

/// Starts recording log lines of the calling thread, dropping earlier ones.
pub fn capture_logs() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(LevelFilter::Debug);
    });
    let current = thread::current().id();
    RECORDS.lock().unwrap().retain(|(thread, _, _)| *thread != current);
}

/// Lines logged at `level` by the calling thread since [`capture_logs`].
pub fn captured(level: Level) -> Vec<String> {
    let current = thread::current().id();
    RECORDS
        .lock()
        .unwrap()
        .iter()
        .filter(|(thread, record_level, _)| *thread == current && *record_level == level)
        .map(|(_, _, line)| line.clone())
        .collect()
}
