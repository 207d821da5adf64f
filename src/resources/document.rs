//! Reading and writing glTF documents.
//!
//! A [`Document`] keeps the JSON tree of a `.gltf` or `.glb` file. The
//! entity collections the optimiser works on are moved out of the tree into
//! an [`EntityStore`] with [`Document::take_entities`] and put back with
//! [`Document::put_entities`]. Every other field of the document, and every
//! field of an entity the store does not model, is written back untouched.

use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use gltf::binary::{Glb, Header};
use log::debug;
use serde_json::{Map, Value};

use crate::{
    data_structures::{
        entities::{AlternateSource, Body, Image, Material, Mesh, Node, Primitive, Texture, TextureSlot},
        ids::{ImageId, MaterialId, MeshId, TextureId},
        slots::SlotKind,
        store::EntityStore,
    },
    error::DocumentError,
};

pub const KHR_TEXTURE_BASISU: &str = "KHR_texture_basisu";
pub const KHR_MATERIALS_VARIANTS: &str = "KHR_materials_variants";
pub const KHR_DRACO_MESH_COMPRESSION: &str = "KHR_draco_mesh_compression";
pub const EXT_MESH_GPU_INSTANCING: &str = "EXT_mesh_gpu_instancing";

const GLB_MAGIC: &[u8; 4] = b"glTF";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
    Json,
    Glb,
}

#[derive(Clone, Debug)]
pub struct Document {
    root: Map<String, Value>,
    container: Container,
    bin: Option<Vec<u8>>,
    asset_folder: PathBuf,
}

/// Number of entries of every collection an entity can point into.
struct Bounds {
    images: usize,
    textures: usize,
    materials: usize,
    meshes: usize,
    samplers: usize,
    buffer_views: usize,
}

fn count(root: &Map<String, Value>, key: &str) -> usize {
    root.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}

fn take_objects(root: &mut Map<String, Value>, key: &str) -> Result<Vec<Body>, DocumentError> {
    match root.remove(key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(object) => Ok(object),
                _ => Err(DocumentError::Invalid(format!("{key}[{i}] is not an object"))),
            })
            .collect(),
        Some(_) => Err(DocumentError::Invalid(format!("{key} is not an array"))),
    }
}

fn put_objects(root: &mut Map<String, Value>, key: &str, objects: Vec<Value>) {
    if objects.is_empty() {
        root.remove(key);
    } else {
        root.insert(key.to_string(), Value::Array(objects));
    }
}

fn take_string(body: &mut Body, key: &str) -> Option<String> {
    match body.remove(key) {
        Some(Value::String(value)) => Some(value),
        Some(other) => {
            body.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

fn put_string(body: &mut Body, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        body.insert(key.to_string(), Value::String(value.clone()));
    }
}

/// Removes an index field, failing if it does not name one of `bound`
/// entries.
fn take_index(body: &mut Body, key: &str, bound: usize, context: &str) -> Result<Option<usize>, DocumentError> {
    let Some(value) = body.remove(key) else {
        return Ok(None);
    };
    value
        .as_u64()
        .and_then(|index| usize::try_from(index).ok())
        .filter(|&index| index < bound)
        .map(Some)
        .ok_or_else(|| DocumentError::Invalid(format!("{context}.{key} = {value} is out of range")))
}

fn put_index(body: &mut Body, key: &str, index: Option<usize>) {
    if let Some(index) = index {
        body.insert(key.to_string(), Value::from(index));
    }
}

fn remove_if_empty(body: &mut Body, key: &str) {
    if body.get(key).and_then(Value::as_object).is_some_and(Map::is_empty) {
        body.remove(key);
    }
}

/// Points `extensions.<extension>.source` at `image`, or drops the extension
/// object when there is no image left.
fn put_extension_source(body: &mut Body, extension: &str, image: Option<ImageId>) {
    match image {
        Some(image) => {
            let extensions = body
                .entry("extensions")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(extensions) = extensions {
                let object = extensions
                    .entry(extension)
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(object) = object {
                    object.insert("source".to_string(), Value::from(image.0));
                }
            }
        }
        None => {
            if let Some(Value::Object(extensions)) = body.get_mut("extensions") {
                extensions.remove(extension);
            }
        }
    }
    remove_if_empty(body, "extensions");
}

fn take_slot(body: &mut Body, path: &[&str], bound: usize, context: &str) -> Result<Option<TextureId>, DocumentError> {
    let Some((info, parents)) = path.split_last() else {
        return Ok(None);
    };
    let mut object = body;
    for key in parents {
        object = match object.get_mut(*key) {
            Some(Value::Object(next)) => next,
            _ => return Ok(None),
        };
    }
    match object.get_mut(*info) {
        Some(Value::Object(info)) => Ok(take_index(info, "index", bound, context)?.map(TextureId)),
        _ => Ok(None),
    }
}

/// Writes a slot reference back, creating the path if needed. An unbound slot
/// loses its texture-info object altogether.
fn put_slot(body: &mut Body, path: &[&str], texture: Option<TextureId>) {
    let Some((info, parents)) = path.split_last() else {
        return;
    };
    let mut object = body;
    for key in parents {
        let next = match texture {
            Some(_) => Some(object.entry(*key).or_insert_with(|| Value::Object(Map::new()))),
            None => object.get_mut(*key),
        };
        object = match next {
            Some(Value::Object(next)) => next,
            _ => return,
        };
    }
    match texture {
        Some(texture) => {
            let info = object
                .entry(*info)
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(info) = info {
                info.insert("index".to_string(), Value::from(texture.0));
            }
        }
        None => {
            object.remove(*info);
        }
    }
}

fn string_list<'a>(root: &'a Map<String, Value>, key: &str) -> impl Iterator<Item = &'a str> {
    root.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

fn set_listed(root: &mut Map<String, Value>, key: &str, name: &str, listed: bool) {
    let present = string_list(root, key).any(|entry| entry == name);
    if listed && !present {
        let list = root
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = list {
            list.push(Value::String(name.to_string()));
        }
    } else if !listed && present {
        if let Some(Value::Array(list)) = root.get_mut(key) {
            list.retain(|entry| entry.as_str() != Some(name));
        }
    }
    if root.get(key).and_then(Value::as_array).is_some_and(Vec::is_empty) {
        root.remove(key);
    }
}

impl Document {
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let bytes = std::fs::read(path).map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let folder = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&bytes, folder)
    }

    /// Parses a `.gltf` or `.glb` file. Relative URIs resolve against
    /// `asset_folder`.
    pub fn parse(bytes: &[u8], asset_folder: impl Into<PathBuf>) -> Result<Self, DocumentError> {
        let (container, json, bin) = if bytes.starts_with(GLB_MAGIC) {
            let glb = Glb::from_slice(bytes).map_err(|err| DocumentError::Glb(err.to_string()))?;
            (Container::Glb, glb.json.into_owned(), glb.bin.map(Cow::into_owned))
        } else {
            (Container::Json, bytes.to_vec(), None)
        };

        let root = match serde_json::from_slice(&json)? {
            Value::Object(root) => root,
            _ => return Err(DocumentError::Invalid("document root is not an object".to_string())),
        };
        let document = Self {
            root,
            container,
            bin,
            asset_folder: asset_folder.into(),
        };
        document.check_asset()?;
        document.check_required_extensions()?;
        Ok(document)
    }

    fn check_asset(&self) -> Result<(), DocumentError> {
        let asset = self
            .root
            .get("asset")
            .ok_or_else(|| DocumentError::Invalid("missing asset".to_string()))?;
        let asset: gltf::json::Asset = serde_json::from_value(asset.clone())?;
        match asset.version.split('.').next() {
            Some("2") => Ok(()),
            Some("0" | "1") => Err(DocumentError::Legacy(asset.version)),
            _ => Err(DocumentError::Invalid(format!("unknown asset version {}", asset.version))),
        }
    }

    fn check_required_extensions(&self) -> Result<(), DocumentError> {
        if self.requires_extension(KHR_DRACO_MESH_COMPRESSION) {
            return Err(DocumentError::Unsupported {
                feature: "Draco mesh compression",
                extension: KHR_DRACO_MESH_COMPRESSION,
            });
        }
        if self.requires_extension(EXT_MESH_GPU_INSTANCING) {
            return Err(DocumentError::Unsupported {
                feature: "Mesh instancing",
                extension: EXT_MESH_GPU_INSTANCING,
            });
        }
        Ok(())
    }

    pub fn container(&self) -> Container {
        self.container
    }

    pub fn asset_folder(&self) -> &Path {
        &self.asset_folder
    }

    pub fn root(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn requires_extension(&self, name: &str) -> bool {
        string_list(&self.root, "extensionsRequired").any(|entry| entry == name)
    }

    pub fn generator(&self) -> Option<&str> {
        self.root
            .get("asset")
            .and_then(|asset| asset.get("generator"))
            .and_then(Value::as_str)
    }

    pub fn set_generator(&mut self, generator: &str) {
        if let Some(Value::Object(asset)) = self.root.get_mut("asset") {
            asset.insert("generator".to_string(), Value::String(generator.to_string()));
        }
    }

    /// Moves images, textures, materials, meshes and nodes out of the
    /// document. Every index between them is range checked.
    pub fn take_entities(&mut self) -> Result<EntityStore, DocumentError> {
        let bounds = Bounds {
            images: count(&self.root, "images"),
            textures: count(&self.root, "textures"),
            materials: count(&self.root, "materials"),
            meshes: count(&self.root, "meshes"),
            samplers: count(&self.root, "samplers"),
            buffer_views: count(&self.root, "bufferViews"),
        };
        let mut store = EntityStore::new().with_asset_root(&self.asset_folder);

        for (i, mut body) in take_objects(&mut self.root, "images")?.into_iter().enumerate() {
            let context = format!("images[{i}]");
            store.push_image(Image {
                name: take_string(&mut body, "name"),
                uri: take_string(&mut body, "uri"),
                buffer_view: take_index(&mut body, "bufferView", bounds.buffer_views, &context)?,
                mime_type: take_string(&mut body, "mimeType"),
                body,
            });
        }

        for (i, mut body) in take_objects(&mut self.root, "textures")?.into_iter().enumerate() {
            let context = format!("textures[{i}]");
            let name = take_string(&mut body, "name");
            let source = take_index(&mut body, "source", bounds.images, &context)?.map(ImageId);
            let sampler = take_index(&mut body, "sampler", bounds.samplers, &context)?;
            let mut compressed = None;
            let mut alternates = Vec::new();
            if let Some(Value::Object(extensions)) = body.get_mut("extensions") {
                for (extension, object) in extensions.iter_mut() {
                    let Value::Object(object) = object else {
                        continue;
                    };
                    let context = format!("{context}.extensions.{extension}");
                    let Some(image) = take_index(object, "source", bounds.images, &context)? else {
                        continue;
                    };
                    if extension == KHR_TEXTURE_BASISU {
                        compressed = Some(ImageId(image));
                    } else {
                        alternates.push(AlternateSource {
                            extension: extension.clone(),
                            image: Some(ImageId(image)),
                        });
                    }
                }
            }
            store.push_texture(Texture {
                name,
                source,
                compressed,
                alternates,
                sampler,
                body,
                converted: false,
            });
        }

        for (i, mut body) in take_objects(&mut self.root, "materials")?.into_iter().enumerate() {
            let name = take_string(&mut body, "name");
            let mut slots = Vec::new();
            for kind in SlotKind::ALL {
                let context = format!("materials[{i}].{}", kind.path().join("."));
                if let Some(texture) = take_slot(&mut body, kind.path(), bounds.textures, &context)? {
                    slots.push(TextureSlot {
                        kind,
                        texture: Some(texture),
                    });
                }
            }
            store.push_material(Material { name, slots, body });
        }

        for (i, mut body) in take_objects(&mut self.root, "meshes")?.into_iter().enumerate() {
            let name = take_string(&mut body, "name");
            let mut primitives = Vec::new();
            for (j, mut primitive) in take_objects(&mut body, "primitives")?.into_iter().enumerate() {
                let context = format!("meshes[{i}].primitives[{j}]");
                let material = take_index(&mut primitive, "material", bounds.materials, &context)?.map(MaterialId);
                let mut variants = Vec::new();
                let mappings = primitive
                    .get_mut("extensions")
                    .and_then(|extensions| extensions.get_mut(KHR_MATERIALS_VARIANTS))
                    .and_then(|variants| variants.get_mut("mappings"))
                    .and_then(Value::as_array_mut);
                for (k, mapping) in mappings.into_iter().flatten().enumerate() {
                    let context = format!("{context}.extensions.{KHR_MATERIALS_VARIANTS}.mappings[{k}]");
                    let Value::Object(mapping) = mapping else {
                        return Err(DocumentError::Invalid(format!("{context} is not an object")));
                    };
                    variants.push(take_index(mapping, "material", bounds.materials, &context)?.map(MaterialId));
                }
                primitives.push(Primitive {
                    material,
                    variants,
                    body: primitive,
                });
            }
            store.push_mesh(Mesh { name, primitives, body });
        }

        for (i, mut body) in take_objects(&mut self.root, "nodes")?.into_iter().enumerate() {
            let context = format!("nodes[{i}]");
            store.push_node(Node {
                name: take_string(&mut body, "name"),
                mesh: take_index(&mut body, "mesh", bounds.meshes, &context)?.map(MeshId),
                body,
            });
        }

        debug!(
            "Loaded {} images, {} textures, {} materials, {} meshes",
            bounds.images, bounds.textures, bounds.materials, bounds.meshes
        );
        Ok(store)
    }

    /// Writes the entities of `store` back into the document and updates the
    /// extension lists to match. Fails if `store` holds a dangling reference.
    pub fn put_entities(&mut self, store: &EntityStore) -> Result<(), DocumentError> {
        store.check_integrity()?;

        let images = store
            .images()
            .map(|(_, image)| {
                let mut body = image.body.clone();
                put_string(&mut body, "name", &image.name);
                put_string(&mut body, "uri", &image.uri);
                put_index(&mut body, "bufferView", image.buffer_view);
                put_string(&mut body, "mimeType", &image.mime_type);
                Value::Object(body)
            })
            .collect();
        put_objects(&mut self.root, "images", images);

        let textures = store
            .textures()
            .map(|(_, texture)| {
                let mut body = texture.body.clone();
                put_string(&mut body, "name", &texture.name);
                put_index(&mut body, "source", texture.source.map(|image| image.0));
                put_index(&mut body, "sampler", texture.sampler);
                put_extension_source(&mut body, KHR_TEXTURE_BASISU, texture.compressed);
                for alternate in &texture.alternates {
                    put_extension_source(&mut body, &alternate.extension, alternate.image);
                }
                Value::Object(body)
            })
            .collect();
        put_objects(&mut self.root, "textures", textures);

        let materials = store
            .materials()
            .map(|(_, material)| {
                let mut body = material.body.clone();
                put_string(&mut body, "name", &material.name);
                for slot in &material.slots {
                    put_slot(&mut body, slot.kind.path(), slot.texture);
                }
                Value::Object(body)
            })
            .collect();
        put_objects(&mut self.root, "materials", materials);

        let meshes = store
            .meshes()
            .map(|(_, mesh)| {
                let mut body = mesh.body.clone();
                put_string(&mut body, "name", &mesh.name);
                let primitives = mesh.primitives.iter().map(put_primitive).collect();
                body.insert("primitives".to_string(), Value::Array(primitives));
                Value::Object(body)
            })
            .collect();
        put_objects(&mut self.root, "meshes", meshes);

        let nodes = store
            .nodes()
            .map(|(_, node)| {
                let mut body = node.body.clone();
                put_string(&mut body, "name", &node.name);
                put_index(&mut body, "mesh", node.mesh.map(|mesh| mesh.0));
                Value::Object(body)
            })
            .collect();
        put_objects(&mut self.root, "nodes", nodes);

        let compressed = store.textures().any(|(_, texture)| texture.compressed.is_some());
        let without_fallback = store
            .textures()
            .any(|(_, texture)| texture.compressed.is_some() && texture.source.is_none());
        set_listed(&mut self.root, "extensionsUsed", KHR_TEXTURE_BASISU, compressed);
        set_listed(&mut self.root, "extensionsRequired", KHR_TEXTURE_BASISU, without_fallback);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        match self.container {
            Container::Json => Ok(serde_json::to_vec_pretty(&self.root)?),
            Container::Glb => {
                let json = serde_json::to_vec(&self.root)?;
                let glb = Glb {
                    header: Header {
                        magic: *GLB_MAGIC,
                        version: 2,
                        // Recomputed on write
                        length: 0,
                    },
                    json: Cow::Owned(json),
                    bin: self.bin.as_deref().map(Cow::Borrowed),
                };
                glb.to_vec().map_err(|err| DocumentError::Glb(err.to_string()))
            }
        }
    }

    /// Writes the document in the container it was read from.
    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|source| DocumentError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn put_primitive(primitive: &Primitive) -> Value {
    let mut body = primitive.body.clone();
    put_index(&mut body, "material", primitive.material.map(|material| material.0));
    let mappings = body
        .get_mut("extensions")
        .and_then(|extensions| extensions.get_mut(KHR_MATERIALS_VARIANTS))
        .and_then(|variants| variants.get_mut("mappings"))
        .and_then(Value::as_array_mut);
    if let Some(mappings) = mappings {
        let mut materials = primitive.variants.iter();
        // Mappings whose material was removed are dropped
        mappings.retain_mut(|mapping| match (materials.next(), mapping.as_object_mut()) {
            (Some(Some(material)), Some(mapping)) => {
                mapping.insert("material".to_string(), Value::from(material.0));
                true
            }
            _ => false,
        });
        if mappings.is_empty() {
            if let Some(Value::Object(extensions)) = body.get_mut("extensions") {
                extensions.remove(KHR_MATERIALS_VARIANTS);
            }
            remove_if_empty(&mut body, "extensions");
        }
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "asset": {"version": "2.0"},
        "images": [{"uri": "a%20b.png", "name": "albedo"}],
        "samplers": [{}],
        "textures": [{"source": 0, "sampler": 0, "extensions": {"KHR_texture_basisu": {"source": 0}}}],
        "materials": [{
            "name": "paint",
            "pbrMetallicRoughness": {"baseColorTexture": {"index": 0, "texCoord": 1}, "roughnessFactor": 0.5}
        }],
        "meshes": [{"primitives": [{"attributes": {"POSITION": 0}, "material": 0}]}],
        "nodes": [{"mesh": 0, "name": "root"}]
    }"#;

    #[test]
    fn extracts_typed_references() {
        let mut document = Document::parse(MINIMAL.as_bytes(), "assets").unwrap();
        let store = document.take_entities().unwrap();
        let texture = store.texture(TextureId(0)).unwrap();
        assert_eq!(texture.source, Some(ImageId(0)));
        assert_eq!(texture.compressed, Some(ImageId(0)));
        assert_eq!(texture.sampler, Some(0));
        let material = store.material(MaterialId(0)).unwrap();
        assert_eq!(material.texture(SlotKind::BaseColor), Some(TextureId(0)));
        assert_eq!(store.node(crate::data_structures::ids::NodeId(0)).unwrap().mesh, Some(MeshId(0)));
        assert!(!document.root().contains_key("images"));
    }

    #[test]
    fn round_trip_keeps_unknown_fields() {
        let mut document = Document::parse(MINIMAL.as_bytes(), "assets").unwrap();
        let store = document.take_entities().unwrap();
        document.put_entities(&store).unwrap();
        let root = document.root();
        let info = &root["materials"][0]["pbrMetallicRoughness"]["baseColorTexture"];
        assert_eq!(info["index"], 0);
        assert_eq!(info["texCoord"], 1);
        assert_eq!(root["materials"][0]["pbrMetallicRoughness"]["roughnessFactor"], 0.5);
        assert_eq!(root["meshes"][0]["primitives"][0]["attributes"]["POSITION"], 0);
        assert_eq!(root["textures"][0]["extensions"][KHR_TEXTURE_BASISU]["source"], 0);
        assert_eq!(root["extensionsUsed"][0], KHR_TEXTURE_BASISU);
        assert!(root.get("extensionsRequired").is_none());
    }

    #[test]
    fn dangling_index_is_rejected() {
        let json = r#"{"asset": {"version": "2.0"}, "textures": [{"source": 3}]}"#;
        let mut document = Document::parse(json.as_bytes(), ".").unwrap();
        assert!(matches!(document.take_entities(), Err(DocumentError::Invalid(_))));
    }

    #[test]
    fn legacy_and_unsupported_documents_are_rejected() {
        let legacy = r#"{"asset": {"version": "1.0"}}"#;
        assert!(matches!(Document::parse(legacy.as_bytes(), "."), Err(DocumentError::Legacy(_))));

        let draco = r#"{"asset": {"version": "2.0"}, "extensionsRequired": ["KHR_draco_mesh_compression"]}"#;
        assert!(matches!(
            Document::parse(draco.as_bytes(), "."),
            Err(DocumentError::Unsupported {
                extension: KHR_DRACO_MESH_COMPRESSION,
                ..
            })
        ));
    }

    #[test]
    fn empty_collections_are_omitted() {
        let mut document = Document::parse(MINIMAL.as_bytes(), ".").unwrap();
        document.take_entities().unwrap();
        document.put_entities(&EntityStore::new()).unwrap();
        for key in ["images", "textures", "materials", "meshes", "nodes", "extensionsUsed"] {
            assert!(!document.root().contains_key(key), "{key}");
        }
        assert!(document.root().contains_key("samplers"));
    }

    #[test]
    fn glb_round_trip() {
        let json = br#"{"asset":{"version":"2.0"},"buffers":[{"byteLength":4}]}"#;
        let glb = Glb {
            header: Header {
                magic: *GLB_MAGIC,
                version: 2,
                length: 0,
            },
            json: Cow::Borrowed(json),
            bin: Some(Cow::Borrowed(&[1, 2, 3, 4])),
        }
        .to_vec()
        .unwrap();
        let document = Document::parse(&glb, ".").unwrap();
        assert_eq!(document.container(), Container::Glb);
        let reparsed = Document::parse(&document.to_bytes().unwrap(), ".").unwrap();
        assert_eq!(reparsed.bin.as_deref(), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(reparsed.root()["buffers"][0]["byteLength"], 4);
    }
}
