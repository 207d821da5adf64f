//! Owning collections of every entity kind.
//!
//! Collections are flat and have no holes: removing a slot compacts it and
//! returns the [`Compaction`] needed to renumber references into it. The store
//! itself does not rewrite references, that is the job of [`crate::graph`].

use std::path::{Path, PathBuf};

use log::warn;

use crate::error::GraphError;

use super::{
    entities::{Image, Material, Mesh, Node, Texture},
    ids::{Compaction, EntityId, EntityKind, EntityRef, ImageId, MaterialId, MeshId, NodeId, TextureId},
};

/// What to do with resources that live outside the graph when an entity is
/// removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposal {
    /// The entity is gone for good, delete its backing file.
    Delete,
    /// The entity was folded into an equal one that still needs the file.
    Merge,
}

#[derive(Clone, Debug, Default)]
pub struct EntityStore {
    images: Vec<Image>,
    textures: Vec<Texture>,
    materials: Vec<Material>,
    meshes: Vec<Mesh>,
    nodes: Vec<Node>,
    asset_root: Option<PathBuf>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folder relative image URIs resolve against. Without one, removing an
    /// image never touches the filesystem.
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }

    pub fn asset_root(&self) -> Option<&Path> {
        self.asset_root.as_deref()
    }

    pub fn push_image(&mut self, image: Image) -> ImageId {
        self.images.push(image);
        ImageId(self.images.len() - 1)
    }

    pub fn push_texture(&mut self, texture: Texture) -> TextureId {
        self.textures.push(texture);
        TextureId(self.textures.len() - 1)
    }

    pub fn push_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn push_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.push(mesh);
        MeshId(self.meshes.len() - 1)
    }

    pub fn push_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Image => self.images.len(),
            EntityKind::Texture => self.textures.len(),
            EntityKind::Material => self.materials.len(),
            EntityKind::Mesh => self.meshes.len(),
            EntityKind::Node => self.nodes.len(),
        }
    }

    pub fn contains(&self, entity: EntityRef) -> bool {
        entity.index() < self.count(entity.kind())
    }

    pub fn image(&self, id: ImageId) -> Option<&Image> {
        self.images.get(id.0)
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn image_mut(&mut self, id: ImageId) -> Option<&mut Image> {
        self.images.get_mut(id.0)
    }

    pub fn texture_mut(&mut self, id: TextureId) -> Option<&mut Texture> {
        self.textures.get_mut(id.0)
    }

    pub fn images(&self) -> impl Iterator<Item = (ImageId, &Image)> {
        self.images.iter().enumerate().map(|(i, image)| (ImageId(i), image))
    }

    pub fn textures(&self) -> impl Iterator<Item = (TextureId, &Texture)> {
        self.textures.iter().enumerate().map(|(i, texture)| (TextureId(i), texture))
    }

    pub fn materials(&self) -> impl Iterator<Item = (MaterialId, &Material)> {
        self.materials.iter().enumerate().map(|(i, material)| (MaterialId(i), material))
    }

    pub fn meshes(&self) -> impl Iterator<Item = (MeshId, &Mesh)> {
        self.meshes.iter().enumerate().map(|(i, mesh)| (MeshId(i), mesh))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    pub(crate) fn textures_mut(&mut self) -> impl Iterator<Item = &mut Texture> {
        self.textures.iter_mut()
    }

    pub(crate) fn materials_mut(&mut self) -> impl Iterator<Item = &mut Material> {
        self.materials.iter_mut()
    }

    pub(crate) fn meshes_mut(&mut self) -> impl Iterator<Item = &mut Mesh> {
        self.meshes.iter_mut()
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    /// Human readable name for log lines.
    pub fn display_name(&self, entity: EntityRef) -> String {
        let name = match entity {
            EntityRef::Image(id) => self.image(id).map(Image::display_name),
            EntityRef::Texture(id) => self.texture(id).map(Texture::display_name),
            EntityRef::Material(id) => self.material(id).map(Material::display_name),
            EntityRef::Mesh(id) => self.mesh(id).map(Mesh::display_name),
            EntityRef::Node(id) => self.node(id).and_then(|node| node.name.clone()),
        };
        name.unwrap_or_else(|| entity.to_string())
    }

    /// Deletes an entity and closes the gap it leaves.
    ///
    /// References into the collection are left as they were; the caller has
    /// to unlink the removed entity and apply the returned compaction.
    pub(crate) fn remove(&mut self, entity: EntityRef, disposal: Disposal) -> Result<Compaction, GraphError> {
        let slot = entity.index();
        match entity {
            EntityRef::Node(id) => return Err(GraphError::ReadOnly(id)),
            _ if !self.contains(entity) => return Err(GraphError::NotLive(entity)),
            EntityRef::Image(_) => {
                let image = self.images.remove(slot);
                if disposal == Disposal::Delete {
                    self.delete_backing_file(&image);
                }
            }
            EntityRef::Texture(_) => {
                self.textures.remove(slot);
            }
            EntityRef::Material(_) => {
                self.materials.remove(slot);
            }
            EntityRef::Mesh(_) => {
                self.meshes.remove(slot);
            }
        }
        Ok(Compaction {
            kind: entity.kind(),
            slot,
        })
    }

    fn delete_backing_file(&self, image: &Image) {
        let (Some(root), Some(uri)) = (self.asset_root.as_deref(), image.file_uri()) else {
            return;
        };
        // Another record may still point at the same file until duplicates are merged
        if self.images.iter().any(|other| other.uri.as_deref() == Some(uri)) {
            return;
        }
        let path = resolve_uri(root, uri);
        match std::fs::remove_file(&path) {
            Ok(()) => warn!("Deleted image file: {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to delete image file '{}': {err}", path.display()),
        }
    }

    /// Checks that every reference names a live entity of the right kind.
    pub fn check_integrity(&self) -> Result<(), GraphError> {
        fn check<I: EntityId>(store: &EntityStore, referrer: EntityRef, target: I) -> Result<(), GraphError> {
            if store.contains(target.entity()) {
                Ok(())
            } else {
                Err(GraphError::Dangling {
                    referrer,
                    target: target.entity(),
                })
            }
        }
        for (id, texture) in self.textures() {
            for image in texture.image_refs() {
                check(self, EntityRef::Texture(id), image)?;
            }
        }
        for (id, material) in self.materials() {
            for texture in material.texture_refs() {
                check(self, EntityRef::Material(id), texture)?;
            }
        }
        for (id, mesh) in self.meshes() {
            for material in mesh.material_refs() {
                check(self, EntityRef::Mesh(id), material)?;
            }
        }
        for (id, node) in self.nodes() {
            if let Some(mesh) = node.mesh {
                check(self, EntityRef::Node(id), mesh)?;
            }
        }
        Ok(())
    }
}

/// Filesystem location of a relative image URI. Percent escapes are decoded,
/// malformed ones are taken literally.
pub fn resolve_uri(root: &Path, uri: &str) -> PathBuf {
    match urlencoding::decode(uri) {
        Ok(decoded) => root.join(decoded.as_ref()),
        Err(_) => root.join(uri),
    }
}
