//! Cross references between entity kinds.
//!
//! The edges are fixed: nodes reference meshes, mesh primitives reference
//! materials, material slots reference textures and textures reference
//! images. Everything here walks the flat collections of an [`EntityStore`];
//! no reverse index is kept, so the answers are always current.

use crate::data_structures::{
    ids::{Compaction, EntityRef, ImageId, MaterialId, MeshId, NodeId, TextureId},
    store::EntityStore,
};

/// Every entity holding a reference to `target`, lazily.
pub fn referrers(store: &EntityStore, target: EntityRef) -> Box<dyn Iterator<Item = EntityRef> + '_> {
    match target {
        EntityRef::Image(image) => Box::new(
            store
                .textures()
                .filter(move |(_, texture)| texture.image_refs().any(|r| r == image))
                .map(|(id, _)| EntityRef::Texture(id)),
        ),
        EntityRef::Texture(texture) => Box::new(
            store
                .materials()
                .filter(move |(_, material)| material.texture_refs().any(|r| r == texture))
                .map(|(id, _)| EntityRef::Material(id)),
        ),
        EntityRef::Material(material) => Box::new(
            store
                .meshes()
                .filter(move |(_, mesh)| mesh.material_refs().any(|r| r == material))
                .map(|(id, _)| EntityRef::Mesh(id)),
        ),
        EntityRef::Mesh(mesh) => Box::new(
            store
                .nodes()
                .filter(move |(_, node)| node.mesh == Some(mesh))
                .map(|(id, _)| EntityRef::Node(id)),
        ),
        EntityRef::Node(_) => Box::new(std::iter::empty()),
    }
}

pub fn is_referenced(store: &EntityStore, target: EntityRef) -> bool {
    referrers(store, target).next().is_some()
}

/// Entities directly referenced by `entity`, highest identity first and
/// without repeats.
pub fn children(store: &EntityStore, entity: EntityRef) -> Vec<EntityRef> {
    let mut children: Vec<EntityRef> = match entity {
        EntityRef::Image(_) => Vec::new(),
        EntityRef::Texture(id) => store
            .texture(id)
            .map(|texture| texture.image_refs().map(EntityRef::Image).collect())
            .unwrap_or_default(),
        EntityRef::Material(id) => store
            .material(id)
            .map(|material| material.texture_refs().map(EntityRef::Texture).collect())
            .unwrap_or_default(),
        EntityRef::Mesh(id) => store
            .mesh(id)
            .map(|mesh| mesh.material_refs().map(EntityRef::Material).collect())
            .unwrap_or_default(),
        EntityRef::Node(id) => store
            .node(id)
            .and_then(|node| node.mesh)
            .map(|mesh| vec![EntityRef::Mesh(mesh)])
            .unwrap_or_default(),
    };
    children.sort_unstable_by(|a, b| b.cmp(a));
    children.dedup();
    children
}

/// Points every reference to `old` at `new` instead, or clears it when `new`
/// is `None`. A replacement of a different kind is ignored.
///
/// Returns the referrers that were touched, in ascending order.
pub fn rewrite_reference(store: &mut EntityStore, old: EntityRef, new: Option<EntityRef>) -> Vec<EntityRef> {
    let mut touched = Vec::new();
    match old {
        EntityRef::Image(old) => {
            let new = match new {
                None => None,
                Some(EntityRef::Image(new)) => Some(new),
                Some(_) => return touched,
            };
            for (i, texture) in store.textures_mut().enumerate() {
                let mut hit = false;
                for reference in texture.image_refs_mut() {
                    if *reference == Some(old) {
                        *reference = new;
                        hit = true;
                    }
                }
                if hit {
                    touched.push(EntityRef::Texture(TextureId(i)));
                }
            }
        }
        EntityRef::Texture(old) => {
            let new = match new {
                None => None,
                Some(EntityRef::Texture(new)) => Some(new),
                Some(_) => return touched,
            };
            for (i, material) in store.materials_mut().enumerate() {
                let mut hit = false;
                material.for_each_slot_mut(|_, _, reference| {
                    if *reference == Some(old) {
                        *reference = new;
                        hit = true;
                    }
                });
                if hit {
                    touched.push(EntityRef::Material(MaterialId(i)));
                }
            }
        }
        EntityRef::Material(old) => {
            let new = match new {
                None => None,
                Some(EntityRef::Material(new)) => Some(new),
                Some(_) => return touched,
            };
            for (i, mesh) in store.meshes_mut().enumerate() {
                let mut hit = false;
                for reference in mesh.primitives.iter_mut().flat_map(|p| p.material_refs_mut()) {
                    if *reference == Some(old) {
                        *reference = new;
                        hit = true;
                    }
                }
                if hit {
                    touched.push(EntityRef::Mesh(MeshId(i)));
                }
            }
        }
        EntityRef::Mesh(old) => {
            let new = match new {
                None => None,
                Some(EntityRef::Mesh(new)) => Some(new),
                Some(_) => return touched,
            };
            for (i, node) in store.nodes_mut().enumerate() {
                if node.mesh == Some(old) {
                    node.mesh = new;
                    touched.push(EntityRef::Node(NodeId(i)));
                }
            }
        }
        EntityRef::Node(_) => {}
    }
    touched
}

/// Shifts every reference into the compacted collection to its new slot.
pub fn apply_compaction(store: &mut EntityStore, compaction: &Compaction) {
    for texture in store.textures_mut() {
        for reference in texture.image_refs_mut() {
            compaction.apply::<ImageId>(reference);
        }
    }
    for material in store.materials_mut() {
        material.for_each_slot_mut(|_, _, reference| compaction.apply::<TextureId>(reference));
    }
    for mesh in store.meshes_mut() {
        for reference in mesh.primitives.iter_mut().flat_map(|p| p.material_refs_mut()) {
            compaction.apply::<MaterialId>(reference);
        }
    }
    for node in store.nodes_mut() {
        compaction.apply::<MeshId>(&mut node.mesh);
    }
}

/// Whether an entity is still usable on its own. Only textures can lose
/// validity through a removal elsewhere, by losing their last image.
pub fn is_valid(store: &EntityStore, entity: EntityRef) -> bool {
    match entity {
        EntityRef::Image(id) => store.image(id).is_some_and(|image| image.has_source()),
        EntityRef::Texture(id) => store.texture(id).is_some_and(|texture| texture.is_valid()),
        EntityRef::Mesh(id) => store.mesh(id).is_some_and(|mesh| mesh.is_valid()),
        EntityRef::Material(_) | EntityRef::Node(_) => store.contains(entity),
    }
}
