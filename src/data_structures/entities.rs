//! Entity records of the scene graph.
//!
//! Each record keeps the fields the optimiser reasons about as typed values
//! and everything else in `body`, the remaining JSON object, so that a
//! document can be written back without losing data the core never touches.

use serde_json::{Map, Value};

use super::{
    ids::{ImageId, MaterialId, MeshId, TextureId},
    slots::{SlotKind, SlotPolicy},
};

pub type Body = Map<String, Value>;

fn display_name(name: Option<&str>, fallback: Option<&str>) -> String {
    name.or(fallback).unwrap_or("unnamed").to_string()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Image {
    pub name: Option<String>,
    pub uri: Option<String>,
    pub buffer_view: Option<usize>,
    pub mime_type: Option<String>,
    pub body: Body,
}

impl Image {
    pub fn from_uri(uri: &str) -> Self {
        Self {
            uri: Some(uri.to_string()),
            ..Default::default()
        }
    }

    /// An image is only usable if its bytes can be found somewhere.
    pub fn has_source(&self) -> bool {
        self.uri.as_deref().is_some_and(|uri| !uri.is_empty()) || self.buffer_view.is_some()
    }

    /// URI naming a file next to the document, as opposed to inline data.
    pub fn file_uri(&self) -> Option<&str> {
        self.uri
            .as_deref()
            .filter(|uri| !uri.is_empty() && !uri.starts_with("data:"))
    }

    pub fn is_ktx2(&self) -> bool {
        self.mime_type.as_deref() == Some("image/ktx2")
            || self.uri.as_deref().is_some_and(|uri| uri.ends_with(".ktx2"))
    }

    pub fn display_name(&self) -> String {
        display_name(self.name.as_deref(), self.uri.as_deref())
    }
}

/// An image reference held by a texture extension other than
/// `KHR_texture_basisu`, e.g. `EXT_texture_webp`.
#[derive(Clone, Debug, PartialEq)]
pub struct AlternateSource {
    pub extension: String,
    pub image: Option<ImageId>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Texture {
    pub name: Option<String>,
    pub source: Option<ImageId>,
    /// The `KHR_texture_basisu` image.
    pub compressed: Option<ImageId>,
    pub alternates: Vec<AlternateSource>,
    /// Index into the sampler list, which the optimiser never modifies.
    pub sampler: Option<usize>,
    pub body: Body,
    /// Set once the texture has been handed to the conversion pass.
    pub converted: bool,
}

impl Texture {
    pub fn from_source(source: ImageId) -> Self {
        Self {
            source: Some(source),
            ..Default::default()
        }
    }

    /// The image a renderer would pick: the compressed one if present.
    pub fn resolved_image(&self) -> Option<ImageId> {
        self.compressed.or(self.source)
    }

    pub fn image_refs(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.source
            .into_iter()
            .chain(self.compressed)
            .chain(self.alternates.iter().filter_map(|alternate| alternate.image))
    }

    pub fn image_refs_mut(&mut self) -> impl Iterator<Item = &mut Option<ImageId>> {
        [&mut self.source, &mut self.compressed]
            .into_iter()
            .chain(self.alternates.iter_mut().map(|alternate| &mut alternate.image))
    }

    /// A texture with no image left to sample from is useless.
    pub fn is_valid(&self) -> bool {
        self.image_refs().next().is_some()
    }

    pub fn display_name(&self) -> String {
        display_name(self.name.as_deref(), None)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureSlot {
    pub kind: SlotKind,
    pub texture: Option<TextureId>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    /// Only slots present in the source document, in [`SlotKind::ALL`] order.
    pub slots: Vec<TextureSlot>,
    /// Factors, flags and texture-info objects with their `index` stripped.
    pub body: Body,
}

impl Material {
    pub fn with_slots(slots: &[(SlotKind, TextureId)]) -> Self {
        let mut slots: Vec<_> = slots
            .iter()
            .map(|&(kind, texture)| TextureSlot {
                kind,
                texture: Some(texture),
            })
            .collect();
        slots.sort_by_key(|slot| slot.kind);
        Self {
            slots,
            ..Default::default()
        }
    }

    pub fn texture(&self, kind: SlotKind) -> Option<TextureId> {
        self.slots
            .iter()
            .find(|slot| slot.kind == kind)
            .and_then(|slot| slot.texture)
    }

    /// Visits every bound slot together with its conversion policy.
    pub fn for_each_slot(&self, mut f: impl FnMut(SlotKind, SlotPolicy, TextureId)) {
        for slot in &self.slots {
            if let Some(texture) = slot.texture {
                f(slot.kind, slot.kind.policy(), texture);
            }
        }
    }

    /// Like [`for_each_slot`](Self::for_each_slot) but hands out the reference
    /// itself, bound or not, so it can be rewritten.
    pub fn for_each_slot_mut(&mut self, mut f: impl FnMut(SlotKind, SlotPolicy, &mut Option<TextureId>)) {
        for slot in &mut self.slots {
            f(slot.kind, slot.kind.policy(), &mut slot.texture);
        }
    }

    pub fn texture_refs(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.slots.iter().filter_map(|slot| slot.texture)
    }

    pub fn display_name(&self) -> String {
        display_name(self.name.as_deref(), None)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Primitive {
    pub material: Option<MaterialId>,
    /// Materials of `KHR_materials_variants` mappings, in mapping order.
    pub variants: Vec<Option<MaterialId>>,
    pub body: Body,
}

impl Primitive {
    pub fn with_material(material: Option<MaterialId>) -> Self {
        Self {
            material,
            ..Default::default()
        }
    }

    pub fn material_refs(&self) -> impl Iterator<Item = MaterialId> + '_ {
        self.material.into_iter().chain(self.variants.iter().flatten().copied())
    }

    pub fn material_refs_mut(&mut self) -> impl Iterator<Item = &mut Option<MaterialId>> {
        std::iter::once(&mut self.material).chain(self.variants.iter_mut())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub name: Option<String>,
    pub primitives: Vec<Primitive>,
    pub body: Body,
}

impl Mesh {
    pub fn with_materials(materials: &[Option<MaterialId>]) -> Self {
        Self {
            primitives: materials.iter().copied().map(Primitive::with_material).collect(),
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.primitives.is_empty()
    }

    pub fn material_refs(&self) -> impl Iterator<Item = MaterialId> + '_ {
        self.primitives.iter().flat_map(Primitive::material_refs)
    }

    pub fn display_name(&self) -> String {
        display_name(self.name.as_deref(), None)
    }
}

/// Scene nodes are only read by the optimiser, apart from their mesh
/// reference which follows mesh removals.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    pub name: Option<String>,
    pub mesh: Option<MeshId>,
    pub body: Body,
}

impl Node {
    pub fn with_mesh(mesh: Option<MeshId>) -> Self {
        Self {
            mesh,
            ..Default::default()
        }
    }
}
