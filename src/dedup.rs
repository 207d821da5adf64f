//! Structural equality of images, textures and materials.
//!
//! Equality is deliberately shallow: it looks at what a renderer would end up
//! sampling, not at names. Groups of equal entities collapse onto their lowest
//! identity, and equality chains (A equals B, B equals C) are closed
//! transitively so a group always has exactly one representative.

use crate::data_structures::{
    entities::{Image, Material, Texture},
    ids::{ImageId, MaterialId, TextureId},
    store::EntityStore,
};

pub fn images_equal(a: &Image, b: &Image) -> bool {
    let same_uri = a.uri.is_some() && a.uri == b.uri;
    let same_view = a.buffer_view.is_some() && a.buffer_view == b.buffer_view;
    same_uri || same_view
}

pub fn textures_equal(a: &Texture, b: &Texture) -> bool {
    let image = a.resolved_image();
    image.is_some() && image == b.resolved_image() && a.sampler == b.sampler
}

/// Every field a renderer consumes has to match exactly. Numbers that only
/// differ in their JSON spelling (`1` against `1.0`) compare unequal, which
/// keeps both materials.
pub fn materials_equal(a: &Material, b: &Material) -> bool {
    a.slots == b.slots && a.body == b.body
}

/// A duplicate and the representative it collapses onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Duplicate<I> {
    pub duplicate: I,
    pub canonical: I,
}

/// Disjoint sets where the root of every set is its lowest member.
struct LowestRoot {
    parent: Vec<usize>,
}

impl LowestRoot {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            let (low, high) = if a < b { (a, b) } else { (b, a) };
            self.parent[high] = low;
        }
    }
}

/// Pairs every duplicate slot among `len` slots with the lowest slot of its
/// equality group. The result is ordered by ascending duplicate slot.
pub fn find_duplicates(len: usize, equal: impl Fn(usize, usize) -> bool) -> Vec<(usize, usize)> {
    let mut sets = LowestRoot::new(len);
    for i in 0..len {
        for j in i + 1..len {
            if equal(i, j) {
                sets.union(i, j);
            }
        }
    }
    (0..len)
        .filter_map(|i| {
            let root = sets.find(i);
            (root != i).then_some((i, root))
        })
        .collect()
}

pub fn duplicate_images(store: &EntityStore) -> Vec<Duplicate<ImageId>> {
    let images: Vec<_> = store.images().map(|(_, image)| image).collect();
    find_duplicates(images.len(), |a, b| images_equal(images[a], images[b]))
        .into_iter()
        .map(|(duplicate, canonical)| Duplicate {
            duplicate: ImageId(duplicate),
            canonical: ImageId(canonical),
        })
        .collect()
}

pub fn duplicate_textures(store: &EntityStore) -> Vec<Duplicate<TextureId>> {
    let textures: Vec<_> = store.textures().map(|(_, texture)| texture).collect();
    find_duplicates(textures.len(), |a, b| textures_equal(textures[a], textures[b]))
        .into_iter()
        .map(|(duplicate, canonical)| Duplicate {
            duplicate: TextureId(duplicate),
            canonical: TextureId(canonical),
        })
        .collect()
}

pub fn duplicate_materials(store: &EntityStore) -> Vec<Duplicate<MaterialId>> {
    let materials: Vec<_> = store.materials().map(|(_, material)| material).collect();
    find_duplicates(materials.len(), |a, b| materials_equal(materials[a], materials[b]))
        .into_iter()
        .map(|(duplicate, canonical)| Duplicate {
            duplicate: MaterialId(duplicate),
            canonical: MaterialId(canonical),
        })
        .collect()
}
