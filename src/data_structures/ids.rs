//! Stable integer identities and compaction records.
//!
//! Every entity is addressed by its slot in the owning collection. Removing a
//! slot compacts the collection, so every removal yields a [`Compaction`] that
//! tells holders of older identities where their entity moved to.

use std::fmt;

/// Implemented by every typed identity so compaction can renumber fields
/// without knowing which entity kind they point at.
pub trait EntityId: Copy + Eq + Ord + fmt::Debug {
    const KIND: EntityKind;

    fn index(self) -> usize;

    fn from_index(index: usize) -> Self;

    fn entity(self) -> EntityRef;
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);

        impl EntityId for $name {
            const KIND: EntityKind = EntityKind::$kind;

            fn index(self) -> usize {
                self.0
            }

            fn from_index(index: usize) -> Self {
                Self(index)
            }

            fn entity(self) -> EntityRef {
                EntityRef::$kind(self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($kind), self.0)
            }
        }
    };
}

entity_id!(
    /// Slot of an [`Image`](super::entities::Image).
    ImageId => Image
);
entity_id!(
    /// Slot of a [`Texture`](super::entities::Texture).
    TextureId => Texture
);
entity_id!(
    /// Slot of a [`Material`](super::entities::Material).
    MaterialId => Material
);
entity_id!(
    /// Slot of a [`Mesh`](super::entities::Mesh).
    MeshId => Mesh
);
entity_id!(
    /// Slot of a [`Node`](super::entities::Node). Nodes are never removed.
    NodeId => Node
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Image,
    Texture,
    Material,
    Mesh,
    Node,
}

/// An identity of any kind. Ordering is by kind first, then by slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRef {
    Image(ImageId),
    Texture(TextureId),
    Material(MaterialId),
    Mesh(MeshId),
    Node(NodeId),
}

impl EntityRef {
    pub fn kind(self) -> EntityKind {
        match self {
            EntityRef::Image(_) => EntityKind::Image,
            EntityRef::Texture(_) => EntityKind::Texture,
            EntityRef::Material(_) => EntityKind::Material,
            EntityRef::Mesh(_) => EntityKind::Mesh,
            EntityRef::Node(_) => EntityKind::Node,
        }
    }

    pub fn index(self) -> usize {
        match self {
            EntityRef::Image(id) => id.0,
            EntityRef::Texture(id) => id.0,
            EntityRef::Material(id) => id.0,
            EntityRef::Mesh(id) => id.0,
            EntityRef::Node(id) => id.0,
        }
    }

    fn with_index(self, index: usize) -> Self {
        match self {
            EntityRef::Image(_) => EntityRef::Image(ImageId(index)),
            EntityRef::Texture(_) => EntityRef::Texture(TextureId(index)),
            EntityRef::Material(_) => EntityRef::Material(MaterialId(index)),
            EntityRef::Mesh(_) => EntityRef::Mesh(MeshId(index)),
            EntityRef::Node(_) => EntityRef::Node(NodeId(index)),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Image(id) => id.fmt(f),
            EntityRef::Texture(id) => id.fmt(f),
            EntityRef::Material(id) => id.fmt(f),
            EntityRef::Mesh(id) => id.fmt(f),
            EntityRef::Node(id) => id.fmt(f),
        }
    }
}

/// One compaction: `slot` was removed from the `kind` collection and every
/// later slot moved down by one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Compaction {
    pub kind: EntityKind,
    pub slot: usize,
}

impl Compaction {
    /// New slot of a surviving index, `None` for the removed one.
    pub fn remap(&self, index: usize) -> Option<usize> {
        match index.cmp(&self.slot) {
            std::cmp::Ordering::Less => Some(index),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(index - 1),
        }
    }

    pub fn track(&self, entity: EntityRef) -> Option<EntityRef> {
        if entity.kind() != self.kind {
            return Some(entity);
        }
        self.remap(entity.index()).map(|index| entity.with_index(index))
    }

    /// Renumbers a reference field in place, clearing it if it named the
    /// removed slot.
    pub fn apply<I: EntityId>(&self, field: &mut Option<I>) {
        if I::KIND != self.kind {
            return;
        }
        if let Some(id) = *field {
            *field = self.remap(id.index()).map(I::from_index);
        }
    }
}

/// Every compaction performed by one removal, cascade included, in the order
/// they happened.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemovalLog {
    compactions: Vec<Compaction>,
}

impl RemovalLog {
    pub fn push(&mut self, compaction: Compaction) {
        self.compactions.push(compaction);
    }

    pub fn append(&mut self, other: RemovalLog) {
        self.compactions.extend(other.compactions);
    }

    pub fn is_empty(&self) -> bool {
        self.compactions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.compactions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Compaction> {
        self.compactions.iter()
    }

    /// Number of entities of `kind` removed.
    pub fn removed(&self, kind: EntityKind) -> usize {
        self.compactions.iter().filter(|c| c.kind == kind).count()
    }

    /// Follows an identity taken before the removal through every compaction.
    /// Returns `None` if the entity itself was removed.
    pub fn track(&self, entity: EntityRef) -> Option<EntityRef> {
        self.compactions
            .iter()
            .try_fold(entity, |entity, compaction| compaction.track(entity))
    }
}
