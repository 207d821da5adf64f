//! Removal of invalid, unused and duplicate entities.
//!
//! All three sweeps go through the same cascade: removing an entity unlinks
//! it from its referrers, compacts its collection and then collects whatever
//! it leaves behind. That is referrers which lost their last usable reference
//! (a texture without any image) and children nobody references anymore.
//!
//! Batches are always removed highest identity first. Every identity still
//! waiting in a batch is tracked through the compactions of the removals
//! before it, so nothing is ever removed through a stale slot.

use log::{debug, info, warn};

use crate::{
    data_structures::{
        ids::{EntityId, EntityKind, EntityRef, ImageId, MaterialId, MeshId, RemovalLog, TextureId},
        store::{Disposal, EntityStore},
    },
    dedup,
    error::GraphError,
    graph,
};

/// Compactions performed by each sweep of a [`PruningEngine::run`].
#[derive(Clone, Debug, Default)]
pub struct PruneReport {
    pub invalid: RemovalLog,
    pub unused: RemovalLog,
    pub duplicate: RemovalLog,
}

impl PruneReport {
    pub fn removed(&self, kind: EntityKind) -> usize {
        self.invalid.removed(kind) + self.unused.removed(kind) + self.duplicate.removed(kind)
    }

    pub fn total(&self) -> usize {
        self.invalid.len() + self.unused.len() + self.duplicate.len()
    }
}

fn noun(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Image => "image",
        EntityKind::Texture => "texture",
        EntityKind::Material => "material",
        EntityKind::Mesh => "mesh",
        EntityKind::Node => "node",
    }
}

fn all_of(store: &EntityStore, kind: EntityKind) -> Vec<EntityRef> {
    let count = store.count(kind);
    match kind {
        EntityKind::Image => (0..count).map(|i| EntityRef::Image(ImageId(i))).collect(),
        EntityKind::Texture => (0..count).map(|i| EntityRef::Texture(TextureId(i))).collect(),
        EntityKind::Material => (0..count).map(|i| EntityRef::Material(MaterialId(i))).collect(),
        EntityKind::Mesh => (0..count).map(|i| EntityRef::Mesh(MeshId(i))).collect(),
        EntityKind::Node => Vec::new(),
    }
}

pub struct PruningEngine<'a> {
    store: &'a mut EntityStore,
}

impl<'a> PruningEngine<'a> {
    pub fn new(store: &'a mut EntityStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &EntityStore {
        self.store
    }

    /// Runs the invalid, unused and duplicate sweeps in that order.
    pub fn run(&mut self) -> Result<PruneReport, GraphError> {
        let invalid = self.sweep_invalid()?;
        let unused = self.sweep_unused()?;
        let duplicate = self.sweep_duplicate()?;
        let report = PruneReport {
            invalid,
            unused,
            duplicate,
        };
        info!(
            "Pruned {} entities ({} images, {} textures, {} materials, {} meshes)",
            report.total(),
            report.removed(EntityKind::Image),
            report.removed(EntityKind::Texture),
            report.removed(EntityKind::Material),
            report.removed(EntityKind::Mesh),
        );
        Ok(report)
    }

    /// Removes `entity` together with everything its removal orphans or
    /// invalidates.
    ///
    /// Fails without touching the graph if `entity` is a node or not live.
    pub fn remove(&mut self, entity: EntityRef, disposal: Disposal) -> Result<RemovalLog, GraphError> {
        if let EntityRef::Node(id) = entity {
            return Err(GraphError::ReadOnly(id));
        }
        if !self.store.contains(entity) {
            return Err(GraphError::NotLive(entity));
        }
        warn!("Removed {}: {}", noun(entity.kind()), self.store.display_name(entity));
        self.cascade(entity, disposal)
    }

    /// Images without any byte source, textures without any image and meshes
    /// without primitives. Images go first so that textures losing their only
    /// image are collected by the cascade.
    pub fn sweep_invalid(&mut self) -> Result<RemovalLog, GraphError> {
        let mut log = RemovalLog::default();
        for kind in [EntityKind::Image, EntityKind::Texture, EntityKind::Mesh] {
            let candidates = all_of(self.store, kind)
                .into_iter()
                .filter(|&entity| !graph::is_valid(self.store, entity))
                .collect();
            let removed = self.remove_batch(
                candidates,
                Disposal::Delete,
                "invalid",
                |store, entity| !graph::is_valid(store, entity),
            )?;
            log.append(removed);
        }
        Ok(log)
    }

    /// Everything not reachable from a node. Kinds are visited top-down so a
    /// mesh no node uses takes its private materials, textures and images
    /// with it.
    pub fn sweep_unused(&mut self) -> Result<RemovalLog, GraphError> {
        let mut log = RemovalLog::default();
        for kind in [
            EntityKind::Mesh,
            EntityKind::Material,
            EntityKind::Texture,
            EntityKind::Image,
        ] {
            let candidates = all_of(self.store, kind)
                .into_iter()
                .filter(|&entity| !graph::is_referenced(self.store, entity))
                .collect();
            let removed = self.remove_batch(
                candidates,
                Disposal::Delete,
                "unused",
                |store, entity| !graph::is_referenced(store, entity),
            )?;
            log.append(removed);
        }
        Ok(log)
    }

    /// Collapses duplicate images, then textures, then materials onto their
    /// canonical representative. Merged images keep their backing file.
    pub fn sweep_duplicate(&mut self) -> Result<RemovalLog, GraphError> {
        let mut log = RemovalLog::default();

        let images = dedup::duplicate_images(self.store);
        log.append(self.merge(images.iter().map(|d| (d.duplicate.entity(), d.canonical.entity())))?);

        let textures = dedup::duplicate_textures(self.store);
        log.append(self.merge(textures.iter().map(|d| (d.duplicate.entity(), d.canonical.entity())))?);

        let materials = dedup::duplicate_materials(self.store);
        log.append(self.merge(materials.iter().map(|d| (d.duplicate.entity(), d.canonical.entity())))?);

        Ok(log)
    }

    fn merge(&mut self, duplicates: impl Iterator<Item = (EntityRef, EntityRef)>) -> Result<RemovalLog, GraphError> {
        let mut merged = Vec::new();
        for (duplicate, canonical) in duplicates {
            let touched = graph::rewrite_reference(self.store, duplicate, Some(canonical));
            debug!("Redirected {} referrers of {duplicate} to {canonical}", touched.len());
            warn!(
                "Removed duplicate {}: {}, {}",
                noun(duplicate.kind()),
                self.store.display_name(duplicate),
                self.store.display_name(canonical),
            );
            merged.push(duplicate);
        }
        // Duplicates are never canonical, so none of them can be referenced
        // after the rewrite and the cascade only collects their children.
        self.remove_batch(merged, Disposal::Merge, "", |store, entity| store.contains(entity))
    }

    /// Removes every candidate that still satisfies `should_remove` when its
    /// turn comes, highest identity first.
    fn remove_batch(
        &mut self,
        mut pending: Vec<EntityRef>,
        disposal: Disposal,
        reason: &str,
        should_remove: impl Fn(&EntityStore, EntityRef) -> bool,
    ) -> Result<RemovalLog, GraphError> {
        let mut log = RemovalLog::default();
        pending.sort_unstable();
        pending.dedup();
        while let Some(entity) = pending.pop() {
            if !should_remove(self.store, entity) {
                continue;
            }
            if !reason.is_empty() {
                warn!(
                    "Removed {reason} {}: {}",
                    noun(entity.kind()),
                    self.store.display_name(entity)
                );
            }
            let removed = self.cascade(entity, disposal)?;
            // Tracking is monotonic within a kind, so the order survives
            pending = pending.into_iter().filter_map(|p| removed.track(p)).collect();
            log.append(removed);
        }
        Ok(log)
    }

    fn cascade(&mut self, entity: EntityRef, disposal: Disposal) -> Result<RemovalLog, GraphError> {
        let children = graph::children(self.store, entity);
        let referrers = graph::rewrite_reference(self.store, entity, None);
        let compaction = self.store.remove(entity, disposal)?;
        graph::apply_compaction(self.store, &compaction);

        let mut log = RemovalLog::default();
        log.push(compaction);

        let invalidated = referrers
            .into_iter()
            .filter_map(|r| compaction.track(r))
            .filter(|&r| !graph::is_valid(self.store, r))
            .collect();
        let mut children: Vec<_> = children.into_iter().filter_map(|c| compaction.track(c)).collect();

        let removed = self.remove_batch(invalidated, Disposal::Delete, "invalidated", |store, r| {
            !graph::is_valid(store, r)
        })?;
        children = children.into_iter().filter_map(|c| removed.track(c)).collect();
        log.append(removed);

        let removed = self.remove_batch(children, Disposal::Delete, "orphaned", |store, c| {
            !graph::is_referenced(store, c)
        })?;
        log.append(removed);

        Ok(log)
    }
}
