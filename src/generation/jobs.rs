//! Generation claims and background jobs.
//!
//! A claim marks the cell PENDING synchronously so the very next status
//! poll sees it, then hands the slow part (model round trip, write,
//! propagation) to a spawned task. In-flight jobs are deduplicated per
//! cell, and a PENDING record left behind by a crashed process expires
//! after the configured lease so the cell can be re-claimed.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::core::config::GenerationConfig;
use crate::core::coords::TileCoord;
use crate::core::error::{Error, Result};
use crate::core::utils::now_ms;
use crate::generation::grid::NEIGHBOR_OFFSETS;
use crate::generation::{GenerateRequest, Generator};
use crate::pyramid::propagate::PyramidService;
use crate::storage::meta::TileStatus;
use crate::storage::tile_store::{TileKey, TileStore};
use crate::timeline::context::TimelineContext;
use crate::timeline::tiles::{TileService, WriteOpts};

/// In-process guard against duplicate jobs for the same cell.
#[derive(Debug, Default)]
pub struct JobRegistry {
    in_flight: DashMap<TileKey, ()>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job for `key`. Returns false when one is already running.
    pub fn try_begin(&self, key: &TileKey) -> bool {
        self.in_flight.insert(key.clone(), ()).is_none()
    }

    /// Release the job slot for `key`.
    pub fn finish(&self, key: &TileKey) {
        self.in_flight.remove(key);
    }
}

/// Outcome of a generation claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The cell was claimed and a job was spawned.
    Claimed,
    /// A job already holds the cell; the claim was dropped.
    AlreadyPending,
}

/// The claim flow and its background job.
#[derive(Debug)]
pub struct GenerationService<S> {
    tiles: TileService<S>,
    pyramid: PyramidService<S>,
    generator: Arc<Generator>,
    jobs: Arc<JobRegistry>,
    config: GenerationConfig,
}

impl<S> Clone for GenerationService<S> {
    fn clone(&self) -> Self {
        Self {
            tiles: self.tiles.clone(),
            pyramid: self.pyramid.clone(),
            generator: self.generator.clone(),
            jobs: self.jobs.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: TileStore> GenerationService<S> {
    /// Create the service.
    pub fn new(
        tiles: TileService<S>,
        pyramid: PyramidService<S>,
        generator: Arc<Generator>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            tiles,
            pyramid,
            generator,
            jobs: Arc::new(JobRegistry::new()),
            config,
        }
    }

    /// Claim a leaf cell for generation at the context's node.
    ///
    /// The cell is PENDING when this returns `Claimed`; the generated tile
    /// lands asynchronously. A cell already PENDING within its lease, or
    /// with a job in flight in this process, reports `AlreadyPending`.
    pub async fn claim(
        &self,
        context: &TimelineContext,
        coord: TileCoord,
        prompt: String,
    ) -> Result<ClaimOutcome> {
        if !coord.is_leaf() {
            return Err(Error::invalid_argument(format!(
                "generation is only permitted at zoom {}, got {}",
                crate::core::coords::MAX_ZOOM,
                coord.z
            )));
        }

        let key = TileKey::new(context.map.clone(), context.node_namespace(), coord);

        if let Some(record) = self.tiles.record(&key).await? {
            if record.status == TileStatus::Pending {
                let lease_ms = self.config.pending_lease_secs * 1000;
                let age_ms = now_ms().saturating_sub(record.updated_at);
                if age_ms < lease_ms {
                    return Ok(ClaimOutcome::AlreadyPending);
                }
                warn!(key = ?key, age_ms, "pending lease expired; re-claiming");
            }
        }

        if !self.jobs.try_begin(&key) {
            return Ok(ClaimOutcome::AlreadyPending);
        }

        if let Err(err) = self.tiles.mark_pending(&key).await {
            self.jobs.finish(&key);
            return Err(err);
        }

        let service = self.clone();
        let context = context.clone();
        tokio::spawn(async move {
            if let Err(err) = service.run_job(&context, coord, &key, &prompt).await {
                warn!(key = ?key, error = %err, "generation job failed; rolling back");
                if let Err(err) = service.tiles.clear_pending(&key).await {
                    warn!(key = ?key, error = %err, "pending rollback failed");
                }
            }
            service.jobs.finish(&key);
        });

        Ok(ClaimOutcome::Claimed)
    }

    async fn run_job(
        &self,
        context: &TimelineContext,
        coord: TileCoord,
        key: &TileKey,
        prompt: &str,
    ) -> Result<()> {
        let neighbors = self.gather_neighbors(context, coord).await?;
        let center = self.tiles.resolve_effective_buffer(context, coord).await?;
        let seed = rand::random::<u64>();

        let request = GenerateRequest {
            prompt: prompt.to_string(),
            style: self.config.style.clone(),
            negative_prompt: self.config.negative_prompt.clone(),
            seed,
            neighbors,
            center,
        };
        let bytes = self.generator.generate(&request).await?;

        let record = self
            .tiles
            .write_ready(
                key,
                &bytes,
                WriteOpts {
                    hash: None,
                    seed: Some(seed),
                },
            )
            .await?;
        info!(key = ?key, content_ver = record.content_ver, "tile generated");

        // The leaf is servable even if a parent recompose fails.
        if let Err(err) = self.pyramid.propagate(context, &[coord]).await {
            warn!(key = ?key, error = %err, "parent propagation failed");
        }
        Ok(())
    }

    /// Resolve the eight surrounding tiles through the timeline. Cells off
    /// the map edge stay absent.
    async fn gather_neighbors(
        &self,
        context: &TimelineContext,
        coord: TileCoord,
    ) -> Result<[Option<Bytes>; 8]> {
        let mut neighbors: [Option<Bytes>; 8] = Default::default();
        for (slot, (dx, dy)) in neighbors.iter_mut().zip(NEIGHBOR_OFFSETS) {
            let nx = i64::from(coord.x) + dx;
            let ny = i64::from(coord.y) + dy;
            if nx < 0 || ny < 0 {
                continue;
            }
            let neighbor = TileCoord::new(coord.z, nx as u32, ny as u32)?;
            *slot = self
                .tiles
                .resolve_effective_buffer(context, neighbor)
                .await?;
        }
        Ok(neighbors)
    }
}
