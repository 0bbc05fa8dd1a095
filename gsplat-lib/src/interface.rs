//! Content-thread side of a splat source.
//!
//! A [`SplatDataInterface`] owns the current [`SplatStore`], answers per-index
//! queries against it, and drives the presentation thread for the instances
//! it activated.

use crate::error::{ProxyError, SplatError};
use crate::functions::{FunctionValue, SplatFunction};
use crate::proxy::{InstanceId, InstanceStatus, ShaderParameters};
use crate::render_thread::RenderHandle;
use crate::settings::SplatSettings;
use crate::structures::SplatStore;
use glam::{Quat, Vec3, Vec4};
use std::path::{Path, PathBuf};

/// Result of activating an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub id: InstanceId,
    pub status: InstanceStatus,
    pub splat_count: u32,
}

pub struct SplatDataInterface {
    store: SplatStore,
    tint: Vec4,
    source: Option<PathBuf>,
    render: RenderHandle,
    instances: Vec<InstanceId>,
}

impl SplatDataInterface {
    pub fn new(render: RenderHandle) -> Self {
        Self {
            store: SplatStore::default(),
            tint: Vec4::ONE,
            source: None,
            render,
            instances: Vec::new(),
        }
    }

    /// Applies the default tint and runs the configured auto-load, if any.
    pub fn from_settings(settings: &SplatSettings, render: RenderHandle) -> Result<Self, SplatError> {
        let mut interface = Self::new(render);
        interface.tint = settings.global_tint;
        if let Some(path) = settings.auto_load_target() {
            interface.load(path)?;
        }
        Ok(interface)
    }

    /// Parses `path` and replaces the current data. On failure the previous
    /// data is left in place.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<u32, SplatError> {
        let path = path.as_ref();
        let store = crate::read_splat_file(path)?;
        log::info!("Loaded {} splats from {}", store.len(), path.display());
        self.source = Some(path.to_path_buf());
        Ok(self.replace(store))
    }

    /// Same as [`load`](Self::load) for bytes already in memory.
    pub fn load_bytes(&mut self, raw: &[u8]) -> Result<u32, SplatError> {
        let store = crate::load_splats(raw)?;
        self.source = None;
        Ok(self.replace(store))
    }

    #[cfg(feature = "async")]
    pub async fn load_async(&mut self, path: impl AsRef<Path>) -> Result<u32, SplatError> {
        let path = path.as_ref();
        let store = crate::read_splat_file_async(path).await?;
        log::info!("Loaded {} splats from {}", store.len(), path.display());
        self.source = Some(path.to_path_buf());
        Ok(self.replace(store))
    }

    fn replace(&mut self, store: SplatStore) -> u32 {
        if let Some(first) = store.records().first() {
            log::debug!(
                "First splat: position {:?}, scale {:?}, opacity {}",
                first.position,
                first.scale,
                first.opacity
            );
        }
        self.store = store;
        self.get_count()
    }

    pub fn clear(&mut self) {
        self.store = SplatStore::default();
        self.source = None;
    }

    pub fn get_count(&self) -> u32 {
        u32::try_from(self.store.len()).unwrap_or(u32::MAX)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Current data. Cheap; shares the records.
    pub fn snapshot(&self) -> SplatStore {
        self.store.clone()
    }

    pub fn tint(&self) -> Vec4 {
        self.tint
    }

    /// Sets the tint used by color queries and pushes it to active instances.
    pub fn set_tint(&mut self, tint: Vec4) {
        self.tint = tint;
        for &id in &self.instances {
            if let Err(e) = self.render.set_tint(id, tint.truncate()) {
                log::warn!("Could not update tint for instance {}: {}", id, e);
            }
        }
    }

    pub fn active_instances(&self) -> &[InstanceId] {
        &self.instances
    }

    /// Creates an instance and blocks until the current data is uploaded for it,
    /// so a bind right after this returns sees it `Ready`.
    ///
    /// An upload failure is reported but the instance stays registered and
    /// binds the fallback buffers.
    pub fn activate(&mut self) -> Result<Activation, ProxyError> {
        let id = InstanceId::next();
        self.render.create(id, self.tint.truncate())?;
        self.instances.push(id);
        let status = self.render.submit_and_wait(id, self.store.clone())?;
        Ok(Activation {
            id,
            status,
            splat_count: self.get_count(),
        })
    }

    /// Re-uploads the current data to every instance holding an older copy.
    pub fn refresh(&self) -> Result<(), ProxyError> {
        for &id in &self.instances {
            self.render.refresh(id, self.store.clone())?;
        }
        Ok(())
    }

    pub fn deactivate(&mut self, id: InstanceId) -> Result<(), ProxyError> {
        self.instances.retain(|&i| i != id);
        self.render.destroy(id)
    }

    pub fn bind(&self, id: InstanceId) -> Result<ShaderParameters, ProxyError> {
        self.render.bind(id)
    }

    pub fn status(&self, id: InstanceId) -> Result<InstanceStatus, ProxyError> {
        self.render.status(id)
    }

    pub fn count(&self) -> i32 {
        self.store.count()
    }

    pub fn position(&self, index: i32) -> Vec3 {
        self.store.position(index)
    }

    pub fn scale(&self, index: i32) -> Vec3 {
        self.store.scale(index)
    }

    pub fn orientation(&self, index: i32) -> Quat {
        self.store.orientation(index)
    }

    pub fn opacity(&self, index: i32) -> f32 {
        self.store.opacity(index)
    }

    pub fn color(&self, index: i32) -> Vec4 {
        self.store.color(index, self.tint)
    }

    pub fn call(&self, function: SplatFunction, index: i32) -> FunctionValue {
        function.evaluate(&self.store, self.tint, index)
    }

    pub fn call_batch(&self, function: SplatFunction, indices: &[i32], out: &mut Vec<FunctionValue>) {
        function.evaluate_batch(&self.store, self.tint, indices, out);
    }
}

impl Drop for SplatDataInterface {
    fn drop(&mut self) {
        for id in self.instances.drain(..) {
            // The presentation thread may already be gone, which releases everything anyway.
            let _ = self.render.destroy(id);
        }
    }
}
