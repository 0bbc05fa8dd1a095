//! Per-instance GPU buffer lifecycle, owned by the presentation thread.

use crate::device::{BufferHandle, Float4, GpuDevice};
use crate::error::{DeviceError, ProxyError};
use crate::structures::SplatStore;
use foldhash::{HashMap, HashMapExt};
use glam::Vec3;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const SPLATS_COUNT_PARAM: &str = "_SplatsCount";
pub const GLOBAL_TINT_PARAM: &str = "_GlobalTint";
pub const POSITIONS_PARAM: &str = "_Positions";
pub const SCALES_PARAM: &str = "_Scales";
pub const ORIENTATIONS_PARAM: &str = "_Orientations";
pub const SH_ZERO_OPACITY_PARAM: &str = "_SHZeroCoeffsAndOpacity";

const UPLOAD_LABELS: [&str; 4] = [
    "GSplat_Positions",
    "GSplat_Scales",
    "GSplat_Orientations",
    "GSplat_SHZeroOpacity",
];

const FALLBACK_LABELS: [&str; 4] = [
    "GSplat_Fallback_Positions",
    "GSplat_Fallback_Scales",
    "GSplat_Fallback_Orientations",
    "GSplat_Fallback_SHZeroOpacity",
];

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Identifies one rendering instance across both threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The four buffers a draw reads. Only ever published fully populated.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferSet {
    pub positions: BufferHandle,
    pub scales: BufferHandle,
    pub orientations: BufferHandle,
    pub sh0_opacity: BufferHandle,
    count: u32,
}

impl BufferSet {
    /// Number of splats the shader should draw.
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn handles(&self) -> [BufferHandle; 4] {
        [
            self.positions,
            self.scales,
            self.orientations,
            self.sh0_opacity,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Uninitialized,
    Uploading,
    Ready,
    Removed,
}

#[derive(Debug)]
enum InstanceState {
    Uninitialized,
    Uploading,
    Ready {
        buffers: Arc<BufferSet>,
        generation: u64,
    },
}

#[derive(Debug)]
struct InstanceRecord {
    state: InstanceState,
    tint: Vec3,
}

/// Everything a draw call needs for one instance.
#[derive(Debug, Clone)]
pub struct ShaderParameters {
    pub splats_count: i32,
    pub global_tint: Vec3,
    pub buffers: Arc<BufferSet>,
}

impl ShaderParameters {
    /// Parameter names paired with the buffer bound to each.
    pub fn buffer_bindings(&self) -> [(&'static str, BufferHandle); 4] {
        [
            (POSITIONS_PARAM, self.buffers.positions),
            (SCALES_PARAM, self.buffers.scales),
            (ORIENTATIONS_PARAM, self.buffers.orientations),
            (SH_ZERO_OPACITY_PARAM, self.buffers.sh0_opacity),
        ]
    }
}

/// Splits a store into the four float4 streams the shader reads.
fn pack_rows(store: &SplatStore) -> [Vec<Float4>; 4] {
    let n = store.len();
    let mut positions = Vec::with_capacity(n);
    let mut scales = Vec::with_capacity(n);
    let mut orientations = Vec::with_capacity(n);
    let mut sh0_opacity = Vec::with_capacity(n);
    for s in store.records() {
        positions.push(Float4(s.position.extend(0.0).to_array()));
        scales.push(Float4(s.scale.extend(0.0).to_array()));
        orientations.push(Float4(s.orientation.to_array()));
        sh0_opacity.push(Float4(s.sh_dc.extend(s.opacity).to_array()));
    }
    [positions, scales, orientations, sh0_opacity]
}

fn create_and_upload<D: GpuDevice>(
    device: &mut D,
    label: &str,
    data: &[Float4],
    elements: u32,
) -> Result<BufferHandle, DeviceError> {
    let handle = device.create_buffer(label, elements)?;
    if let Err(e) = device.upload(handle, data) {
        device.release_buffer(handle);
        return Err(e);
    }
    Ok(handle)
}

/// Creates and fills all four buffers, releasing any partial work on failure.
fn allocate_set<D: GpuDevice>(
    device: &mut D,
    labels: &[&str; 4],
    rows: &[Vec<Float4>; 4],
    count: u32,
) -> Result<BufferSet, DeviceError> {
    let elements = count.max(1);
    let mut created = Vec::with_capacity(4);
    for (label, data) in labels.iter().zip(rows) {
        match create_and_upload(device, label, data, elements) {
            Ok(handle) => created.push(handle),
            Err(e) => {
                for handle in created {
                    device.release_buffer(handle);
                }
                return Err(e);
            }
        }
    }

    match *created.as_slice() {
        [positions, scales, orientations, sh0_opacity] => Ok(BufferSet {
            positions,
            scales,
            orientations,
            sh0_opacity,
            count,
        }),
        _ => Err(DeviceError::Lost),
    }
}

/// Owns every device buffer for every instance.
///
/// Readers get `Arc<BufferSet>` clones from [`SplatProxy::bind`]. A set that
/// is replaced or destroyed while still held is parked and released by
/// [`SplatProxy::collect_retired`] once the last reader drops it.
pub struct SplatProxy<D: GpuDevice> {
    device: D,
    instances: HashMap<InstanceId, InstanceRecord>,
    fallback: Arc<BufferSet>,
    retired: Vec<Arc<BufferSet>>,
}

impl<D: GpuDevice> SplatProxy<D> {
    /// Allocates the one-element fallback set up front, so binding never
    /// needs the device.
    pub fn new(mut device: D) -> Result<Self, ProxyError> {
        let zero = vec![Float4::default()];
        let rows = [zero.clone(), zero.clone(), zero.clone(), zero];
        let fallback = allocate_set(&mut device, &FALLBACK_LABELS, &rows, 0)?;
        Ok(Self {
            device,
            instances: HashMap::new(),
            fallback: Arc::new(fallback),
            retired: Vec::new(),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Registers an instance. Re-creating a live instance only updates its tint.
    pub fn create(&mut self, id: InstanceId, tint: Vec3) {
        self.instances
            .entry(id)
            .and_modify(|instance| instance.tint = tint)
            .or_insert(InstanceRecord {
                state: InstanceState::Uninitialized,
                tint,
            });
    }

    pub fn status(&self, id: InstanceId) -> InstanceStatus {
        match self.instances.get(&id).map(|i| &i.state) {
            None => InstanceStatus::Removed,
            Some(InstanceState::Uninitialized) => InstanceStatus::Uninitialized,
            Some(InstanceState::Uploading) => InstanceStatus::Uploading,
            Some(InstanceState::Ready { .. }) => InstanceStatus::Ready,
        }
    }

    fn replace_state(&mut self, id: InstanceId, state: InstanceState) -> Option<InstanceState> {
        let instance = self.instances.get_mut(&id)?;
        Some(std::mem::replace(&mut instance.state, state))
    }

    fn retire(&mut self, state: InstanceState) {
        if let InstanceState::Ready { buffers, .. } = state {
            if !Arc::ptr_eq(&buffers, &self.fallback) {
                self.retired.push(buffers);
            }
        }
    }

    /// Uploads `store` for `id`, replacing whatever the instance held before.
    ///
    /// An empty store binds the fallback set. On device failure the instance
    /// drops back to `Uninitialized` and keeps drawing nothing.
    pub fn submit(&mut self, id: InstanceId, store: &SplatStore) -> Result<InstanceStatus, ProxyError> {
        let previous = self
            .replace_state(id, InstanceState::Uploading)
            .ok_or(ProxyError::UnknownInstance(id.get()))?;
        self.retire(previous);

        let result = if store.is_empty() {
            log::warn!("Instance {} has no splats, binding fallback buffers", id);
            Ok(self.fallback.clone())
        } else {
            u32::try_from(store.len())
                .map_err(|_| DeviceError::TooManyElements(store.len()))
                .and_then(|count| {
                    allocate_set(&mut self.device, &UPLOAD_LABELS, &pack_rows(store), count)
                })
                .map(Arc::new)
        };

        let outcome = match result {
            Ok(buffers) => {
                log::debug!(
                    "Instance {} uploaded {} splats (generation {})",
                    id,
                    buffers.len(),
                    store.generation()
                );
                self.replace_state(
                    id,
                    InstanceState::Ready {
                        buffers,
                        generation: store.generation(),
                    },
                );
                Ok(InstanceStatus::Ready)
            }
            Err(e) => {
                log::error!("Failed to upload {} splats for instance {}: {}", store.len(), id, e);
                self.replace_state(id, InstanceState::Uninitialized);
                Err(e.into())
            }
        };
        self.collect_retired();
        outcome
    }

    /// True when the instance has no buffers for this generation of the data.
    pub fn needs_upload(&self, id: InstanceId, store: &SplatStore) -> bool {
        !matches!(
            self.instances.get(&id).map(|i| &i.state),
            Some(InstanceState::Ready { generation, .. }) if *generation == store.generation()
        )
    }

    /// Re-uploads only if `store` is newer than what the instance holds.
    pub fn ensure_current(&mut self, id: InstanceId, store: &SplatStore) -> Result<InstanceStatus, ProxyError> {
        if !self.instances.contains_key(&id) {
            return Err(ProxyError::UnknownInstance(id.get()));
        }
        if self.needs_upload(id, store) {
            self.submit(id, store)
        } else {
            Ok(InstanceStatus::Ready)
        }
    }

    pub fn set_tint(&mut self, id: InstanceId, tint: Vec3) -> Result<(), ProxyError> {
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or(ProxyError::UnknownInstance(id.get()))?;
        instance.tint = tint;
        Ok(())
    }

    /// Buffers to draw with. Anything not `Ready` gets the fallback set.
    pub fn bind(&self, id: InstanceId) -> Arc<BufferSet> {
        match self.instances.get(&id).map(|i| &i.state) {
            Some(InstanceState::Ready { buffers, .. }) => buffers.clone(),
            _ => self.fallback.clone(),
        }
    }

    /// Instances that are not `Ready` draw the fallback set untinted.
    pub fn shader_parameters(&self, id: InstanceId) -> ShaderParameters {
        let buffers = self.bind(id);
        let global_tint = match self.instances.get(&id) {
            Some(InstanceRecord {
                state: InstanceState::Ready { .. },
                tint,
            }) => *tint,
            _ => Vec3::ONE,
        };
        ShaderParameters {
            splats_count: i32::try_from(buffers.len()).unwrap_or(i32::MAX),
            global_tint,
            buffers,
        }
    }

    /// Forgets the instance. Its buffers go once no reader holds them.
    pub fn destroy(&mut self, id: InstanceId) {
        if let Some(instance) = self.instances.remove(&id) {
            log::debug!("Destroying instance {}", id);
            self.retire(instance.state);
            self.collect_retired();
        }
    }

    /// Releases retired sets nobody else holds. Returns how many are still parked.
    pub fn collect_retired(&mut self) -> usize {
        let device = &mut self.device;
        self.retired.retain(|set| {
            if Arc::strong_count(set) > 1 {
                log::trace!("Deferring release of {} splat buffers still in use", set.len());
                return true;
            }
            for handle in set.handles() {
                device.release_buffer(handle);
            }
            false
        });
        self.retired.len()
    }
}

impl<D: GpuDevice> Drop for SplatProxy<D> {
    fn drop(&mut self) {
        let states: Vec<_> = self.instances.drain().map(|(_, i)| i.state).collect();
        for state in states {
            self.retire(state);
        }
        for set in self.retired.drain(..) {
            for handle in set.handles() {
                self.device.release_buffer(handle);
            }
        }
        for handle in self.fallback.handles() {
            self.device.release_buffer(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostDevice;
    use crate::structures::SplatRecord;
    use glam::Quat;

    fn store(n: usize) -> SplatStore {
        SplatStore::new(
            (0..n)
                .map(|i| SplatRecord {
                    position: Vec3::new(i as f32, 1.0, 2.0),
                    scale: Vec3::splat(3.0),
                    orientation: Quat::from_xyzw(0.0, 0.0, 1.0, 0.0),
                    opacity: 0.5,
                    sh_dc: Vec3::new(0.1, 0.2, 0.3),
                    ..Default::default()
                })
                .collect(),
        )
    }

    fn proxy() -> (HostDevice, SplatProxy<HostDevice>) {
        let device = HostDevice::new();
        let proxy = SplatProxy::new(device.clone()).unwrap();
        (device, proxy)
    }

    #[test]
    fn unsubmitted_instance_binds_fallback() {
        let (device, mut proxy) = proxy();
        let id = InstanceId::next();
        proxy.create(id, Vec3::ONE);
        assert_eq!(proxy.status(id), InstanceStatus::Uninitialized);

        let params = proxy.shader_parameters(id);
        assert_eq!(params.splats_count, 0);
        for (_, handle) in params.buffer_bindings() {
            assert_eq!(device.read(handle), Some(vec![Float4::default()]));
        }
    }

    #[test]
    fn submit_packs_rows() {
        let (device, mut proxy) = proxy();
        let id = InstanceId::next();
        proxy.create(id, Vec3::new(1.0, 0.5, 0.25));
        assert_eq!(proxy.submit(id, &store(2)).unwrap(), InstanceStatus::Ready);

        let params = proxy.shader_parameters(id);
        assert_eq!(params.splats_count, 2);
        assert_eq!(params.global_tint, Vec3::new(1.0, 0.5, 0.25));
        let b = &params.buffers;
        assert_eq!(
            device.read(b.positions).unwrap()[1],
            Float4([1.0, 1.0, 2.0, 0.0])
        );
        assert_eq!(device.read(b.scales).unwrap()[0], Float4([3.0, 3.0, 3.0, 0.0]));
        assert_eq!(
            device.read(b.orientations).unwrap()[0],
            Float4([0.0, 0.0, 1.0, 0.0])
        );
        assert_eq!(
            device.read(b.sh0_opacity).unwrap()[0],
            Float4([0.1, 0.2, 0.3, 0.5])
        );
        assert_eq!(device.label(b.positions).as_deref(), Some("GSplat_Positions"));
        // fallback + one uploaded set
        assert_eq!(device.live_buffers(), 8);
    }

    #[test]
    fn tint_applies_only_once_ready() {
        let (_, mut proxy) = proxy();
        let id = InstanceId::next();
        let red = Vec3::new(1.0, 0.0, 0.0);
        proxy.create(id, red);
        assert_eq!(proxy.shader_parameters(id).global_tint, Vec3::ONE);

        proxy.submit(id, &store(1)).unwrap();
        assert_eq!(proxy.shader_parameters(id).global_tint, red);

        proxy.destroy(id);
        assert_eq!(proxy.shader_parameters(id).global_tint, Vec3::ONE);
    }

    #[test]
    fn empty_store_binds_fallback_and_is_ready() {
        let (device, mut proxy) = proxy();
        let id = InstanceId::next();
        proxy.create(id, Vec3::ONE);
        let status = proxy.submit(id, &SplatStore::new(Vec::new())).unwrap();
        assert_eq!(status, InstanceStatus::Ready);
        assert!(proxy.bind(id).is_empty());
        assert_eq!(device.live_buffers(), 4);
    }

    #[test]
    fn submit_to_unknown_instance_fails() {
        let (_, mut proxy) = proxy();
        let err = proxy.submit(InstanceId::next(), &store(1)).unwrap_err();
        assert!(matches!(err, ProxyError::UnknownInstance(_)));
    }

    #[test]
    fn allocation_failure_is_isolated_per_instance() {
        let (device, mut proxy) = proxy();
        let a = InstanceId::next();
        let b = InstanceId::next();
        proxy.create(a, Vec3::ONE);
        proxy.create(b, Vec3::ONE);
        proxy.submit(a, &store(4)).unwrap();

        // room for two of the four buffers
        device.set_budget(Some(device.used_bytes() + 2 * 4 * 16));
        let err = proxy.submit(b, &store(4)).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Device(DeviceError::OutOfMemory { .. })
        ));
        assert_eq!(proxy.status(b), InstanceStatus::Uninitialized);
        assert!(proxy.bind(b).is_empty());
        assert_eq!(proxy.status(a), InstanceStatus::Ready);
        assert_eq!(proxy.bind(a).len(), 4);
        // partial set was rolled back
        assert_eq!(device.live_buffers(), 8);
    }

    #[test]
    fn destroy_releases_buffers() {
        let (device, mut proxy) = proxy();
        let id = InstanceId::next();
        proxy.create(id, Vec3::ONE);
        proxy.submit(id, &store(3)).unwrap();
        assert_eq!(device.live_buffers(), 8);

        proxy.destroy(id);
        assert_eq!(proxy.status(id), InstanceStatus::Removed);
        assert_eq!(device.live_buffers(), 4);
        proxy.destroy(id);
        assert_eq!(device.live_buffers(), 4);
    }

    #[test]
    fn held_buffers_outlive_destroy() {
        let (device, mut proxy) = proxy();
        let id = InstanceId::next();
        proxy.create(id, Vec3::ONE);
        proxy.submit(id, &store(3)).unwrap();
        let held = proxy.bind(id);

        proxy.destroy(id);
        assert_eq!(device.live_buffers(), 8);
        assert_eq!(device.read(held.positions).map(|r| r.len()), Some(3));

        drop(held);
        assert_eq!(proxy.collect_retired(), 0);
        assert_eq!(device.live_buffers(), 4);
    }

    #[test]
    fn ensure_current_uploads_only_newer_data() {
        let (device, mut proxy) = proxy();
        let id = InstanceId::next();
        proxy.create(id, Vec3::ONE);
        let first = store(2);
        proxy.ensure_current(id, &first).unwrap();
        let bound = proxy.bind(id);

        proxy.ensure_current(id, &first).unwrap();
        assert!(Arc::ptr_eq(&bound, &proxy.bind(id)));
        drop(bound);

        let second = store(5);
        assert!(proxy.needs_upload(id, &second));
        proxy.ensure_current(id, &second).unwrap();
        assert_eq!(proxy.bind(id).len(), 5);
        assert!(!proxy.needs_upload(id, &second));
        assert_eq!(device.live_buffers(), 8);
    }

    #[test]
    fn drop_releases_everything() {
        let (device, mut proxy) = proxy();
        let id = InstanceId::next();
        proxy.create(id, Vec3::ONE);
        proxy.submit(id, &store(2)).unwrap();
        let _held = proxy.bind(id);
        drop(proxy);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.used_bytes(), 0);
    }
}
