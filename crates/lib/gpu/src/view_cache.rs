// Copyright (C) 2023-2024 gigablaster

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::{collections::HashMap, sync::Arc};

use log::error;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::{BackendResult, Device, RawResource, ViewKind};

/// Views of one resource, at most one object per distinct descriptor.
///
/// Cache holds one reference to every view. Callers get clones of `Arc` and
/// must drop them before cache is cleared.
pub struct ViewCache<D: Device, K: ViewKind<D>> {
    owner: Option<RawResource<D>>,
    views: RwLock<HashMap<K::Desc, Arc<K::Raw>>>,
}

impl<D: Device, K: ViewKind<D>> Default for ViewCache<D, K> {
    fn default() -> Self {
        Self {
            owner: None,
            views: RwLock::default(),
        }
    }
}

impl<D: Device, K: ViewKind<D>> ViewCache<D, K> {
    pub fn new(owner: Option<RawResource<D>>) -> Self {
        Self {
            owner,
            views: RwLock::default(),
        }
    }

    /// Binds cache to a resource. Views made for previous owner are destroyed.
    pub fn init(&mut self, device: &D, owner: Option<RawResource<D>>) {
        self.clear(device);
        self.owner = owner;
    }

    pub fn owner(&self) -> Option<&RawResource<D>> {
        self.owner.as_ref()
    }

    pub fn get_or_create(&self, device: &D, desc: &K::Desc) -> BackendResult<Arc<K::Raw>> {
        let views = self.views.upgradable_read();
        if let Some(view) = views.get(desc) {
            Ok(view.clone())
        } else {
            let mut views = RwLockUpgradableReadGuard::upgrade(views);
            let view = Arc::new(K::create(device, self.owner.as_ref(), desc)?);
            views.insert(desc.clone(), view.clone());

            Ok(view)
        }
    }

    pub fn get(&self, desc: &K::Desc) -> Option<Arc<K::Raw>> {
        self.views.read().get(desc).cloned()
    }

    pub fn len(&self) -> usize {
        self.views.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.read().is_empty()
    }

    /// Destroys every cached view.
    ///
    /// # Panics
    ///
    /// In debug builds if somebody still holds a view. Release builds log
    /// and leak such views.
    pub fn clear(&self, device: &D) {
        let mut views = self.views.write();
        for (desc, view) in views.drain() {
            match Arc::try_unwrap(view) {
                Ok(raw) => K::destroy(device, raw),
                Err(view) => {
                    if cfg!(debug_assertions) {
                        panic!(
                            "{} {:?} is still referenced {} times outside of cache",
                            K::NAME,
                            desc,
                            Arc::strong_count(&view) - 1
                        );
                    }
                    error!("Leaking {} {:?}: still referenced", K::NAME, desc);
                }
            }
        }
    }
}

impl<D: Device, K: ViewKind<D>> Drop for ViewCache<D, K> {
    fn drop(&mut self) {
        let views = self.views.get_mut();
        if !views.is_empty() {
            error!("{} {} views dropped without destruction", views.len(), K::NAME);
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread};

    use crate::{
        headless::HeadlessDevice, BufferDesc, BufferUsage, Device, Format, RawResource,
        ShaderResource, SrvDesc, TextureDesc, UnorderedAccess, UavDesc,
    };

    use super::ViewCache;

    fn texture(device: &HeadlessDevice) -> RawResource<HeadlessDevice> {
        let (texture, _) = device
            .create_texture(
                &TextureDesc::texture(Format::Rgba8Unorm, [64, 64]),
                false,
                None,
            )
            .unwrap();
        RawResource::Texture(texture)
    }

    #[test]
    fn same_desc_same_view() {
        let device = HeadlessDevice::new();
        let cache = ViewCache::<_, ShaderResource>::new(Some(texture(&device)));
        let a = cache.get_or_create(&device, &SrvDesc::texture_2d()).unwrap();
        let b = cache.get_or_create(&device, &SrvDesc::texture_2d()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(1, device.live().views);
        drop((a, b));
        cache.clear(&device);
    }

    #[test]
    fn different_desc_different_view() {
        let device = HeadlessDevice::new();
        let cache = ViewCache::<_, ShaderResource>::new(Some(texture(&device)));
        let a = cache.get_or_create(&device, &SrvDesc::texture_2d()).unwrap();
        let b = cache
            .get_or_create(&device, &SrvDesc::texture_2d().format(Format::Rgba8Srgb))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(2, cache.len());
        drop((a, b));
        cache.clear(&device);
    }

    #[test]
    fn clear_destroys_views() {
        let device = HeadlessDevice::new();
        let cache = ViewCache::<_, ShaderResource>::new(Some(texture(&device)));
        cache.get_or_create(&device, &SrvDesc::texture_2d()).unwrap();
        cache
            .get_or_create(&device, &SrvDesc::texture_2d_array(0, 1))
            .unwrap();
        assert_eq!(2, device.live().views);
        cache.clear(&device);
        assert!(cache.is_empty());
        assert_eq!(0, device.live().views);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn clear_with_external_holder_panics() {
        let device = HeadlessDevice::new();
        let cache = ViewCache::<_, ShaderResource>::new(Some(texture(&device)));
        let _view = cache.get_or_create(&device, &SrvDesc::texture_2d()).unwrap();
        cache.clear(&device);
    }

    #[test]
    fn buffer_desc_on_texture_rejected() {
        let device = HeadlessDevice::new();
        let cache = ViewCache::<_, UnorderedAccess>::new(Some(texture(&device)));
        assert!(cache.get_or_create(&device, &UavDesc::raw(0, 16)).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn unbound_cache_rejected() {
        let device = HeadlessDevice::new();
        let cache = ViewCache::<_, ShaderResource>::default();
        assert!(cache.get_or_create(&device, &SrvDesc::texture_2d()).is_err());
    }

    #[test]
    fn init_rebinds_and_clears() {
        let device = HeadlessDevice::new();
        let mut cache = ViewCache::<_, ShaderResource>::new(Some(texture(&device)));
        cache.get_or_create(&device, &SrvDesc::texture_2d()).unwrap();
        let (buffer, _) = device
            .create_buffer(&BufferDesc::new(1024, BufferUsage::Storage), false, None)
            .unwrap();
        cache.init(&device, Some(RawResource::Buffer(buffer)));
        assert!(cache.is_empty());
        assert!(cache.owner().unwrap().is_buffer());
        cache
            .get_or_create(&device, &SrvDesc::structured(0, 32, 32))
            .unwrap();
        cache.clear(&device);
    }

    #[test]
    fn concurrent_lookups_create_once() {
        let device = Arc::new(HeadlessDevice::new());
        let cache = Arc::new(ViewCache::<_, ShaderResource>::new(Some(texture(&device))));
        let views = (0..8)
            .map(|_| {
                let device = device.clone();
                let cache = cache.clone();
                thread::spawn(move || {
                    cache
                        .get_or_create(&device, &SrvDesc::texture_2d())
                        .unwrap()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>();
        assert!(views.iter().all(|view| Arc::ptr_eq(view, &views[0])));
        assert_eq!(1, device.stats().views_created);
        drop(views);
        cache.clear(&device);
    }
}
