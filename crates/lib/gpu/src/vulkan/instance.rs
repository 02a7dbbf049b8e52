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

use std::ffi::{c_void, CStr, CString};

use ash::{
    extensions::{ext, khr},
    vk,
};
use log::{debug, error, info, warn};

use crate::{BackendError, BackendResult, DeviceConfig};

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[{:?}] {}", ty, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[{:?}] {}", ty, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("[{:?}] {}", ty, message),
        _ => debug!("[{:?}] {}", ty, message),
    }

    vk::FALSE
}

pub struct Instance {
    pub(crate) entry: ash::Entry,
    pub(crate) raw: ash::Instance,
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface: Option<khr::Surface>,
}

impl Instance {
    /// Loads Vulkan and creates instance.
    ///
    /// `extensions` are extra instance extensions, usually the surface ones
    /// required by a windowing system. Surface support is enabled only when
    /// `VK_KHR_surface` is among them.
    pub fn new(config: &DeviceConfig, extensions: &[&CStr]) -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }?;
        let app_name = CString::new(config.app_name.as_str())
            .map_err(|_| BackendError::Other("Application name contains NUL".into()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .engine_name(&app_name)
            .api_version(Self::vulkan_version())
            .build();

        let mut instance_extensions = extensions.iter().map(|x| x.as_ptr()).collect::<Vec<_>>();
        let mut layers = Vec::new();
        if config.validation {
            let available = entry.enumerate_instance_layer_properties()?;
            let found = available.iter().any(|layer| {
                (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
            });
            if found {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                warn!("Validation requested, but validation layer isn't installed");
            }
            instance_extensions.push(ext::DebugUtils::name().as_ptr());
        }

        let raw = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&app_info)
                    .enabled_extension_names(&instance_extensions)
                    .enabled_layer_names(&layers)
                    .build(),
                None,
            )
        }?;

        let debug_utils = if config.validation {
            let debug_utils = ext::DebugUtils::new(&entry, &raw);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback))
                .build();
            match unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(err) => {
                    warn!("Can't create debug messenger: {:?}", err);
                    None
                }
            }
        } else {
            None
        };

        let surface = extensions
            .contains(&khr::Surface::name())
            .then(|| khr::Surface::new(&entry, &raw));

        info!(
            "Vulkan instance created, validation {}",
            if debug_utils.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            raw,
            debug_utils,
            surface,
        })
    }

    pub fn vulkan_version() -> u32 {
        vk::API_VERSION_1_3
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.raw
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub(crate) fn get_debug_utils(&self) -> Option<&ext::DebugUtils> {
        self.debug_utils.as_ref().map(|(debug_utils, _)| debug_utils)
    }

    pub(crate) fn surface_loader(&self) -> BackendResult<&khr::Surface> {
        self.surface
            .as_ref()
            .ok_or_else(|| BackendError::ExtensionNotFound("VK_KHR_surface".into()))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}
