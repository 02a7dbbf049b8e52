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

//! Frame loop on the software device: uploads on the copy queue, graphics
//! waits for them, swap chain images are rendered to and presented, temporary
//! resources are retired and destroyed a couple of frames later.

use std::sync::Arc;

use dess_gpu::{
    headless::HeadlessDevice, AcquireStatus, AddressMode, BackendError, BufferDesc, BufferUsage,
    DeviceConfig, DeviceResources, Filter, Format, QueueKind, ResourceCreateDesc, RtvDesc,
    SamplerDesc, SrvDesc, TextureDesc,
};
use log::{info, warn};

const FRAMES: u32 = 8;

fn main() -> Result<(), BackendError> {
    simple_logger::init_with_level(log::Level::Info).unwrap();

    let device = Arc::new(HeadlessDevice::new());
    let resources = DeviceResources::new(device.clone(), DeviceConfig::default())?;
    let swapchain =
        resources.create_swapchain(device.create_swapchain(3, Format::Bgra8Srgb, [1280, 720]))?;
    let graphics = resources
        .queue(QueueKind::Graphics)
        .ok_or(BackendError::QueueNotEnabled(QueueKind::Graphics))?
        .clone();
    let copy = resources
        .queue(QueueKind::Copy)
        .ok_or(BackendError::QueueNotEnabled(QueueKind::Copy))?
        .clone();

    let albedo = resources
        .create_resource(
            &ResourceCreateDesc::texture(
                TextureDesc::texture(Format::Rgba8Srgb, [512, 512]).mip_levels(10),
            )
            .name("albedo"),
        )?
        .ok_or(BackendError::NotSupported)?;
    let albedo_key = resources.track(albedo.clone());
    let sampler = resources.sampler(&SamplerDesc::new(
        Filter::Linear,
        Filter::Linear,
        AddressMode::Repeat,
    ))?;
    info!("Sampler {:?} ready", sampler);

    for frame in 0..FRAMES {
        resources.begin_frame()?;
        resources.acquire(albedo_key);
        let _albedo_view = albedo.srv(&SrvDesc::texture_2d());

        if let Some(staging) = resources.create_resource(
            &ResourceCreateDesc::upload(BufferDesc::new(64 * 1024, BufferUsage::Source))
                .name("staging"),
        )? {
            copy.chain().add_command_list(0, device.command_list());
            let uploaded = copy.submit_from_chain()?;
            graphics.chain().prepend_wait_fence(copy.fence(), uploaded);
            resources.retire(staging);
        }

        match swapchain.acquire(resources.config().acquire_timeout)? {
            AcquireStatus::Acquired(index) => {
                let _target = swapchain.image(index).rtv(&RtvDesc::texture_2d(0));
                graphics.chain().add_command_list(10, device.command_list());
                graphics.chain().add_command_list(20, device.command_list());
                resources.queue_submit(QueueKind::Graphics)?;
                swapchain.present(&graphics, index)?;
            }
            AcquireStatus::Timeout => warn!("Swap chain acquire timed out, frame skipped"),
            AcquireStatus::OutOfDate => {
                warn!("Swap chain is out of date");
                resources.end_frame()?;
                break;
            }
        }

        resources.end_frame()?;
        info!(
            "Frame {} done: {:?}, {} objects waiting in disposer",
            frame,
            device.live(),
            resources.with_disposer(|disposer| disposer.len())
        );
    }

    drop(sampler);
    resources.release(albedo_key);
    drop(albedo);
    drop(swapchain);
    resources.shutdown()?;
    info!(
        "Shut down: {:?}, {} submits",
        device.live(),
        device.stats().submits
    );

    Ok(())
}
