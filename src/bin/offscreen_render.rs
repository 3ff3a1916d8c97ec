//! Render a small generated world offscreen with wgpu and save it as a PNG
//!
//! Usage: offscreen_render [output.png]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use cgmath::{perspective, Deg, Matrix4, Point3, Vector3};
use image::{ImageBuffer, Rgba, RgbaImage};
use level_geometry::{
    Block, BlockData, DimensionId, FrameTarget, LevelGeometry, LevelGeometryOptions, MemoryWorld,
    RenderSettings, RenderSettingsHandle, ResourcePack, ResourcePackHandle, VerticalBounds, WgpuBackend,
};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;
const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// cgmath produces OpenGL clip space, wgpu expects depth in 0..1
#[rustfmt::skip]
const OPENGL_TO_WGPU: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

fn build_world() -> MemoryWorld {
    let world = MemoryWorld::new(VerticalBounds::new(0, 64));
    let dimension = DimensionId::new("minecraft:overworld");
    let stone = Block::parse("stone");
    let glass = Block::parse("glass");

    for cx in -3..=3 {
        for cz in -3..=3 {
            // Leave one chunk out so its placeholder shows up
            if (cx, cz) == (2, -2) {
                continue;
            }
            let mut data = BlockData::new();
            for x in 0..16 {
                for z in 0..16 {
                    let height = 2 + ((x + z) % 4) as i64;
                    for y in 0..height {
                        data.set_block(x, y, z, &stone);
                    }
                }
            }
            data.set_block(8, 8, 8, &glass);
            world.insert_chunk(&dimension, cx, cz, data);
        }
    }
    world
}

async fn create_device() -> Result<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            force_fallback_adapter: false,
            compatible_surface: None,
        })
        .await
        .ok_or_else(|| anyhow!("no GPU adapter available"))?;
    log::info!("[offscreen_render] Using adapter {:?}", adapter.get_info().name);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Offscreen Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        )
        .await?;
    Ok((device, queue))
}

/// Copy a colour texture into an image, dropping the row padding wgpu requires
fn read_texture(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<RgbaImage> {
    let unpadded_bytes_per_row = WIDTH * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Screenshot Staging Buffer"),
        size: u64::from(padded_bytes_per_row * HEIGHT),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Screenshot Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(HEIGHT),
            },
        },
        wgpu::Extent3d {
            width: WIDTH,
            height: HEIGHT,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()??;

    let mut image = ImageBuffer::new(WIDTH, HEIGHT);
    {
        let data = slice.get_mapped_range();
        for (y, row) in data.chunks(padded_bytes_per_row as usize).enumerate() {
            for (x, pixel) in row[..unpadded_bytes_per_row as usize].chunks_exact(4).enumerate() {
                image.put_pixel(x as u32, y as u32, Rgba([pixel[0], pixel[1], pixel[2], pixel[3]]));
            }
        }
    }
    staging.unmap();
    Ok(image)
}

fn main() -> Result<()> {
    env_logger::init();
    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "level_geometry.png".to_string());

    let (device, queue) = pollster::block_on(create_device())?;
    let device = Arc::new(device);
    let queue = Arc::new(queue);

    let color = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Color Target"),
        size: wgpu::Extent3d {
            width: WIDTH,
            height: HEIGHT,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: COLOR_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    let mut backend = WgpuBackend::new(device.clone(), queue.clone(), COLOR_FORMAT);
    let depth = backend.create_depth_view(WIDTH, HEIGHT);
    backend.set_frame_target(FrameTarget {
        color: color.create_view(&wgpu::TextureViewDescriptor::default()),
        depth,
        clear_color: Some(wgpu::Color {
            r: 0.5,
            g: 0.7,
            b: 0.9,
            a: 1.0,
        }),
    });

    let world = Arc::new(build_world());
    let pack = ResourcePackHandle::with_pack(ResourcePack::builtin()?);
    let options = LevelGeometryOptions::new(world, pack)
        .with_settings(RenderSettingsHandle::new(RenderSettings::new(3, 5)));
    let mut geometry = LevelGeometry::new(backend, options)?;

    geometry.init_gl()?;
    geometry.set_dimension("minecraft:overworld")?;
    geometry.start()?;

    // Wait for the 7x7 square around the camera
    let started = Instant::now();
    while geometry.stats().with_geometry < 49 {
        geometry.process_pending()?;
        if started.elapsed() > Duration::from_secs(30) {
            return Err(anyhow!("meshing did not finish: {:?}", geometry.stats()));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    log::info!("[offscreen_render] Meshed in {:?}", started.elapsed());

    let projection = OPENGL_TO_WGPU * perspective(Deg(60.0), WIDTH as f32 / HEIGHT as f32, 0.1, 500.0);
    let view = Matrix4::look_at_rh(
        Point3::new(-40.0, 50.0, -40.0),
        Point3::new(8.0, 0.0, 8.0),
        Vector3::unit_y(),
    );
    geometry.paint(projection, view)?;

    let image = read_texture(&device, &queue, &color)?;
    image
        .save(&output)
        .with_context(|| format!("saving {}", output))?;
    println!("Saved {}", output);

    geometry.destroy_gl()?;
    Ok(())
}
