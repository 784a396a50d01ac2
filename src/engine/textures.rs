//! Texture resolution for sampler bindings that are not rendered by passes:
//! built-in bitmaps, asset-store images and externally-driven dynamic
//! buffers. Node output and feedback references resolve through the
//! resource cache instead.

use std::collections::HashMap;

use anyhow::{Result, anyhow};

use crate::asset_store::AssetStore;
use crate::types::TextureSource;

use super::gpu::{GpuBackend, TextureHandle};

#[derive(Debug)]
struct AssetEntry {
    handle: TextureHandle,
    generation: u64,
}

#[derive(Debug)]
struct DynamicEntry {
    handle: TextureHandle,
    width: u32,
    height: u32,
}

#[derive(Debug, Default)]
pub struct TextureRegistry {
    builtins: HashMap<String, TextureHandle>,
    assets: HashMap<String, AssetEntry>,
    dynamics: HashMap<String, DynamicEntry>,
    // Asset generations whose bytes failed to decode; retried only when the
    // store entry is replaced.
    failed_decodes: HashMap<String, u64>,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.builtins.len() + self.assets.len() + self.dynamics.len()
    }

    /// Resolve a non-pass texture reference, uploading on first use and
    /// re-uploading an asset whose store entry changed since last time.
    pub fn resolve(
        &mut self,
        gpu: &mut dyn GpuBackend,
        assets: &AssetStore,
        source: &TextureSource,
    ) -> Result<TextureHandle> {
        match source {
            TextureSource::Builtin(name) => self.builtin(gpu, name),
            TextureSource::Asset(id) => self.asset(gpu, assets, id),
            TextureSource::Dynamic(id) => match self.dynamics.get(id) {
                Some(entry) => Ok(entry.handle),
                None => self.builtin(gpu, "black"),
            },
            TextureSource::NodeOutput(id) | TextureSource::FeedbackSlot(id) => {
                Err(anyhow!("pass output '{id}' is not a registry texture"))
            }
        }
    }

    /// Push fresh pixels for a dynamic texture, reallocating when the size
    /// changes.
    pub fn update_dynamic(
        &mut self,
        gpu: &mut dyn GpuBackend,
        id: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<()> {
        if let Some(entry) = self.dynamics.get_mut(id) {
            if entry.width == width && entry.height == height {
                return gpu.update_texture(entry.handle, width, height, rgba);
            }
            gpu.destroy_texture(entry.handle);
            self.dynamics.remove(id);
        }
        let handle = gpu.upload_texture(width, height, rgba)?;
        self.dynamics.insert(
            id.to_string(),
            DynamicEntry {
                handle,
                width,
                height,
            },
        );
        Ok(())
    }

    fn builtin(&mut self, gpu: &mut dyn GpuBackend, name: &str) -> Result<TextureHandle> {
        if let Some(&handle) = self.builtins.get(name) {
            return Ok(handle);
        }
        let (w, h, pixels) = builtin_pixels(name)
            .ok_or_else(|| anyhow!("unknown builtin texture '{name}'"))?;
        let handle = gpu.upload_texture(w, h, &pixels)?;
        self.builtins.insert(name.to_string(), handle);
        Ok(handle)
    }

    fn asset(
        &mut self,
        gpu: &mut dyn GpuBackend,
        assets: &AssetStore,
        id: &str,
    ) -> Result<TextureHandle> {
        let generation = assets.generation(id);
        if let Some(entry) = self.assets.get(id) {
            if generation == Some(entry.generation) {
                return Ok(entry.handle);
            }
            let handle = entry.handle;
            gpu.destroy_texture(handle);
            self.assets.remove(id);
        }
        let stamp = generation.unwrap_or(0);
        if self.failed_decodes.get(id) == Some(&stamp) {
            return self.builtin(gpu, "black");
        }
        let img = match assets.load_image(id) {
            Ok(Some(img)) => img,
            Ok(None) => {
                // Missing asset renders black rather than failing the frame;
                // the upload happens once it arrives.
                return self.builtin(gpu, "black");
            }
            Err(err) => {
                // Undecodable bytes get the same treatment as a missing
                // asset; the rest of the graph keeps rendering.
                log::warn!("texture asset '{id}' failed to decode: {err:#}");
                self.failed_decodes.insert(id.to_string(), stamp);
                return self.builtin(gpu, "black");
            }
        };
        let (w, h) = img.dimensions();
        let handle = gpu.upload_texture(w, h, img.as_raw())?;
        self.failed_decodes.remove(id);
        self.assets.insert(
            id.to_string(),
            AssetEntry {
                handle,
                generation: generation.unwrap_or(0),
            },
        );
        Ok(handle)
    }

    pub fn clear(&mut self, gpu: &mut dyn GpuBackend) {
        for (_, handle) in self.builtins.drain() {
            gpu.destroy_texture(handle);
        }
        for (_, entry) in self.assets.drain() {
            gpu.destroy_texture(entry.handle);
        }
        for (_, entry) in self.dynamics.drain() {
            gpu.destroy_texture(entry.handle);
        }
        self.failed_decodes.clear();
    }
}

/// RGBA8 pixels for the built-in textures: solid white, solid black, and an
/// 8x8 black/white checkerboard.
fn builtin_pixels(name: &str) -> Option<(u32, u32, Vec<u8>)> {
    match name {
        "white" => Some((1, 1, vec![255, 255, 255, 255])),
        "black" => Some((1, 1, vec![0, 0, 0, 255])),
        "checker" => {
            let size = 8u32;
            let mut pixels = Vec::with_capacity((size * size * 4) as usize);
            for y in 0..size {
                for x in 0..size {
                    let on = (x / 4 + y / 4) % 2 == 0;
                    let v = if on { 255 } else { 0 };
                    pixels.extend_from_slice(&[v, v, v, 255]);
                }
            }
            Some((size, size, pixels))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_store::AssetData;
    use crate::engine::gpu::NullGpu;

    #[test]
    fn builtins_upload_once() {
        let mut gpu = NullGpu::new();
        let mut registry = TextureRegistry::new();
        let assets = AssetStore::new();
        let a = registry
            .resolve(&mut gpu, &assets, &TextureSource::Builtin("checker".into()))
            .unwrap();
        let b = registry
            .resolve(&mut gpu, &assets, &TextureSource::Builtin("checker".into()))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(gpu.textures_uploaded, 1);
    }

    #[test]
    fn missing_asset_falls_back_to_black() {
        let mut gpu = NullGpu::new();
        let mut registry = TextureRegistry::new();
        let assets = AssetStore::new();
        let handle = registry
            .resolve(&mut gpu, &assets, &TextureSource::Asset("nope".into()))
            .unwrap();
        let black = registry
            .resolve(&mut gpu, &assets, &TextureSource::Builtin("black".into()))
            .unwrap();
        assert_eq!(handle, black);
    }

    #[test]
    fn asset_replacement_reuploads() {
        let mut gpu = NullGpu::new();
        let mut registry = TextureRegistry::new();
        let assets = AssetStore::new();

        // 1x1 PNGs, encoded on the fly so the store sees real image bytes.
        let png = encode_png([10, 20, 30, 255]);
        assets.insert(
            "img",
            AssetData {
                bytes: png,
                mime_type: "image/png".into(),
                original_name: "img.png".into(),
            },
        );
        let first = registry
            .resolve(&mut gpu, &assets, &TextureSource::Asset("img".into()))
            .unwrap();
        assert_eq!(gpu.textures_uploaded, 1);

        assets.insert_or_replace(
            "img",
            AssetData {
                bytes: encode_png([200, 0, 0, 255]),
                mime_type: "image/png".into(),
                original_name: "img.png".into(),
            },
        );
        let second = registry
            .resolve(&mut gpu, &assets, &TextureSource::Asset("img".into()))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(gpu.textures_destroyed, 1);
    }

    #[test]
    fn undecodable_asset_falls_back_to_black_without_retrying() {
        let mut gpu = NullGpu::new();
        let mut registry = TextureRegistry::new();
        let assets = AssetStore::new();
        assets.insert(
            "junk",
            AssetData {
                bytes: b"not an image".to_vec(),
                mime_type: "image/png".into(),
                original_name: "junk.png".into(),
            },
        );

        let handle = registry
            .resolve(&mut gpu, &assets, &TextureSource::Asset("junk".into()))
            .unwrap();
        let black = registry
            .resolve(&mut gpu, &assets, &TextureSource::Builtin("black".into()))
            .unwrap();
        assert_eq!(handle, black);
        // Only the builtin was uploaded, and the bad bytes are not decoded
        // again until the store entry changes.
        assert_eq!(gpu.textures_uploaded, 1);
        registry
            .resolve(&mut gpu, &assets, &TextureSource::Asset("junk".into()))
            .unwrap();
        assert_eq!(gpu.textures_uploaded, 1);

        // Replacing the bytes with a real image recovers.
        assets.insert_or_replace(
            "junk",
            AssetData {
                bytes: encode_png([1, 2, 3, 255]),
                mime_type: "image/png".into(),
                original_name: "junk.png".into(),
            },
        );
        let fixed = registry
            .resolve(&mut gpu, &assets, &TextureSource::Asset("junk".into()))
            .unwrap();
        assert_ne!(fixed, black);
        assert_eq!(gpu.textures_uploaded, 2);
    }

    fn encode_png(pixel: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(1, 1, image::Rgba(pixel));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }
}
