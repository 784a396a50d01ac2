use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

/// Metadata + raw bytes for a single asset.
#[derive(Debug, Clone)]
pub struct AssetData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub original_name: String,
}

/// Thread-safe, clone-friendly in-memory asset cache keyed by asset id.
///
/// Every replacement bumps a per-asset generation counter; the texture
/// registry compares generations instead of hashing bytes to decide whether
/// a GPU upload is stale.
#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    inner: Arc<Mutex<HashMap<String, (AssetData, u64)>>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an asset. If the `asset_id` already exists, this is a no-op
    /// (content-addressed dedup).
    pub fn insert(&self, asset_id: impl Into<String>, data: AssetData) {
        let asset_id = asset_id.into();
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        map.entry(asset_id).or_insert((data, 0));
    }

    /// Insert or replace an asset unconditionally, bumping its generation.
    pub fn insert_or_replace(&self, asset_id: impl Into<String>, data: AssetData) {
        let asset_id = asset_id.into();
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        let generation = map.get(&asset_id).map(|(_, g)| g + 1).unwrap_or(0);
        map.insert(asset_id, (data, generation));
    }

    /// Retrieve a clone of the asset data for the given id.
    pub fn get(&self, asset_id: &str) -> Option<AssetData> {
        let map = self.inner.lock().ok()?;
        map.get(asset_id).map(|(data, _)| data.clone())
    }

    /// Current generation of an asset, if present.
    pub fn generation(&self, asset_id: &str) -> Option<u64> {
        let map = self.inner.lock().ok()?;
        map.get(asset_id).map(|(_, g)| *g)
    }

    /// Check if an asset exists without cloning its bytes.
    pub fn contains(&self, asset_id: &str) -> bool {
        self.inner
            .lock()
            .ok()
            .is_some_and(|map| map.contains_key(asset_id))
    }

    /// Remove an asset by id.
    pub fn remove(&self, asset_id: &str) -> Option<AssetData> {
        self.inner.lock().ok()?.remove(asset_id).map(|(data, _)| data)
    }

    /// Clear all assets.
    pub fn clear(&self) {
        if let Ok(mut map) = self.inner.lock() {
            map.clear();
        }
    }

    /// Decode an asset's bytes as an image, RGBA8. Returns `None` if the
    /// asset is missing, or an error if the bytes cannot be decoded.
    pub fn load_image(&self, asset_id: &str) -> Result<Option<image::RgbaImage>> {
        let Some(data) = self.get(asset_id) else {
            return Ok(None);
        };
        let img = image::load_from_memory(&data.bytes)
            .with_context(|| format!("failed to decode image for asset '{asset_id}'"))?;
        Ok(Some(img.to_rgba8()))
    }
}
