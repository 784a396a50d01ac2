//! GPU resource cache: compiled programs, offscreen framebuffers and
//! feedback ping-pong pairs, all evicted by a shared retention window.
//!
//! Keys follow the compiler's deterministic ids, so recompiling an
//! unchanged graph keeps every cache entry warm. A key counts as live while
//! the most recent compilation mentions it; everything else ages out once
//! untouched for longer than the retention window.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::Result;

use super::gpu::{FramebufferHandle, GpuBackend, ProgramHandle, TextureHandle};

#[derive(Debug)]
struct CachedProgram {
    handle: ProgramHandle,
    last_used: Instant,
    /// Pass ids currently using this program; shader dedup means several
    /// passes can share one compilation.
    pass_ids: HashSet<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct CachedFramebuffer {
    pub fbo: FramebufferHandle,
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
struct FramebufferEntry {
    fb: CachedFramebuffer,
    last_used: Instant,
}

#[derive(Debug)]
struct PingPongSlot {
    halves: [CachedFramebuffer; 2],
    /// Index of the half holding the previous frame's result. Reads come
    /// from here; writes go to the other half; `swap` flips after a draw.
    active: usize,
    last_used: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub programs: usize,
    pub framebuffers: usize,
    pub feedback_slots: usize,
    pub time_since_last_cleanup: Duration,
}

#[derive(Debug)]
pub struct ResourceCache {
    retention: Duration,
    programs: HashMap<u64, CachedProgram>,
    /// Pass id -> source hash that failed to compile; retried only when the
    /// source changes, so a broken shader logs once instead of every frame.
    failed: HashMap<String, u64>,
    framebuffers: HashMap<String, FramebufferEntry>,
    feedback: HashMap<String, PingPongSlot>,
    last_cleanup: Instant,
}

impl ResourceCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            programs: HashMap::new(),
            failed: HashMap::new(),
            framebuffers: HashMap::new(),
            feedback: HashMap::new(),
            last_cleanup: Instant::now(),
        }
    }

    /// Timestamp stamped onto entries created by a `prevent_cleanup`
    /// render: reusable immediately, evictable immediately.
    fn cold_stamp(&self, now: Instant) -> Instant {
        now.checked_sub(self.retention).unwrap_or(now)
    }

    /// Fetch or compile the program for a pass. Returns `None` when the
    /// shader fails to compile; the failure is remembered per pass id and
    /// source hash so later frames skip the pass without re-logging.
    pub fn program(
        &mut self,
        gpu: &mut dyn GpuBackend,
        pass_id: &str,
        vertex_source: &str,
        fragment_source: &str,
        now: Instant,
        refresh: bool,
    ) -> Option<ProgramHandle> {
        let hash = fnv1a64_pair(vertex_source, fragment_source);
        if self.failed.get(pass_id) == Some(&hash) {
            return None;
        }

        if let Some(entry) = self.programs.get_mut(&hash) {
            if refresh {
                entry.last_used = now;
            }
            entry.pass_ids.insert(pass_id.to_string());
            self.failed.remove(pass_id);
            return Some(entry.handle);
        }

        match gpu.compile_program(pass_id, vertex_source, fragment_source) {
            Ok(handle) => {
                let last_used = if refresh { now } else { self.cold_stamp(now) };
                self.programs.insert(
                    hash,
                    CachedProgram {
                        handle,
                        last_used,
                        pass_ids: [pass_id.to_string()].into(),
                    },
                );
                self.failed.remove(pass_id);
                Some(handle)
            }
            Err(e) => {
                log::warn!("pass '{pass_id}' failed to compile, skipping: {e:#}");
                self.failed.insert(pass_id.to_string(), hash);
                None
            }
        }
    }

    /// Fetch or allocate the offscreen target for `key`, reallocating on
    /// resolution change.
    pub fn framebuffer(
        &mut self,
        gpu: &mut dyn GpuBackend,
        key: &str,
        width: u32,
        height: u32,
        now: Instant,
        refresh: bool,
    ) -> Result<CachedFramebuffer> {
        if let Some(entry) = self.framebuffers.get_mut(key) {
            if entry.fb.width == width && entry.fb.height == height {
                if refresh {
                    entry.last_used = now;
                }
                return Ok(entry.fb);
            }
            gpu.destroy_framebuffer(entry.fb.fbo);
            gpu.destroy_texture(entry.fb.texture);
            self.framebuffers.remove(key);
        }
        let (fbo, texture) = gpu.create_framebuffer(width, height)?;
        let fb = CachedFramebuffer {
            fbo,
            texture,
            width,
            height,
        };
        let last_used = if refresh { now } else { self.cold_stamp(now) };
        self.framebuffers
            .insert(key.to_string(), FramebufferEntry { fb, last_used });
        Ok(fb)
    }

    /// Make sure the ping-pong pair for `key` exists at the right size.
    pub fn ensure_feedback(
        &mut self,
        gpu: &mut dyn GpuBackend,
        key: &str,
        width: u32,
        height: u32,
        now: Instant,
        refresh: bool,
    ) -> Result<()> {
        if let Some(slot) = self.feedback.get_mut(key) {
            if slot.halves[0].width == width && slot.halves[0].height == height {
                if refresh {
                    slot.last_used = now;
                }
                return Ok(());
            }
            for half in slot.halves {
                gpu.destroy_framebuffer(half.fbo);
                gpu.destroy_texture(half.texture);
            }
            self.feedback.remove(key);
        }
        let mut halves = Vec::with_capacity(2);
        for _ in 0..2 {
            let (fbo, texture) = gpu.create_framebuffer(width, height)?;
            halves.push(CachedFramebuffer {
                fbo,
                texture,
                width,
                height,
            });
        }
        let last_used = if refresh { now } else { self.cold_stamp(now) };
        self.feedback.insert(
            key.to_string(),
            PingPongSlot {
                halves: [halves[0], halves[1]],
                active: 0,
                last_used,
            },
        );
        Ok(())
    }

    /// The previous frame's result for `key` (the active half).
    pub fn feedback_read(&self, key: &str) -> Option<TextureHandle> {
        self.feedback
            .get(key)
            .map(|slot| slot.halves[slot.active].texture)
    }

    /// Where the current frame writes (the inactive half).
    pub fn feedback_write(&self, key: &str) -> Option<FramebufferHandle> {
        self.feedback
            .get(key)
            .map(|slot| slot.halves[1 - slot.active].fbo)
    }

    /// Flip after the feedback pass draws, making the freshly written half
    /// the one readers see.
    pub fn swap_feedback(&mut self, key: &str) {
        if let Some(slot) = self.feedback.get_mut(key) {
            slot.active = 1 - slot.active;
        }
    }

    /// Destroy everything not referenced by `live` that has sat untouched
    /// past the retention window.
    pub fn evict(&mut self, gpu: &mut dyn GpuBackend, live: &HashSet<String>, now: Instant) {
        let retention = self.retention;
        let expired = |last_used: Instant| {
            now.checked_duration_since(last_used)
                .is_some_and(|age| age >= retention)
        };

        self.programs.retain(|_, entry| {
            let in_use = entry.pass_ids.iter().any(|id| live.contains(id));
            if in_use || !expired(entry.last_used) {
                return true;
            }
            gpu.destroy_program(entry.handle);
            false
        });
        self.failed.retain(|pass_id, _| live.contains(pass_id));

        self.framebuffers.retain(|key, entry| {
            if live.contains(key) || !expired(entry.last_used) {
                return true;
            }
            gpu.destroy_framebuffer(entry.fb.fbo);
            gpu.destroy_texture(entry.fb.texture);
            false
        });

        self.feedback.retain(|key, slot| {
            if live.contains(key) || !expired(slot.last_used) {
                return true;
            }
            for half in slot.halves {
                gpu.destroy_framebuffer(half.fbo);
                gpu.destroy_texture(half.texture);
            }
            false
        });

        self.last_cleanup = now;
    }

    pub fn last_cleanup(&self) -> Instant {
        self.last_cleanup
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            programs: self.programs.len(),
            framebuffers: self.framebuffers.len() + self.feedback.len() * 2,
            feedback_slots: self.feedback.len(),
            time_since_last_cleanup: self.last_cleanup.elapsed(),
        }
    }

    /// Drop every GPU resource immediately, live or not.
    pub fn clear(&mut self, gpu: &mut dyn GpuBackend) {
        for (_, entry) in self.programs.drain() {
            gpu.destroy_program(entry.handle);
        }
        for (_, entry) in self.framebuffers.drain() {
            gpu.destroy_framebuffer(entry.fb.fbo);
            gpu.destroy_texture(entry.fb.texture);
        }
        for (_, slot) in self.feedback.drain() {
            for half in slot.halves {
                gpu.destroy_framebuffer(half.fbo);
                gpu.destroy_texture(half.texture);
            }
        }
        self.failed.clear();
    }
}

pub(crate) fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn fnv1a64_pair(a: &str, b: &str) -> u64 {
    let mut hash = fnv1a64(a.as_bytes());
    hash ^= fnv1a64(b.as_bytes()).rotate_left(1);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpu::NullGpu;

    const RETENTION: Duration = Duration::from_secs(10);

    #[test]
    fn identical_sources_share_one_program() {
        let mut gpu = NullGpu::new();
        let mut cache = ResourceCache::new(RETENTION);
        let now = Instant::now();
        let a = cache.program(&mut gpu, "pass_a", "v", "f", now, true).unwrap();
        let b = cache.program(&mut gpu, "pass_b", "v", "f", now, true).unwrap();
        assert_eq!(a, b);
        assert_eq!(gpu.programs_compiled, 1);
    }

    #[test]
    fn failed_compile_is_remembered_until_source_changes() {
        let mut gpu = NullGpu::new();
        gpu.fail_compiles_for("broken");
        let mut cache = ResourceCache::new(RETENTION);
        let now = Instant::now();
        assert!(cache.program(&mut gpu, "broken", "v", "bad", now, true).is_none());
        assert!(cache.program(&mut gpu, "broken", "v", "bad", now, true).is_none());
        // Second attempt never reached the backend.
        assert_eq!(gpu.programs_compiled, 0);
        // An edited source retries (and in this rigged backend fails anew).
        assert!(cache.program(&mut gpu, "broken", "v", "fixed", now, true).is_none());
    }

    #[test]
    fn eviction_spares_live_and_recent_entries() {
        let mut gpu = NullGpu::new();
        let mut cache = ResourceCache::new(Duration::ZERO);
        let now = Instant::now();
        cache.program(&mut gpu, "keep", "v", "f1", now, true);
        cache.program(&mut gpu, "drop", "v", "f2", now, true);
        cache.framebuffer(&mut gpu, "drop_fb", 8, 8, now, true).unwrap();

        let live: HashSet<String> = ["keep".to_string()].into();
        cache.evict(&mut gpu, &live, now);

        assert_eq!(cache.stats().programs, 1);
        assert_eq!(gpu.programs_destroyed, 1);
        assert_eq!(gpu.framebuffers_destroyed, 1);
    }

    #[test]
    fn resize_reallocates_the_framebuffer() {
        let mut gpu = NullGpu::new();
        let mut cache = ResourceCache::new(RETENTION);
        let now = Instant::now();
        let first = cache.framebuffer(&mut gpu, "fb", 8, 8, now, true).unwrap();
        let same = cache.framebuffer(&mut gpu, "fb", 8, 8, now, true).unwrap();
        assert_eq!(first.fbo, same.fbo);
        let resized = cache.framebuffer(&mut gpu, "fb", 16, 16, now, true).unwrap();
        assert_ne!(first.fbo, resized.fbo);
        assert_eq!(gpu.framebuffers_destroyed, 1);
    }

    #[test]
    fn feedback_reads_active_half_and_writes_the_other() {
        let mut gpu = NullGpu::new();
        let mut cache = ResourceCache::new(RETENTION);
        let now = Instant::now();
        cache.ensure_feedback(&mut gpu, "sim", 8, 8, now, true).unwrap();

        let read_before = cache.feedback_read("sim").unwrap();
        let write_before = cache.feedback_write("sim").unwrap();
        cache.swap_feedback("sim");
        let read_after = cache.feedback_read("sim").unwrap();

        assert_ne!(read_before, read_after);
        // The half written last frame is the one read this frame.
        let slot_written = cache.feedback_write("sim").unwrap();
        assert_ne!(write_before, slot_written);
    }

    #[test]
    fn cold_entries_from_prevent_cleanup_evict_immediately() {
        let mut gpu = NullGpu::new();
        let mut cache = ResourceCache::new(RETENTION);
        let now = Instant::now();
        cache.program(&mut gpu, "warmup", "v", "f", now, false);
        cache.evict(&mut gpu, &HashSet::new(), now);
        assert_eq!(cache.stats().programs, 0);
    }
}
