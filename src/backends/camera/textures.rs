// SPDX-License-Identifier: GPL-3.0-only

//! Texture registrar for callers without a display surface

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use super::{BackendResult, TextureRegistrar};

/// Hands out texture ids and counts frame notifications per id
#[derive(Debug, Default)]
pub struct HeadlessTextureRegistrar {
    next_id: AtomicI64,
    frames: Mutex<HashMap<i64, u64>>,
}

impl HeadlessTextureRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames signalled for `texture_id`, `None` if it is not registered
    pub fn frames_available(&self, texture_id: i64) -> Option<u64> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&texture_id)
            .copied()
    }

    pub fn is_registered(&self, texture_id: i64) -> bool {
        self.frames_available(texture_id).is_some()
    }
}

impl TextureRegistrar for HeadlessTextureRegistrar {
    fn register_texture(&self) -> BackendResult<i64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, 0);
        debug!(texture_id = id, "Registered texture");
        Ok(id)
    }

    fn unregister_texture(&self, texture_id: i64) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&texture_id);
        debug!(texture_id, "Unregistered texture");
    }

    fn mark_texture_frame_available(&self, texture_id: i64) {
        if let Some(count) = self
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&texture_id)
        {
            *count += 1;
        }
    }
}
