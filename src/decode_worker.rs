//! Turns fetched cover bytes into sized images and writes network covers
//! through to the disk cache.

use std::sync::Arc;

use log::{debug, warn};

use crate::cover_request::{CoverImages, CoverRequest};
use crate::image_pipeline::{fit_sample_factor, nearest_sample_factor, CoverDecoder};

/// Decodes `request.cover_bytes` into `request.images` and releases the bytes.
///
/// Leaves `images` empty when the bytes cannot be decoded.
pub fn decode_cover(request: &mut CoverRequest, decoder: &dyn CoverDecoder) {
    request.images = None;
    let Some(bytes) = request.cover_bytes.take().filter(|bytes| !bytes.is_empty()) else {
        debug!("No cover bytes to decode for {}", request.key);
        return;
    };
    let Some((width, height)) = decoder.dimensions(&bytes) else {
        debug!(
            "Unreadable cover for {} from {}",
            request.key,
            request.last_provider_name()
        );
        return;
    };

    if request.last_provider_is_local() {
        let factor = request
            .sizing
            .cached_cover_max_size
            .map_or(1, |max_size| fit_sample_factor(width, height, max_size));
        request.images = decoder.decode(&bytes, factor).map(CoverImages::single);
        return;
    }

    let Some(full) = decoder.decode(&bytes, 1).map(Arc::new) else {
        debug!("Cover for {} failed to decode", request.key);
        return;
    };
    let factor = request
        .sizing
        .cover_max_size
        .map_or(1, |max_size| nearest_sample_factor(width, height, max_size));
    let primary = if factor > 1 {
        match decoder.decode(&bytes, factor) {
            Some(sampled) => Arc::new(sampled),
            None => Arc::clone(&full),
        }
    } else {
        Arc::clone(&full)
    };
    drop(bytes);

    let mut images = CoverImages {
        full: (!Arc::ptr_eq(&primary, &full)).then(|| Arc::clone(&full)),
        primary,
    };
    let providers = Arc::clone(&request.providers);
    if request.last_provider != providers.cache_index() {
        if let Some(store) = providers.cache_store() {
            match store.save(&request.key, &full) {
                Ok(path) => debug!("Saved cover for {} to {}", request.key, path.display()),
                Err(err) => warn!("Cannot cache cover for {}: {}", request.key, err),
            }
            // The full-size copy only existed for the cache.
            images.full = None;
        }
    }
    request.images = Some(images);
}
