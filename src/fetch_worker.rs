//! One fetch pass over the provider list, for either the cache or the
//! network tier.

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use crate::cover_ledger::CoverLedger;
use crate::cover_request::{CoverRequest, CoverState};
use crate::providers::CoverProvider;
use crate::transport::CoverTransport;

/// Everything a fetch job needs besides the request it owns.
#[derive(Clone)]
pub struct FetchContext {
    pub ledger: Arc<Mutex<CoverLedger>>,
    pub transport: Arc<dyn CoverTransport>,
}

impl FetchContext {
    fn is_blacklisted(&self, request: &CoverRequest, location: &str, volatile: &[String]) -> bool {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_blacklisted(&request.key, location, volatile)
    }

    fn record_location(&self, request: &CoverRequest, location: &str) {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_location(&request.key, location);
    }
}

/// Runs the tier matching `request.state`, resuming after
/// `request.last_provider`.
///
/// On success `cover_bytes` is set. On exhaustion it stays empty and the
/// cursor points at the last provider tried.
pub fn fetch_cover(request: &mut CoverRequest, context: &FetchContext) {
    let network_tier = match request.state {
        CoverState::WebFetch => true,
        CoverState::CacheFetch => false,
        other => {
            warn!("Fetch job for {} arrived in state {:?}", request.key, other);
            return;
        }
    };

    let providers = Arc::clone(&request.providers);
    let volatile = providers.volatile_prefixes();
    let start = request.last_provider.map_or(0, |index| index.saturating_add(1));

    for (index, provider) in providers.iter().enumerate().skip(start) {
        if provider.is_local_storage() == network_tier {
            continue;
        }
        if !provider.is_available() {
            debug!("Skipping unavailable cover provider {}", provider.name());
            continue;
        }

        request.last_provider = Some(index);
        debug!("Looking for cover {} with {}", request.key, provider.name());
        let locations =
            provider.resolve_locations(&request.key, request.parent_directory.as_deref());
        let Some(first) = locations.first() else {
            continue;
        };
        if context.is_blacklisted(request, first, &volatile) {
            debug!("Blacklisted cover location for {}: {}", request.key, first);
            continue;
        }

        if let Some((location, bytes)) =
            fetch_first_working(request, provider.as_ref(), &locations, &volatile, context)
        {
            if network_tier {
                context.record_location(request, &location);
            }
            debug!(
                "Cover for {} fetched from {} ({} bytes)",
                request.key,
                location,
                bytes.len()
            );
            request.cover_bytes = Some(bytes);
            return;
        }
        debug!(
            "No working cover location for {} with {}",
            request.key,
            provider.name()
        );
    }
}

fn fetch_first_working(
    request: &CoverRequest,
    provider: &dyn CoverProvider,
    locations: &[String],
    volatile: &[String],
    context: &FetchContext,
) -> Option<(String, Vec<u8>)> {
    for (position, location) in locations.iter().enumerate() {
        if position > 0 && context.is_blacklisted(request, location, volatile) {
            continue;
        }
        let fetched = if provider.is_local_storage() {
            context.transport.read_local(location)
        } else {
            context.transport.download(location)
        };
        match fetched {
            Ok(Some(bytes)) if !bytes.is_empty() => return Some((location.clone(), bytes)),
            Ok(_) => {}
            Err(err) => warn!("Cover fetch failure for {}: {}", request.key, err),
        }
    }
    None
}
