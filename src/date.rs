//! Cached `Date` header formatting.
//!
//! Grounded on hyper's `proto/h1/date.rs` `CachedDate` (a thread-local
//! buffer refreshed at most once per second), adapted to use the
//! `httpdate` crate instead of hyper's `time`-crate-based formatting — see
//! `DESIGN.md` for why — so the caching idiom is kept but the formatter
//! underneath it is swapped.

use std::cell::RefCell;
use std::time::{Duration, SystemTime};

struct CachedDate {
    value: String,
    next_update: SystemTime,
}

impl CachedDate {
    fn fresh() -> CachedDate {
        CachedDate {
            value: httpdate::fmt_http_date(SystemTime::now()),
            next_update: SystemTime::now() + Duration::from_secs(1),
        }
    }

    fn check(&mut self) {
        if SystemTime::now() >= self.next_update {
            *self = CachedDate::fresh();
        }
    }
}

thread_local!(static CACHE: RefCell<CachedDate> = RefCell::new(CachedDate::fresh()));

/// Returns the current `Date` header value (RFC 7231 IMF-fixdate),
/// refreshed at most once per second per thread.
pub fn now() -> String {
    CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        cache.check();
        cache.value.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_an_imf_fixdate_string() {
        let d = now();
        assert!(d.ends_with("GMT"));
    }
}
