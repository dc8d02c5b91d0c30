use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

/// Upper bound on any configured max-age: one year in seconds.
pub const CACHE_MAX_AGE_LIMIT: u32 = 31_536_000;

/// Serving cache policy for current (mutable) and consistent
/// (content-addressed) metadata responses.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub current_max_age: u32,
    pub consistent_max_age: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            current_max_age: 300,
            consistent_max_age: CACHE_MAX_AGE_LIMIT,
        }
    }
}

impl CacheSettings {
    /// `Cache-Control` for current metadata: revalidate-once-stale, or
    /// fully uncacheable when max-age is zero.
    pub fn current_header(&self) -> String {
        if self.current_max_age == 0 {
            "max-age=0, no-cache, no-store".to_string()
        } else {
            format!("max-age={}, must-revalidate", self.current_max_age)
        }
    }

    /// `Cache-Control` for checksum- and version-addressed metadata, which
    /// never changes under its address.
    pub fn consistent_header(&self) -> String {
        if self.consistent_max_age == 0 {
            "max-age=0, no-cache, no-store".to_string()
        } else {
            format!("max-age={}", self.consistent_max_age)
        }
    }
}

/// IMF-fixdate formatting for `Last-Modified`.
pub fn http_date(value: OffsetDateTime) -> String {
    value
        .format(&Rfc2822)
        .map(|formatted| formatted.replace("+0000", "GMT"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn current_header_shapes() {
        let settings = CacheSettings {
            current_max_age: 300,
            consistent_max_age: 31_536_000,
        };
        assert_eq!(settings.current_header(), "max-age=300, must-revalidate");
        assert_eq!(settings.consistent_header(), "max-age=31536000");

        let uncached = CacheSettings {
            current_max_age: 0,
            consistent_max_age: 0,
        };
        assert_eq!(uncached.current_header(), "max-age=0, no-cache, no-store");
        assert_eq!(uncached.consistent_header(), "max-age=0, no-cache, no-store");
    }

    #[test]
    fn http_date_is_imf_fixdate() {
        let date = http_date(datetime!(2017-03-14 15:09:26 UTC));
        assert_eq!(date, "Tue, 14 Mar 2017 15:09:26 GMT");
    }
}
