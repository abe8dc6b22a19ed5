use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use {
    claude_skills_common::{Error, Result},
    claude_skills_config::RateLimitConfig,
};

/// Bucket a request is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointCategory {
    Search,
    Download,
    Install,
    Default,
}

impl EndpointCategory {
    /// Classify a request path or URL by substring.
    pub fn from_path(path: &str) -> Self {
        if path.contains("/search") {
            Self::Search
        } else if path.contains("/download") {
            Self::Download
        } else if path.contains("/install") {
            Self::Install
        } else {
            Self::Default
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Download => "download",
            Self::Install => "install",
            Self::Default => "default",
        }
    }
}

enum Decision {
    Allowed,
    Denied { retry_after: Duration },
}

/// Sliding-window request caps per [`EndpointCategory`].
///
/// Each check discards timestamps older than the window, then admits the
/// request only if fewer than `max` remain.
pub struct RateLimiter {
    limits: RateLimitConfig,
    window: Duration,
    requests: Mutex<HashMap<EndpointCategory, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimitConfig) -> Self {
        let window = Duration::from_secs(limits.window_secs);
        Self {
            limits,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    fn max_for(&self, category: EndpointCategory) -> Option<usize> {
        let max = match category {
            EndpointCategory::Search => self.limits.search,
            EndpointCategory::Download => self.limits.download,
            EndpointCategory::Install => self.limits.install,
            EndpointCategory::Default => return None,
        };
        Some(max as usize)
    }

    pub fn check(&self, category: EndpointCategory) -> Result<()> {
        self.check_at(category, Instant::now())
    }

    /// Admit or reject one request at `now`. A rejected request is not counted.
    pub fn check_at(&self, category: EndpointCategory, now: Instant) -> Result<()> {
        match self.decide(category, now) {
            Decision::Allowed => Ok(()),
            Decision::Denied { retry_after } => {
                let secs = retry_after.as_secs_f64().ceil() as u64;
                Err(Error::rate_limited(
                    format!(
                        "Rate limit exceeded for {}. Please wait {secs} seconds.",
                        category.as_str()
                    ),
                    Some(secs),
                ))
            },
        }
    }

    fn decide(&self, category: EndpointCategory, now: Instant) -> Decision {
        let Some(max) = self.max_for(category) else {
            return Decision::Allowed;
        };

        let mut requests = self
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamps = requests.entry(category).or_default();
        while stamps
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            stamps.pop_front();
        }

        if stamps.len() >= max {
            let retry_after = stamps.front().map_or(self.window, |oldest| {
                self.window
                    .saturating_sub(now.saturating_duration_since(*oldest))
            });
            return Decision::Denied { retry_after };
        }
        stamps.push_back(now);
        Decision::Allowed
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(search: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            search,
            download: 2,
            install: 1,
            window_secs: 3600,
        })
    }

    #[test]
    fn classify_paths() {
        assert_eq!(
            EndpointCategory::from_path("/functions/v1/search?q=x"),
            EndpointCategory::Search
        );
        assert_eq!(
            EndpointCategory::from_path("/functions/v1/download-skill"),
            EndpointCategory::Download
        );
        assert_eq!(
            EndpointCategory::from_path("/api/v1/install/track"),
            EndpointCategory::Install
        );
        assert_eq!(
            EndpointCategory::from_path("/api/v1/user/me"),
            EndpointCategory::Default
        );
    }

    #[test]
    fn max_requests_then_reject_then_recover() {
        let limiter = limiter(5);
        let start = Instant::now();
        for i in 0..5 {
            limiter
                .check_at(EndpointCategory::Search, start + Duration::from_secs(i))
                .unwrap();
        }

        let err = limiter
            .check_at(EndpointCategory::Search, start + Duration::from_secs(10))
            .unwrap_err();
        let Error::RateLimit {
            message,
            retry_after_secs,
        } = err
        else {
            panic!("expected a rate limit error");
        };
        assert!(message.contains("search"));
        assert_eq!(retry_after_secs, Some(3590));

        // The first slot frees once its timestamp leaves the window.
        limiter
            .check_at(EndpointCategory::Search, start + Duration::from_secs(3600))
            .unwrap();
        assert!(
            limiter
                .check_at(EndpointCategory::Search, start + Duration::from_secs(3600))
                .is_err()
        );
        limiter
            .check_at(EndpointCategory::Search, start + Duration::from_secs(7300))
            .unwrap();
    }

    #[test]
    fn categories_are_independent() {
        let limiter = limiter(1);
        let now = Instant::now();
        limiter.check_at(EndpointCategory::Search, now).unwrap();
        limiter.check_at(EndpointCategory::Download, now).unwrap();
        limiter.check_at(EndpointCategory::Install, now).unwrap();
        assert!(limiter.check_at(EndpointCategory::Search, now).is_err());
        assert!(limiter.check_at(EndpointCategory::Install, now).is_err());
        limiter.check_at(EndpointCategory::Download, now).unwrap();
    }

    #[test]
    fn default_category_is_uncapped() {
        let limiter = limiter(1);
        let now = Instant::now();
        for _ in 0..1000 {
            limiter.check_at(EndpointCategory::Default, now).unwrap();
        }
    }
}
