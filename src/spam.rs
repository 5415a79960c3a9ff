use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const HOUR_WINDOW: Duration = Duration::from_secs(60 * 60);
const BLOCK_DURATION: Duration = Duration::from_secs(60 * 60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitViolation {
    #[error("You are temporarily blocked due to spam. Try again later.")]
    Blocked,
    #[error("You've exceeded the hourly message limit. Try again later.")]
    HourlyLimitExceeded,
    #[error("You're sending messages too quickly. Please slow down.")]
    Throttled,
}

#[derive(Debug, Default)]
struct UserWindow {
    /// Accepted event times, oldest first; pruned to the trailing hour on
    /// every check.
    events: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

/// Sliding-window rate limiter, sharded per user id so checks for unrelated
/// users never contend on one lock.
pub struct RateLimiter {
    max_per_minute: usize,
    max_per_hour: usize,
    windows: DashMap<String, UserWindow>,
}

impl RateLimiter {
    pub fn new(max_per_minute: usize, max_per_hour: usize) -> Self {
        RateLimiter {
            max_per_minute,
            max_per_hour,
            windows: DashMap::new(),
        }
    }

    /// Gate one event from `user_id` at `now`. Accepting records the event;
    /// rejections leave the window untouched.
    pub fn check_rate(&self, user_id: &str, now: Instant) -> Result<(), RateLimitViolation> {
        let mut entry = self.windows.entry(user_id.to_string()).or_default();
        let window = entry.value_mut();

        // An active block wins over everything, before any pruning.
        if let Some(until) = window.blocked_until {
            if until > now {
                return Err(RateLimitViolation::Blocked);
            }
            window.blocked_until = None;
        }

        if let Some(cutoff) = now.checked_sub(HOUR_WINDOW) {
            while window.events.front().is_some_and(|&t| t <= cutoff) {
                window.events.pop_front();
            }
        }

        if window.events.len() >= self.max_per_hour {
            window.blocked_until = Some(now + BLOCK_DURATION);
            return Err(RateLimitViolation::HourlyLimitExceeded);
        }

        let in_minute = match now.checked_sub(MINUTE_WINDOW) {
            Some(cutoff) => window
                .events
                .iter()
                .rev()
                .take_while(|&&t| t > cutoff)
                .count(),
            None => window.events.len(),
        };
        if in_minute >= self.max_per_minute {
            return Err(RateLimitViolation::Throttled);
        }

        window.events.push_back(now);
        Ok(())
    }

    /// Whether `user_id` sits in an unexpired block; expired blocks are
    /// evicted on the way out.
    #[allow(dead_code)]
    pub fn is_blocked(&self, user_id: &str, now: Instant) -> bool {
        let Some(mut entry) = self.windows.get_mut(user_id) else {
            return false;
        };
        match entry.blocked_until {
            Some(until) if until > now => true,
            Some(_) => {
                entry.blocked_until = None;
                false
            }
            None => false,
        }
    }

    /// Clear all rate state for `user_id` (admin action).
    #[allow(dead_code)]
    pub fn reset(&self, user_id: &str) {
        self.windows.remove(user_id);
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpamReason {
    #[error("Message contains excessive repeated characters")]
    RepeatedCharacters,
    #[error("Message contains too many URLs")]
    TooManyUrls,
    #[error("Message contains spam keywords")]
    SpamKeywords,
    #[error("Message is in all caps")]
    AllCaps,
}

const SPAM_KEYWORDS: &[&str] = &[
    "buy now",
    "click here",
    "limited time",
    "act now",
    "earn money",
    "work from home",
    "free money",
    "click link",
    "visit website",
    "pornography",
    "adult content",
    "xxx",
];

/// Rule-based spam check for plain-text bodies. Attachment payloads are
/// never passed through here.
#[allow(clippy::cast_precision_loss)]
pub fn classify(text: &str) -> Result<(), SpamReason> {
    let total = text.chars().count();

    if total > 0 {
        let mut counts: HashMap<char, usize> = HashMap::new();
        for c in text.chars() {
            *counts.entry(c).or_insert(0) += 1;
        }
        let limit = total as f64 * 0.7;
        if counts.values().any(|&n| n as f64 > limit) {
            return Err(SpamReason::RepeatedCharacters);
        }
    }

    let url_count = text.matches("http://").count() + text.matches("https://").count();
    if url_count > 2 {
        return Err(SpamReason::TooManyUrls);
    }

    let lowered = text.to_lowercase();
    if SPAM_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        return Err(SpamReason::SpamKeywords);
    }

    if total > 20
        && text.chars().any(char::is_alphabetic)
        && !text.chars().any(char::is_lowercase)
    {
        return Err(SpamReason::AllCaps);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excess_per_minute_is_throttled_and_not_recorded() {
        let limiter = RateLimiter::new(3, 100);
        let base = Instant::now();

        for i in 0..3 {
            assert!(limiter
                .check_rate("u1", base + Duration::from_secs(i))
                .is_ok());
        }
        assert_eq!(
            limiter.check_rate("u1", base + Duration::from_secs(3)),
            Err(RateLimitViolation::Throttled)
        );
        // Rejected events leave the window untouched, so a later retry inside
        // the same minute still sees only the three recorded events.
        assert_eq!(
            limiter.check_rate("u1", base + Duration::from_secs(4)),
            Err(RateLimitViolation::Throttled)
        );

        // A minute after the last accepted event the window clears.
        assert!(limiter
            .check_rate("u1", base + Duration::from_secs(63))
            .is_ok());
    }

    #[test]
    fn hourly_threshold_blocks_for_one_hour() {
        let limiter = RateLimiter::new(1000, 5);
        let base = Instant::now();

        for i in 0..5 {
            assert!(limiter
                .check_rate("u1", base + Duration::from_secs(i))
                .is_ok());
        }

        let trigger = base + Duration::from_secs(5);
        assert_eq!(
            limiter.check_rate("u1", trigger),
            Err(RateLimitViolation::HourlyLimitExceeded)
        );
        assert!(limiter.is_blocked("u1", trigger));

        // Every check inside the block window fails regardless of the window
        // contents.
        assert_eq!(
            limiter.check_rate("u1", trigger + Duration::from_secs(3599)),
            Err(RateLimitViolation::Blocked)
        );

        // Expiry is exactly one hour from the triggering check; afterwards
        // the stale window has been pruned away too.
        let after = trigger + Duration::from_secs(3601);
        assert!(!limiter.is_blocked("u1", after));
        assert!(limiter.check_rate("u1", after).is_ok());
    }

    #[test]
    fn users_are_limited_independently() {
        let limiter = RateLimiter::new(1, 100);
        let base = Instant::now();

        assert!(limiter.check_rate("u1", base).is_ok());
        assert_eq!(
            limiter.check_rate("u1", base),
            Err(RateLimitViolation::Throttled)
        );
        assert!(limiter.check_rate("u2", base).is_ok());
    }

    #[test]
    fn reset_clears_window_and_block() {
        let limiter = RateLimiter::new(1000, 1);
        let base = Instant::now();

        assert!(limiter.check_rate("u1", base).is_ok());
        assert_eq!(
            limiter.check_rate("u1", base),
            Err(RateLimitViolation::HourlyLimitExceeded)
        );
        assert!(limiter.is_blocked("u1", base));

        limiter.reset("u1");
        assert!(!limiter.is_blocked("u1", base));
        assert!(limiter.check_rate("u1", base).is_ok());
    }

    #[test]
    fn repeated_character_flood_is_rejected() {
        assert_eq!(
            classify("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            Err(SpamReason::RepeatedCharacters)
        );
        // One char at exactly 50% stays under the 70% bar.
        assert!(classify("AAAAAAAAAABBBBBBBBBB").is_ok());
        assert!(classify("hello world, this is a normal message").is_ok());
    }

    #[test]
    fn too_many_urls_is_rejected() {
        assert_eq!(
            classify("http://a.com http://b.com https://c.com"),
            Err(SpamReason::TooManyUrls)
        );
        assert!(classify("see http://a.com and https://b.com").is_ok());
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        assert_eq!(
            classify("BUY NOW and get rich"),
            Err(SpamReason::SpamKeywords)
        );
        assert_eq!(
            classify("please Click Here to win"),
            Err(SpamReason::SpamKeywords)
        );
    }

    #[test]
    fn long_all_caps_message_is_rejected() {
        assert_eq!(
            classify("THIS IS A VERY LOUD MESSAGE"),
            Err(SpamReason::AllCaps)
        );
        // Short shouting is tolerated.
        assert!(classify("WOW NICE").is_ok());
    }

    #[test]
    fn empty_message_is_accepted() {
        assert!(classify("").is_ok());
    }
}
