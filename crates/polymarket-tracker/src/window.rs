//! Time window arithmetic for rolling up/down markets
//!
//! A window is `[start, end)` with `end = start + L`; `end` is the resolution instant.
//! Two framings are supported:
//! - `Ceiling`: the next boundary strictly after now is the resolution instant and names
//!   the market (`btc-up-or-down-in-5-minutes-<end>`)
//! - `Floor`: the boundary at or before now is the start and names the market
//!   (`btc-updown-5m-<start>`)

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default window length (5 minutes)
pub const DEFAULT_WINDOW_SECS: i64 = 300;

/// Which boundary frames the current window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    Ceiling,
    Floor,
}

impl WindowPolicy {
    /// Slug prefix used by the markets this framing matches
    pub fn default_slug_prefix(&self) -> &'static str {
        match self {
            WindowPolicy::Ceiling => "btc-up-or-down-in-5-minutes",
            WindowPolicy::Floor => "btc-updown-5m",
        }
    }
}

impl FromStr for WindowPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ceiling" | "ceil" => Ok(WindowPolicy::Ceiling),
            "floor" => Ok(WindowPolicy::Floor),
            other => anyhow::bail!("Unknown window policy: {} (expected ceiling|floor)", other),
        }
    }
}

/// One resolution window, Unix seconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    /// Window whose resolution instant is `end`
    pub fn ending_at(end: i64, window_secs: i64) -> Self {
        Self { start: end - window_secs, end }
    }

    /// Window starting at `start`
    pub fn starting_at(start: i64, window_secs: i64) -> Self {
        Self { start, end: start + window_secs }
    }

    /// Current window for `now` under `policy`
    pub fn resolve(now: i64, window_secs: i64, policy: WindowPolicy) -> Self {
        match policy {
            WindowPolicy::Ceiling => {
                // Strictly after now: a boundary hit exactly belongs to the closing window
                let end = (now.div_euclid(window_secs) + 1) * window_secs;
                Self::ending_at(end, window_secs)
            }
            WindowPolicy::Floor => {
                let start = now.div_euclid(window_secs) * window_secs;
                Self::starting_at(start, window_secs)
            }
        }
    }

    pub fn len_secs(&self) -> i64 {
        self.end - self.start
    }

    /// Seconds until resolution, never negative
    pub fn remaining(&self, now: i64) -> i64 {
        (self.end - now).max(0)
    }

    /// Seconds since start, clamped to `[0, len]`
    pub fn elapsed(&self, now: i64) -> u64 {
        let len = self.len_secs();
        (len - (self.end - now)).clamp(0, len) as u64
    }

    /// Market slug for this window under `policy`
    pub fn slug(&self, prefix: &str, policy: WindowPolicy) -> String {
        let ts = match policy {
            WindowPolicy::Ceiling => self.end,
            WindowPolicy::Floor => self.start,
        };
        format!("{}-{}", prefix.trim_end_matches('-'), ts)
    }
}

/// Accept a slug or a market URL; URLs contribute their last non-empty path segment
pub fn slug_from_input(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if input.contains("://") {
        let url = url::Url::parse(input).ok()?;
        return url
            .path_segments()?
            .filter(|s| !s.is_empty())
            .last()
            .map(|s| s.to_string());
    }
    let slug = input.split(['?', '#']).next().unwrap_or(input);
    slug.trim_matches('/').rsplit('/').next().filter(|s| !s.is_empty()).map(|s| s.to_string())
}

/// Trailing numeric timestamp of a slug: "btc-updown-5m-1767603600" -> 1767603600
pub fn slug_timestamp(slug: &str) -> Option<i64> {
    slug.rsplit('-').next().and_then(|s| s.parse::<i64>().ok())
}

/// Window of an explicitly named market
///
/// Date-driven framing (`end_ts` from the market's endDate) wins; otherwise the slug's
/// trailing timestamp is read as the resolution instant (`Ceiling`) or the start (`Floor`).
pub fn window_for_slug(
    slug: &str,
    end_ts: Option<i64>,
    window_secs: i64,
    policy: WindowPolicy,
) -> Option<TimeWindow> {
    if let Some(end) = end_ts {
        return Some(TimeWindow::ending_at(end, window_secs));
    }
    let ts = slug_timestamp(slug)?;
    Some(match policy {
        WindowPolicy::Ceiling => TimeWindow::ending_at(ts, window_secs),
        WindowPolicy::Floor => TimeWindow::starting_at(ts, window_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const L: i64 = DEFAULT_WINDOW_SECS;

    #[test]
    fn test_ceiling_mid_window() {
        let w = TimeWindow::resolve(1_767_603_601, L, WindowPolicy::Ceiling);
        assert_eq!(w.end, 1_767_603_900);
        assert_eq!(w.start, 1_767_603_600);
    }

    #[test]
    fn test_ceiling_on_boundary_moves_forward() {
        let w = TimeWindow::resolve(1_767_603_600, L, WindowPolicy::Ceiling);
        assert_eq!(w.end, 1_767_603_900);
    }

    #[test]
    fn test_floor_window() {
        let w = TimeWindow::resolve(1_767_603_899, L, WindowPolicy::Floor);
        assert_eq!(w.start, 1_767_603_600);
        assert_eq!(w.end, w.start + L);

        let on_boundary = TimeWindow::resolve(1_767_603_600, L, WindowPolicy::Floor);
        assert_eq!(on_boundary.start, 1_767_603_600);
    }

    #[test]
    fn test_resolution_is_start_plus_len() {
        for now in [0, 1, 299, 300, 301, 1_767_603_777] {
            for policy in [WindowPolicy::Ceiling, WindowPolicy::Floor] {
                let w = TimeWindow::resolve(now, L, policy);
                assert_eq!(w.end, w.start + L);
                assert!(w.start <= now && now < w.end);
            }
        }
    }

    #[test]
    fn test_elapsed_and_remaining() {
        let w = TimeWindow::starting_at(1000, L);
        assert_eq!(w.remaining(1000), 300);
        assert_eq!(w.elapsed(1000), 0);
        assert_eq!(w.elapsed(1120), 120);
        assert_eq!(w.remaining(1300), 0);
        assert_eq!(w.remaining(1400), 0);
        assert_eq!(w.elapsed(1400), 300);
        assert_eq!(w.elapsed(900), 0);
    }

    #[test]
    fn test_slug_naming() {
        let w = TimeWindow::starting_at(1_767_603_600, L);
        assert_eq!(
            w.slug("btc-up-or-down-in-5-minutes", WindowPolicy::Ceiling),
            "btc-up-or-down-in-5-minutes-1767603900"
        );
        assert_eq!(w.slug("btc-updown-5m-", WindowPolicy::Floor), "btc-updown-5m-1767603600");
    }

    #[test]
    fn test_slug_from_input() {
        assert_eq!(slug_from_input("btc-updown-5m-1").as_deref(), Some("btc-updown-5m-1"));
        assert_eq!(
            slug_from_input("https://polymarket.com/event/btc-updown-5m-1767603600/?tid=9")
                .as_deref(),
            Some("btc-updown-5m-1767603600")
        );
        assert_eq!(
            slug_from_input("polymarket.com/event/some-slug#x").as_deref(),
            Some("some-slug")
        );
        assert_eq!(slug_from_input("   "), None);
    }

    #[test]
    fn test_window_for_slug() {
        let w = window_for_slug("btc-updown-5m-1767603600", None, L, WindowPolicy::Floor).unwrap();
        assert_eq!(w.end, 1_767_603_900);

        let w = window_for_slug("x-1767603900", None, L, WindowPolicy::Ceiling).unwrap();
        assert_eq!(w.start, 1_767_603_600);

        let w = window_for_slug("no-ts", Some(5000), L, WindowPolicy::Floor).unwrap();
        assert_eq!(w.end, 5000);

        assert!(window_for_slug("no-ts", None, L, WindowPolicy::Floor).is_none());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("CEILING".parse::<WindowPolicy>().unwrap(), WindowPolicy::Ceiling);
        assert_eq!("floor".parse::<WindowPolicy>().unwrap(), WindowPolicy::Floor);
        assert!("other".parse::<WindowPolicy>().is_err());
    }
}
