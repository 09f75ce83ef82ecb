//! Named device profiles.
//!
//! A run names its profile by a short key (`desktop`, `mobile`, ...). Unknown
//! keys resolve to the desktop profile so a typo degrades to the default
//! viewport instead of failing the run.

use serde::{Deserialize, Serialize};

/// Name of the fallback profile
pub const DEFAULT_PROFILE: &str = "desktop";

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
    AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const IPAD_UA: &str = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) \
    AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const ANDROID_UA: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36";

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in CSS pixels
    pub width: u32,
    /// Height in CSS pixels
    pub height: u32,
}

impl Viewport {
    /// Create a new viewport
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

/// Everything a session needs to emulate a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    /// Profile key
    pub name: String,
    /// Viewport dimensions
    pub viewport: Viewport,
    /// User agent string
    pub user_agent: String,
    /// Device pixel ratio
    pub device_scale_factor: f64,
    /// Mobile layout emulation
    pub is_mobile: bool,
    /// Touch events enabled
    pub has_touch: bool,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::desktop()
    }
}

impl DeviceProfile {
    fn preset(
        name: &str,
        (width, height): (u32, u32),
        user_agent: &str,
        device_scale_factor: f64,
        handheld: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            viewport: Viewport::new(width, height),
            user_agent: user_agent.to_string(),
            device_scale_factor,
            is_mobile: handheld,
            has_touch: handheld,
        }
    }

    /// 1920x1080 desktop
    #[must_use]
    pub fn desktop() -> Self {
        Self::preset(DEFAULT_PROFILE, (1920, 1080), DESKTOP_UA, 1.0, false)
    }

    /// 1366x768 laptop
    #[must_use]
    pub fn laptop() -> Self {
        Self::preset("laptop", (1366, 768), DESKTOP_UA, 1.0, false)
    }

    /// iPad-class tablet in portrait
    #[must_use]
    pub fn tablet() -> Self {
        Self::preset("tablet", (768, 1024), IPAD_UA, 2.0, true)
    }

    /// iPhone-class phone
    #[must_use]
    pub fn mobile() -> Self {
        Self::preset("mobile", (393, 852), IPHONE_UA, 3.0, true)
    }

    /// Android phone
    #[must_use]
    pub fn android() -> Self {
        Self::preset("android", (412, 915), ANDROID_UA, 2.625, true)
    }

    /// Every built-in profile
    #[must_use]
    pub fn presets() -> Vec<Self> {
        vec![
            Self::desktop(),
            Self::laptop(),
            Self::tablet(),
            Self::mobile(),
            Self::android(),
        ]
    }

    /// Look up a built-in profile by key (case-insensitive)
    #[must_use]
    pub fn find(name: &str) -> Option<Self> {
        Self::presets()
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Look up a profile, falling back to desktop for unknown keys
    #[must_use]
    pub fn resolve(name: &str) -> Self {
        Self::find(name).unwrap_or_else(|| {
            tracing::warn!(profile = name, "unknown device profile, using desktop");
            Self::desktop()
        })
    }
}
