//! Built-in pattern tables for well-known third-party identifiers.
//!
//! Storage rules match storage keys; script rules match script URLs and
//! inline script text. The two tables are maintained independently.

use crate::{ConsentCategory, PatternRule};

use ConsentCategory::{Analytics, Marketing, Necessary, Preferences};

/// Built-in storage key rules
pub fn storage_rules() -> Vec<PatternRule> {
    vec![
        // === NECESSARY ===
        PatternRule::literal("__Host-", Necessary).describe("Host-locked security cookie"),
        PatternRule::literal("__Secure-", Necessary).describe("Secure-prefixed cookie"),
        PatternRule::literal("csrftoken", Necessary).describe("CSRF protection token"),
        PatternRule::literal("XSRF-TOKEN", Necessary).describe("CSRF protection token"),
        PatternRule::literal("PHPSESSID", Necessary).describe("PHP session"),
        PatternRule::literal("JSESSIONID", Necessary).describe("Java session"),
        // === GOOGLE ===
        PatternRule::literal("_ga", Analytics).describe("Google Analytics"),
        PatternRule::literal("_gid", Analytics).describe("Google Analytics session id"),
        PatternRule::literal("_gcl_", Marketing).describe("Google Ads conversion linker"),
        PatternRule::literal("__gads", Marketing).describe("Google AdSense"),
        PatternRule::literal("__gpi", Marketing).describe("Google AdSense"),
        // === META ===
        PatternRule::literal("_fbp", Marketing).describe("Meta pixel browser id"),
        PatternRule::literal("_fbc", Marketing).describe("Meta click id"),
        // === ANALYTICS VENDORS ===
        PatternRule::literal("_hj", Analytics).describe("Hotjar"),
        PatternRule::literal("_clck", Analytics).describe("Microsoft Clarity user id"),
        PatternRule::literal("_clsk", Analytics).describe("Microsoft Clarity session"),
        PatternRule::literal("mp_", Analytics).describe("Mixpanel"),
        PatternRule::regex(r"^(amp_|AMP_)", Analytics).describe("Amplitude"),
        PatternRule::literal("amplitude_", Analytics).describe("Amplitude"),
        PatternRule::literal("ajs_", Analytics).describe("Segment"),
        PatternRule::literal("_pk_", Analytics).describe("Matomo"),
        PatternRule::literal("plausible_", Analytics).describe("Plausible"),
        // === ADVERTISING / CRM ===
        PatternRule::literal("__hs", Marketing).describe("HubSpot"),
        PatternRule::literal("hubspotutk", Marketing).describe("HubSpot visitor token"),
        PatternRule::literal("_ttp", Marketing).describe("TikTok pixel"),
        PatternRule::literal("_uet", Marketing).describe("Microsoft Advertising UET"),
        PatternRule::literal("_pin_unauth", Marketing).describe("Pinterest tag"),
        PatternRule::literal("li_", Marketing).describe("LinkedIn Insight"),
        PatternRule::literal("_rdt_uuid", Marketing).describe("Reddit pixel"),
        PatternRule::literal("_scid", Marketing).describe("Snapchat pixel"),
        // === PREFERENCES ===
        PatternRule::literal("intercom-", Preferences).describe("Intercom messenger"),
        PatternRule::literal("theme", Preferences).describe("Colour theme"),
        PatternRule::literal("lang", Preferences).describe("Language"),
        PatternRule::literal("locale", Preferences).describe("Locale"),
        PatternRule::literal("currency", Preferences).describe("Currency"),
    ]
}

/// Built-in script URL and inline content rules
pub fn script_rules() -> Vec<PatternRule> {
    vec![
        // === GOOGLE ===
        PatternRule::regex(r"googletagmanager\.com", Analytics).describe("Google Tag Manager"),
        PatternRule::regex(r"google-analytics\.com", Analytics).describe("Google Analytics"),
        PatternRule::regex(r"doubleclick\.net", Marketing).describe("Google DoubleClick"),
        PatternRule::regex(r"googlesyndication\.com", Marketing).describe("Google AdSense"),
        PatternRule::regex(r"googleadservices\.com", Marketing).describe("Google Ads"),
        // === META ===
        PatternRule::regex(r"connect\.facebook\.net", Marketing).describe("Meta pixel"),
        PatternRule::regex(r"\bfbq\s*\(", Marketing).describe("Meta pixel inline"),
        // === ANALYTICS VENDORS ===
        PatternRule::regex(r"static\.hotjar\.com|\bhj\s*\(", Analytics).describe("Hotjar"),
        PatternRule::regex(r"clarity\.ms", Analytics).describe("Microsoft Clarity"),
        PatternRule::regex(r"cdn\.segment\.com", Analytics).describe("Segment"),
        PatternRule::regex(r"cdn\.mxpnl\.com|mixpanel\.com", Analytics).describe("Mixpanel"),
        PatternRule::regex(r"cdn\.amplitude\.com", Analytics).describe("Amplitude"),
        // === ADVERTISING / CRM ===
        PatternRule::regex(r"snap\.licdn\.com", Marketing).describe("LinkedIn Insight"),
        PatternRule::regex(r"analytics\.tiktok\.com|\bttq\.", Marketing).describe("TikTok pixel"),
        PatternRule::regex(r"js\.hs-scripts\.com|js\.hs-analytics\.net", Marketing).describe("HubSpot"),
        PatternRule::regex(r"s\.pinimg\.com/ct", Marketing).describe("Pinterest tag"),
        PatternRule::regex(r"bat\.bing\.com", Marketing).describe("Microsoft Advertising UET"),
        PatternRule::regex(r"sc-static\.net/scevent", Marketing).describe("Snapchat pixel"),
        // === PREFERENCES ===
        PatternRule::regex(r"widget\.intercom\.io", Preferences).describe("Intercom messenger"),
        // Inline gtag/dataLayer bootstraps, checked after the vendor hosts
        PatternRule::regex(r"\bgtag\s*\(|\bdataLayer\b", Analytics).describe("Google tag inline"),
    ]
}
