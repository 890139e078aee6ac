//! Platform detection from media URLs

/// Detect the source platform of a URL.
///
/// Returns a lowercase tag (`youtube`, `instagram`, `tiktok`, `twitter`,
/// `facebook`, `vimeo`, `dailymotion`) or `unknown`.
pub fn detect_platform(url: &str) -> &'static str {
    let url = url.to_lowercase();

    if url.contains("youtube.com") || url.contains("youtu.be") {
        return "youtube";
    }
    if url.contains("instagram.com") {
        return "instagram";
    }
    if url.contains("tiktok.com") || url.contains("vm.tiktok.com") || url.contains("vt.tiktok.com") {
        return "tiktok";
    }
    if url.contains("twitter.com") || url.contains("x.com") {
        return "twitter";
    }
    if url.contains("facebook.com") || url.contains("fb.watch") {
        return "facebook";
    }
    if url.contains("vimeo.com") {
        return "vimeo";
    }
    if url.contains("dailymotion.com") {
        return "dailymotion";
    }

    "unknown"
}
