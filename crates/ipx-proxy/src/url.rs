/// Public URL of a proxied image.
///
/// `cdn_url` wins over `base_url` when set. With both empty the URL is
/// relative (`/img/...`).
#[must_use]
pub fn image_url(base_url: &str, cdn_url: &str, preset: &str, did: &str, cid: &str) -> String {
    let prefix = if cdn_url.is_empty() { base_url } else { cdn_url };
    format!(
        "{}/img/{preset}/plain/{did}/{cid}",
        prefix.trim_end_matches('/')
    )
}
