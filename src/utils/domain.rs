use url::Url;

/// Returns true for addresses that can be attributed time at all. Anything that is not plain
/// http(s) (extension pages, `about:`, files) is ignored.
pub fn is_web_url(url: &str) -> bool {
    let lowercase = url.trim_start().to_ascii_lowercase();
    lowercase.starts_with("http://") || lowercase.starts_with("https://")
}

/// Hostname of a strictly parsed url. `None` means the address can't be attributed to a domain.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
}
