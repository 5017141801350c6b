//! Source URL validation against the supplier domain allow-list.

use url::Url;

use crate::error::{Error, Result};

/// Supplier domains the queue accepts. Subdomains (`m.`, `www.`, `detail.`) match too.
pub const ALLOWED_DOMAINS: [&str; 2] = ["alibaba.com", "aliexpress.com"];

/// Parse `raw` and check scheme and host. Returns the normalized URL.
pub fn validate_source_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| Error::Validation(format!("malformed url {trimmed:?}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Validation(format!(
            "unsupported scheme {:?} in {trimmed:?}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| Error::Validation(format!("url {trimmed:?} has no host")))?;

    if !is_allowed_host(host) {
        return Err(Error::Validation(format!(
            "host {host:?} is not an allowed source domain"
        )));
    }

    Ok(url)
}

/// Split a raw batch into normalized acceptable URLs and a rejected count.
///
/// Blank lines are ignored; a batch with nothing else is a validation error.
pub fn partition_batch<I, S>(urls: I) -> Result<(Vec<String>, u64)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen_any = false;
    let mut rejected = 0;
    let mut valid = Vec::new();
    for raw in urls {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            continue;
        }
        seen_any = true;
        match validate_source_url(raw) {
            Ok(url) => valid.push(String::from(url)),
            Err(e) => {
                tracing::debug!(url = %raw, error = %e, "url rejected");
                rejected += 1;
            }
        }
    }
    if !seen_any {
        return Err(Error::Validation("no urls supplied".to_string()));
    }
    Ok((valid, rejected))
}

fn is_allowed_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    ALLOWED_DOMAINS.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}
