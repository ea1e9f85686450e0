use std::collections::BTreeMap;

pub(super) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

pub(super) fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}

/// Lowercased, name-ordered pairs; repeated headers are joined with ", ".
pub(super) fn flatten_headers(map: &http::HeaderMap) -> Vec<(String, String)> {
    let mut merged: BTreeMap<&str, String> = BTreeMap::new();
    for (name, value) in map {
        let value = String::from_utf8_lossy(value.as_bytes());
        merged
            .entry(name.as_str())
            .and_modify(|cur| {
                cur.push_str(", ");
                cur.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    merged
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
