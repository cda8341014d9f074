/// `Accept` value asking a server for a metalink representation.
pub const ACCEPT_METALINK: &str = "application/metalink4+xml";

/// True for `application/metalink+xml` and `application/metalink4+xml`,
/// with or without parameters.
pub fn is_metalink_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|t| t.trim().to_ascii_lowercase())
        .is_some_and(|t| t.starts_with("application/metalink"))
}

/// Target of the first `Link:` entry whose parameters name a metalink type.
///
/// The returned reference may be relative to the request URL.
///
/// ```
/// let v = r#"<http://h/f.meta4>; rel=describedby; type="application/metalink4+xml""#;
/// assert_eq!(strata_metalink::find_metalink_link(v).as_deref(), Some("http://h/f.meta4"));
/// ```
pub fn find_metalink_link(value: &str) -> Option<String> {
    let mut rest = value;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        let close = after.find('>')?;
        let target = &after[..close];
        let params_start = &after[close + 1..];
        // Parameters run until the next link entry.
        let params_end = params_start.find('<').unwrap_or(params_start.len());
        let params = &params_start[..params_end];
        if params.to_ascii_lowercase().contains("application/metalink") {
            return Some(target.trim().to_string());
        }
        rest = &params_start[params_end..];
    }
    None
}
