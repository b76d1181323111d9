use url::Url;

/// Turns user input into something the media extractor understands.
///
/// Plain text becomes a search, a YouTube results page becomes a search for
/// its `search_query`, and any other URL is used as-is.
pub fn normalize_query(input: &str, search_prefix: &str) -> String {
    let query = input.trim();
    if !query.starts_with("http") {
        return format!("{search_prefix}{query}");
    }

    match youtube_search_terms(query) {
        Some(terms) => format!("{search_prefix}{terms}"),
        None => query.to_string(),
    }
}

fn youtube_search_terms(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    if !(host == "youtube.com" || host.ends_with(".youtube.com")) {
        return None;
    }
    url.query_pairs()
        .find(|(k, _)| k == "search_query")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::normalize_query;

    #[test]
    fn plain_text_becomes_search() {
        assert_eq!(
            normalize_query("  daft punk around the world ", "ytsearch:"),
            "ytsearch:daft punk around the world"
        );
    }

    #[test]
    fn youtube_results_page_is_unwrapped() {
        let q = normalize_query(
            "https://www.youtube.com/results?search_query=AC%2FDC+back+in+black",
            "ytsearch:",
        );
        assert_eq!(q, "ytsearch:AC/DC back in black");
    }

    #[test]
    fn other_urls_pass_through() {
        let watch = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        assert_eq!(normalize_query(watch, "ytsearch:"), watch);

        let other = "https://soundcloud.com/artist/song";
        assert_eq!(normalize_query(other, "ytsearch:"), other);
    }
}
