use reqwest::Url;

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Percent-encodes `params` and appends them to `url` as a query string.
///
/// The url itself is left as given; only the pairs go through `Url`.
pub(crate) fn append_query(url: &str, params: &[(&str, &str)]) -> String {
    let query = match Url::parse(SCRATCH) {
        Ok(mut scratch) => {
            scratch.query_pairs_mut().extend_pairs(params);
            scratch.query().unwrap_or_default().to_string()
        }
        Err(_) => params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&"),
    };
    if query.is_empty() {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, sep, query)
}

/// Percent-encodes `segment` so it stays a single path segment.
pub(crate) fn path_segment(segment: &str) -> String {
    let Ok(mut scratch) = Url::parse(SCRATCH) else {
        return segment.to_string();
    };
    if let Ok(mut segments) = scratch.path_segments_mut() {
        segments.clear().push(segment);
    }
    scratch.path().trim_start_matches('/').to_string()
}

const SCRATCH: &str = "http://localhost/";

/// `filename` parameter of a `Content-Disposition` header value.
pub(crate) fn filename_from_disposition(value: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let (k, v) = param.split_once('=')?;
        if !k.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let v = strip_quotes(v.trim());
        // Never let the server pick a directory.
        let v = v.rsplit(['/', '\\']).next().unwrap_or(v);
        if v.is_empty() || v == "." || v == ".." {
            None
        } else {
            Some(v.to_string())
        }
    })
}

pub(crate) fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urljoin() {
        assert_eq!(urljoin("http://gw/", "job/1"), "http://gw/job/1");
        assert_eq!(urljoin("http://gw", "/data"), "http://gw/data");
        assert_eq!(urljoin("http://gw", "https://other/x"), "https://other/x");
    }

    #[test]
    fn test_append_query_encodes() {
        assert_eq!(
            append_query("http://gw/service", &[("perPage", "1000"), ("keyword", "my svc&co")]),
            "http://gw/service?perPage=1000&keyword=my+svc%26co"
        );
        assert_eq!(append_query("gw/event", &[("a", "b")]), "gw/event?a=b");
        assert_eq!(append_query("http://gw/x?p=1", &[("a", "b")]), "http://gw/x?p=1&a=b");
    }

    #[test]
    fn test_append_query_keeps_url_verbatim() {
        assert_eq!(
            append_query("http://testURL.net/service", &[("keyword", "testSvc")]),
            "http://testURL.net/service?keyword=testSvc"
        );
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(path_segment("abc-123"), "abc-123");
        assert_eq!(path_segment("a/b?c#d"), "a%2Fb%3Fc%23d");
        assert_eq!(path_segment("has space"), "has%20space");
    }

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="scene.tif""#).as_deref(),
            Some("scene.tif")
        );
        assert_eq!(
            filename_from_disposition("attachment; FileName=out.geojson").as_deref(),
            Some("out.geojson")
        );
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="../../etc/passwd""#).as_deref(),
            Some("passwd")
        );
        assert_eq!(filename_from_disposition("attachment"), None);
        assert_eq!(filename_from_disposition(""), None);
    }
}
