//! `Accept` header negotiation.

use crate::marshal::essence;

struct MediaRange {
    kind: String,
    subtype: String,
    quality: f32,
}

impl MediaRange {
    fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let media = essence(parts.next()?);
        let (kind, subtype) = media.split_once('/')?;
        let (kind, subtype) = (kind.to_string(), subtype.to_string());
        let quality = parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);
        Some(Self {
            kind,
            subtype,
            quality,
        })
    }

    /// 2 for an exact match, 1 for `type/*`, 0 for `*/*`.
    fn precedence(&self, kind: &str, subtype: &str) -> Option<u8> {
        match (self.kind.as_str(), self.subtype.as_str()) {
            ("*", "*") => Some(0),
            (k, "*") if k == kind => Some(1),
            (k, s) if k == kind && s == subtype => Some(2),
            _ => None,
        }
    }
}

/// Picks the produced type the client accepts with the highest quality.
///
/// Ties keep the route's preference order. A missing or empty `Accept`
/// header accepts the first produced type. `None` means nothing produced
/// is acceptable.
pub fn select<S: AsRef<str>>(accept: Option<&str>, produces: &[S]) -> Option<String> {
    let ranges: Vec<MediaRange> = accept
        .map(|a| a.split(',').filter_map(MediaRange::parse).collect())
        .unwrap_or_default();
    if ranges.is_empty() {
        return produces.first().map(|p| p.as_ref().to_string());
    }

    let mut best: Option<(&str, f32)> = None;
    for produced in produces {
        let produced = produced.as_ref();
        let media = essence(produced);
        let Some((kind, subtype)) = media.split_once('/') else {
            continue;
        };
        // The most specific matching range decides the quality.
        let quality = ranges
            .iter()
            .filter_map(|r| r.precedence(kind, subtype).map(|p| (p, r.quality)))
            .max_by_key(|(precedence, _)| *precedence)
            .map(|(_, q)| q)
            .unwrap_or(0.0);
        if quality > 0.0 && best.is_none_or(|(_, q)| quality > q) {
            best = Some((produced, quality));
        }
    }
    best.map(|(produced, _)| produced.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: [&str; 2] = ["application/json", "text/plain"];

    #[test]
    fn test_missing_accept_takes_first() {
        assert_eq!(select(None, &BOTH).as_deref(), Some("application/json"));
        assert_eq!(select(Some(""), &BOTH).as_deref(), Some("application/json"));
    }

    #[test]
    fn test_quality_ordering() {
        assert_eq!(
            select(Some("application/json;q=0.5, text/plain"), &BOTH).as_deref(),
            Some("text/plain")
        );
        assert_eq!(
            select(Some("text/*;q=0.9, */*;q=0.1"), &BOTH).as_deref(),
            Some("text/plain")
        );
        // Equal quality keeps the route's order.
        assert_eq!(select(Some("*/*"), &BOTH).as_deref(), Some("application/json"));
    }

    #[test]
    fn test_specific_range_overrides_wildcard() {
        assert_eq!(
            select(Some("*/*, application/json;q=0"), &BOTH).as_deref(),
            Some("text/plain")
        );
    }

    #[test]
    fn test_nothing_acceptable() {
        assert_eq!(select(Some("image/png"), &BOTH), None);
        assert_eq!(select(Some("application/json;q=0"), &["application/json"]), None);
    }

    #[test]
    fn test_browser_header() {
        let accept = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
        assert_eq!(select(Some(accept), &["text/html"]).as_deref(), Some("text/html"));
        assert_eq!(select(Some(accept), &BOTH).as_deref(), Some("application/json"));
    }
}
