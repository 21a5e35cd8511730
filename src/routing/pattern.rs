use crate::error::{Result, StratusError};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Constraint attached to a typed segment such as `{id:int}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SegmentType {
    Int,
    Uuid,
    Alpha,
}

impl SegmentType {
    fn accepts(self, raw: &str) -> bool {
        match self {
            SegmentType::Int => raw.parse::<i64>().is_ok(),
            SegmentType::Uuid => uuid::Uuid::parse_str(raw).is_ok(),
            SegmentType::Alpha => !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphabetic()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Static(String),
    Named(Arc<str>),
    Typed(Arc<str>, SegmentType),
    /// Swallows one or more trailing segments. `*` is anonymous, `{*rest}` binds.
    Wildcard(Option<Arc<str>>),
}

/// How specific a pattern is. Greater compares as more specific.
///
/// Static segments beat typed segments, typed beat named, any of them beat a
/// wildcard; remaining ties go to the longest static prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    statics: usize,
    typed: usize,
    named: usize,
    wildcard: bool,
    static_prefix: usize,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.statics
            .cmp(&other.statics)
            .then(self.typed.cmp(&other.typed))
            .then(self.named.cmp(&other.named))
            .then(other.wildcard.cmp(&self.wildcard))
            .then(self.static_prefix.cmp(&other.static_prefix))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed route path such as `/dogs/{id:int}/toys/*`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    specificity: Specificity,
}

pub type PathParams = Vec<(Arc<str>, String)>;

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let parts: Vec<&str> = split_path(raw).collect();

        for (index, part) in parts.iter().enumerate() {
            let last = index + 1 == parts.len();
            let segment = if *part == "*" {
                Segment::Wildcard(None)
            } else if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                parse_placeholder(raw, inner)?
            } else if part.contains('{') || part.contains('}') {
                return Err(StratusError::invalid_pattern(raw, format!("malformed segment '{part}'")));
            } else {
                Segment::Static((*part).to_string())
            };

            if matches!(segment, Segment::Wildcard(_)) && !last {
                return Err(StratusError::invalid_pattern(raw, "wildcard must be the last segment"));
            }
            segments.push(segment);
        }

        let specificity = Self::rank(&segments);
        Ok(Self {
            raw: normalize(raw),
            segments,
            specificity,
        })
    }

    fn rank(segments: &[Segment]) -> Specificity {
        let mut rank = Specificity {
            statics: 0,
            typed: 0,
            named: 0,
            wildcard: false,
            static_prefix: 0,
        };
        let mut in_prefix = true;
        for segment in segments {
            match segment {
                Segment::Static(_) => {
                    rank.statics += 1;
                    if in_prefix {
                        rank.static_prefix += 1;
                    }
                }
                Segment::Typed(..) => rank.typed += 1,
                Segment::Named(_) => rank.named += 1,
                Segment::Wildcard(_) => rank.wildcard = true,
            }
            if !matches!(segment, Segment::Static(_)) {
                in_prefix = false;
            }
        }
        rank
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn specificity(&self) -> Specificity {
        self.specificity
    }

    /// Names bound by this pattern, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Named(n) | Segment::Typed(n, _) => Some(n.as_ref()),
            Segment::Wildcard(Some(n)) => Some(n.as_ref()),
            _ => None,
        })
    }

    /// Shape of the pattern with parameter names erased: `/dogs/{}/toys`.
    /// Two patterns with the same shape can never be told apart.
    pub fn shape(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Static(v) => format!("/{v}"),
                Segment::Named(_) => "/{}".to_string(),
                Segment::Typed(_, ty) => format!("/{{:{ty}}}"),
                Segment::Wildcard(_) => "/*".to_string(),
            })
            .collect()
    }

    /// Matches a request path, returning decoded parameter values on success.
    ///
    /// A path that is not valid percent-encoded UTF-8 matches nothing.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let parts = decode_path(path).ok()?;
        self.matches_segments(&parts)
    }

    /// Matches already decoded path segments.
    pub fn matches_segments<S: AsRef<str>>(&self, parts: &[S]) -> Option<PathParams> {
        let mut params = PathParams::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard(name) => {
                    let rest = parts.get(index..).filter(|r| !r.is_empty())?;
                    if let Some(name) = name {
                        let joined: Vec<&str> = rest.iter().map(|s| s.as_ref()).collect();
                        params.push((name.clone(), joined.join("/")));
                    }
                    return Some(params);
                }
                Segment::Static(expected) => {
                    if parts.get(index)?.as_ref() != expected.as_str() {
                        return None;
                    }
                }
                Segment::Named(name) => {
                    params.push((name.clone(), parts.get(index)?.as_ref().to_string()));
                }
                Segment::Typed(name, ty) => {
                    let value = parts.get(index)?.as_ref();
                    if !ty.accepts(value) {
                        return None;
                    }
                    params.push((name.clone(), value.to_string()));
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_placeholder(raw: &str, inner: &str) -> Result<Segment> {
    if let Some(name) = inner.strip_prefix('*') {
        check_name(raw, name)?;
        return Ok(Segment::Wildcard(Some(Arc::from(name))));
    }
    match inner.split_once(':') {
        Some((name, ty)) => {
            check_name(raw, name)?;
            let ty = ty
                .parse::<SegmentType>()
                .map_err(|_| StratusError::invalid_pattern(raw, format!("unknown segment type '{ty}'")))?;
            Ok(Segment::Typed(Arc::from(name), ty))
        }
        None => {
            check_name(raw, inner)?;
            Ok(Segment::Named(Arc::from(inner)))
        }
    }
}

fn check_name(raw: &str, name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StratusError::invalid_pattern(raw, format!("invalid parameter name '{name}'")));
    }
    Ok(())
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Splits a raw request path and percent-decodes each segment.
///
/// Fails with the offending segment when it does not decode to UTF-8.
pub fn decode_path(path: &str) -> std::result::Result<Vec<String>, String> {
    split_path(path)
        .map(|raw| {
            urlencoding::decode(raw)
                .map(|decoded| decoded.into_owned())
                .map_err(|_| raw.to_string())
        })
        .collect()
}

/// Joins a controller base path and a route path into one normalized path.
pub fn join(base: &str, path: &str) -> String {
    normalize(&format!("{base}/{path}"))
}

fn normalize(path: &str) -> String {
    let joined: Vec<&str> = split_path(path).collect();
    format!("/{}", joined.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(raw: &str) -> PathPattern {
        PathPattern::parse(raw).unwrap()
    }

    #[test]
    fn test_static_match() {
        let p = pattern("/dogs/all");
        assert!(p.matches("/dogs/all").is_some());
        assert!(p.matches("/dogs/all/").is_some());
        assert!(p.matches("/dogs").is_none());
        assert!(p.matches("/dogs/all/more").is_none());
    }

    #[test]
    fn test_named_and_typed_params() {
        let p = pattern("/dogs/{name}/age/{years:int}");
        let params = p.matches("/dogs/rex/age/4").unwrap();
        assert_eq!(params[0].0.as_ref(), "name");
        assert_eq!(params[0].1, "rex");
        assert_eq!(params[1].1, "4");
        assert!(p.matches("/dogs/rex/age/four").is_none());
    }

    #[test]
    fn test_segments_are_percent_decoded() {
        let p = pattern("/names/{name}");
        let params = p.matches("/names/hot%20dog").unwrap();
        assert_eq!(params[0].1, "hot dog");
        // Only the query string treats '+' as a space.
        assert_eq!(p.matches("/names/a+b").unwrap()[0].1, "a+b");
        assert!(p.matches("/names/%FF").is_none());

        let typed = pattern("/dogs/{id:int}");
        assert_eq!(typed.matches("/dogs/%34%32").unwrap()[0].1, "42");
        assert!(typed.matches("/dogs/4%202").is_none());

        assert!(pattern("/hot dogs").matches("/hot%20dogs").is_some());
        assert_eq!(decode_path("/a/%FF/b").unwrap_err(), "%FF");
    }

    #[test]
    fn test_wildcard_binds_remainder() {
        let p = pattern("/assets/{*file}");
        let params = p.matches("/assets/css/site.css").unwrap();
        assert_eq!(params[0].1, "css/site.css");
        assert!(p.matches("/assets").is_none());
    }

    #[test]
    fn test_specificity_order() {
        let statik = pattern("/dogs/new").specificity();
        let typed = pattern("/dogs/{id:int}").specificity();
        let named = pattern("/dogs/{id}").specificity();
        let wild = pattern("/dogs/*").specificity();
        assert!(statik > typed);
        assert!(typed > named);
        assert!(named > wild);
    }

    #[test]
    fn test_longest_static_prefix_breaks_ties() {
        let a = pattern("/a/b/{x}/c").specificity();
        let b = pattern("/a/{x}/b/c").specificity();
        assert!(a > b);
    }

    #[test]
    fn test_shape_ignores_param_names() {
        assert_eq!(pattern("/dogs/{id}").shape(), pattern("/dogs/{name}/").shape());
        assert_ne!(pattern("/dogs/{id}").shape(), pattern("/dogs/{id:int}").shape());
        assert_eq!(pattern("/").shape(), "/");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathPattern::parse("/a/*/b").is_err());
        assert!(PathPattern::parse("/a/{id:float}").is_err());
        assert!(PathPattern::parse("/a/{}").is_err());
        assert!(PathPattern::parse("/a/x{id}").is_err());
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/dogs", "/{id}"), "/dogs/{id}");
        assert_eq!(join("/", ""), "/");
        assert_eq!(join("api/", "/v1/"), "/api/v1");
    }
}
