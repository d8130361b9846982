//! Route classification: which paths may pass the gate without a credential.
//!
//! Rules are evaluated in order and the first match wins. The builder always
//! terminates the rule list with `/** → RequireAuthenticated`, so every path
//! gets exactly one policy and anything not explicitly opened stays closed.
//!
//! Pattern syntax:
//! - `/actuator/**` : `/actuator` itself and everything below it (never `/actuatorx`)
//! - `/files/*`     : exactly one segment below `/files`
//! - `/**`          : any request
//! - anything else  : exact path (a trailing `/` on the request is ignored)

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    PublicAllow,
    RequireAuthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("path pattern must start with '/': {0:?}")]
    NotAbsolute(String),
    #[error("wildcards are only allowed as the final segment: {0:?}")]
    MisplacedWildcard(String),
    #[error("a public catch-all would shadow the authenticated catch-all: {0:?}")]
    PublicCatchAll(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    Subtree(String),
    SingleSegment(String),
    AnyRequest,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let raw = raw.trim();
        if !raw.starts_with('/') {
            return Err(PatternError::NotAbsolute(raw.to_string()));
        }
        if raw == "/**" {
            return Ok(Self::AnyRequest);
        }

        let (base, subtree, single) = if let Some(base) = raw.strip_suffix("/**") {
            (base, true, false)
        } else if let Some(base) = raw.strip_suffix("/*") {
            (base, false, true)
        } else {
            (raw, false, false)
        };

        if base.contains('*') {
            return Err(PatternError::MisplacedWildcard(raw.to_string()));
        }

        let base = match base.trim_end_matches('/') {
            "" if !subtree && !single => "/",
            trimmed => trimmed,
        };
        // `//**` and friends are the catch-all in disguise.
        if subtree && base.is_empty() {
            return Ok(Self::AnyRequest);
        }

        Ok(if subtree {
            Self::Subtree(base.to_string())
        } else if single {
            Self::SingleSegment(base.to_string())
        } else {
            Self::Exact(base.to_string())
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::AnyRequest => true,
            Self::Exact(exact) => {
                let path = if path.len() > 1 {
                    path.strip_suffix('/').unwrap_or(path)
                } else {
                    path
                };
                path == exact
            }
            Self::Subtree(base) => match path.strip_prefix(base.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            },
            Self::SingleSegment(base) => {
                let Some(rest) = path
                    .strip_prefix(base.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                else {
                    return false;
                };
                let rest = rest.strip_suffix('/').unwrap_or(rest);
                !rest.is_empty() && !rest.contains('/')
            }
        }
    }
}

impl PathPattern {
    // `/**` or `/*`: either would leave almost nothing behind the catch-all.
    fn opens_every_top_level_path(&self) -> bool {
        match self {
            Self::AnyRequest => true,
            Self::SingleSegment(base) => base.is_empty(),
            Self::Exact(_) | Self::Subtree(_) => false,
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(p) => write!(f, "{p}"),
            Self::Subtree(p) => write!(f, "{p}/**"),
            Self::SingleSegment(p) => write!(f, "{p}/*"),
            Self::AnyRequest => write!(f, "/**"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub pattern: PathPattern,
    pub policy: AccessPolicy,
}

/// Ordered, immutable rule list. Built once at startup.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    rules: Vec<RouteRule>,
}

impl RoutePolicy {
    pub fn builder() -> RoutePolicyBuilder {
        RoutePolicyBuilder { rules: Vec::new() }
    }

    /// `permit_all` for each pattern, then the authenticated catch-all.
    pub fn from_public_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PatternError> {
        patterns
            .iter()
            .try_fold(Self::builder(), |builder, p| builder.permit_all(p.as_ref()))
            .map(RoutePolicyBuilder::build)
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn classify(&self, path: &str) -> AccessPolicy {
        let canonical = is_canonical(path);

        match self.rules.iter().find(|rule| rule.pattern.matches(path)) {
            // Never open a door for a path we cannot reason about.
            Some(rule) if rule.policy == AccessPolicy::PublicAllow && !canonical => {
                AccessPolicy::RequireAuthenticated
            }
            Some(rule) => rule.policy,
            None => AccessPolicy::RequireAuthenticated,
        }
    }
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                RouteRule {
                    pattern: PathPattern::Subtree("/actuator".to_string()),
                    policy: AccessPolicy::PublicAllow,
                },
                RouteRule {
                    pattern: PathPattern::AnyRequest,
                    policy: AccessPolicy::RequireAuthenticated,
                },
            ],
        }
    }
}

#[derive(Debug)]
pub struct RoutePolicyBuilder {
    rules: Vec<RouteRule>,
}

impl RoutePolicyBuilder {
    pub fn permit_all(mut self, raw: &str) -> Result<Self, PatternError> {
        let pattern = PathPattern::parse(raw)?;
        if pattern.opens_every_top_level_path() {
            return Err(PatternError::PublicCatchAll(raw.trim().to_string()));
        }
        self.rules.push(RouteRule {
            pattern,
            policy: AccessPolicy::PublicAllow,
        });
        Ok(self)
    }

    pub fn authenticated(mut self, pattern: &str) -> Result<Self, PatternError> {
        self.rules.push(RouteRule {
            pattern: PathPattern::parse(pattern)?,
            policy: AccessPolicy::RequireAuthenticated,
        });
        Ok(self)
    }

    pub fn build(mut self) -> RoutePolicy {
        self.rules.push(RouteRule {
            pattern: PathPattern::AnyRequest,
            policy: AccessPolicy::RequireAuthenticated,
        });
        RoutePolicy { rules: self.rules }
    }
}

// Dot segments, doubled slashes and encoded separators can make a path look
// public to us while the downstream router resolves it elsewhere.
fn is_canonical(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    if path.contains('\\') || path.contains(';') {
        return false;
    }

    let lower = path.to_ascii_lowercase();
    if ["%2f", "%5c", "%2e", "%00", "%25"]
        .iter()
        .any(|enc| lower.contains(enc))
    {
        return false;
    }

    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;
    segments
        .iter()
        .enumerate()
        .all(|(i, seg)| !(seg.is_empty() && i != last) && *seg != "." && *seg != "..")
}
