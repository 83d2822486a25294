//! Semantic version parsing, comparison, and range matching.
//!
//! Versions follow SemVer 2.0.0 precedence:
//! - `major.minor.patch` compare numerically
//! - A prerelease sorts before the same version without one
//! - Build metadata is ignored for ordering and equality
//!
//! Ranges are a disjunction (`||`) of conjunctions (whitespace-separated
//! comparators). The two levels are kept apart: `>=2.0.0 || >=1.0.0 <1.5.0`
//! accepts `3.0.0` and `1.2.0` but rejects `1.8.0`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use miette::Diagnostic;
use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Malformed version or range text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("cannot parse '{input}': {reason} (found '{offending}' at position {position})")]
#[diagnostic(help("Versions look like 1.2.3, 1.2.3-beta.1 or 1.2; ranges like >=1.0 <2.0 || ^3.1"))]
pub struct ParseError {
    /// The complete text handed to the parser.
    pub input: String,
    /// The substring that could not be parsed.
    pub offending: String,
    /// Byte offset of `offending` within `input`.
    pub position: usize,
    pub reason: String,
}

impl ParseError {
    fn new(input: &str, offending: &str, position: usize, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            offending: offending.to_string(),
            position,
            reason: reason.into(),
        }
    }
}

/// An immutable semantic version backed by [`semver::Version`].
#[derive(Debug, Clone)]
pub struct SemanticVersion(Version);

impl SemanticVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Parse a version such as `1.2.3`, `v1.2.3-rc.1+build.5`, or the
    /// abbreviated `1.2` / `1` (missing components are zero).
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        parse_version_at(text, 0, text)
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// The prerelease tag, if any (`rc.1` for `1.0.0-rc.1`).
    pub fn prerelease(&self) -> Option<&str> {
        if self.0.pre.is_empty() {
            None
        } else {
            Some(self.0.pre.as_str())
        }
    }

    /// The build metadata, if any (`build.5` for `1.0.0+build.5`).
    pub fn build_metadata(&self) -> Option<&str> {
        if self.0.build.is_empty() {
            None
        } else {
            Some(self.0.build.as_str())
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// Three-way comparison; identical to [`Ord::cmp`].
    pub fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemanticVersion {}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.0.major, self.0.minor, self.0.patch)
            .cmp(&(other.0.major, other.0.minor, other.0.patch))
            .then_with(|| self.0.pre.cmp(&other.0.pre))
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for SemanticVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.major.hash(state);
        self.0.minor.hash(state);
        self.0.patch.hash(state);
        self.0.pre.as_str().hash(state);
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SemanticVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Version> for SemanticVersion {
    fn from(v: Version) -> Self {
        Self(v)
    }
}

impl Serialize for SemanticVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SemanticVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Parse `fragment`, which starts at byte `base` of `input`. Errors report
/// positions relative to `input` so range errors point into the whole range.
fn parse_version_at(fragment: &str, base: usize, input: &str) -> Result<SemanticVersion, ParseError> {
    let lead = fragment.len() - fragment.trim_start().len();
    let text = fragment.trim();
    let mut pos = base + lead;
    if text.is_empty() {
        return Err(ParseError::new(input, fragment, base, "empty version"));
    }

    let text = match text.strip_prefix(['v', 'V']) {
        Some(rest) => {
            pos += 1;
            rest
        }
        None => text,
    };

    let (rest, build) = match text.split_once('+') {
        Some((r, b)) => (r, Some(b)),
        None => (text, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((c, p)) => (c, Some(p)),
        None => (rest, None),
    };

    let mut numbers = [0u64; 3];
    let mut offset = pos;
    for (i, part) in core.split('.').enumerate() {
        if i >= 3 {
            return Err(ParseError::new(
                input,
                part,
                offset,
                "more than three numeric components",
            ));
        }
        numbers[i] = parse_numeric(part, offset, input)?;
        offset += part.len() + 1;
    }

    let mut version = Version::new(numbers[0], numbers[1], numbers[2]);

    if let Some(pre) = pre {
        let pre_pos = pos + core.len() + 1;
        if pre.is_empty() {
            return Err(ParseError::new(input, "-", pre_pos - 1, "empty prerelease tag"));
        }
        version.pre = Prerelease::new(pre)
            .map_err(|e| ParseError::new(input, pre, pre_pos, format!("invalid prerelease: {e}")))?;
    }

    if let Some(build) = build {
        let build_pos = pos + rest.len() + 1;
        if build.is_empty() {
            return Err(ParseError::new(input, "+", build_pos - 1, "empty build metadata"));
        }
        version.build = BuildMetadata::new(build).map_err(|e| {
            ParseError::new(input, build, build_pos, format!("invalid build metadata: {e}"))
        })?;
    }

    Ok(SemanticVersion(version))
}

fn parse_numeric(part: &str, position: usize, input: &str) -> Result<u64, ParseError> {
    if part.is_empty() {
        return Err(ParseError::new(input, part, position, "empty numeric component"));
    }
    if !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::new(
            input,
            part,
            position,
            "numeric component must contain only digits",
        ));
    }
    if part.len() > 1 && part.starts_with('0') {
        return Err(ParseError::new(
            input,
            part,
            position,
            "numeric component has a leading zero",
        ));
    }
    part.parse::<u64>()
        .map_err(|_| ParseError::new(input, part, position, "numeric component overflows u64"))
}

/// Comparison operator of a single constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Exact => "=",
            Op::Greater => ">",
            Op::GreaterEq => ">=",
            Op::Less => "<",
            Op::LessEq => "<=",
        }
    }
}

/// One AND-constraint, e.g. `>=1.2.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Comparator {
    pub op: Op,
    pub version: SemanticVersion,
}

impl Comparator {
    pub fn new(op: Op, version: SemanticVersion) -> Self {
        Self { op, version }
    }

    pub fn matches(&self, version: &SemanticVersion) -> bool {
        let ord = version.cmp(&self.version);
        match self.op {
            Op::Exact => ord == Ordering::Equal,
            Op::Greater => ord == Ordering::Greater,
            Op::GreaterEq => ord != Ordering::Less,
            Op::Less => ord == Ordering::Less,
            Op::LessEq => ord != Ordering::Greater,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.version)
    }
}

/// A version constraint: OR-groups of AND-constraints.
///
/// An empty AND-group matches every version (`*`). A range with no groups
/// at all matches nothing; the parser never produces one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    groups: Vec<Vec<Comparator>>,
}

impl VersionRange {
    /// The range accepting every version.
    pub fn any() -> Self {
        Self {
            groups: vec![Vec::new()],
        }
    }

    /// The range accepting exactly `version`.
    pub fn exact(version: SemanticVersion) -> Self {
        Self {
            groups: vec![vec![Comparator::new(Op::Exact, version)]],
        }
    }

    /// Build a range from explicit OR-groups.
    pub fn from_groups(groups: Vec<Vec<Comparator>>) -> Self {
        Self { groups }
    }

    /// Parse a constraint expression.
    ///
    /// Supports `=`, `>=`, `<=`, `>`, `<`, caret (`^1.2.3` → `>=1.2.3 <2.0.0`,
    /// or `<0.(minor+1).0` when major is 0), tilde (`~1.2.3` → `>=1.2.3 <1.3.0`),
    /// bare versions (exact), `*`, whitespace for AND and `||` for OR.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut groups = Vec::new();
        let mut group_start = 0usize;
        for part in text.split("||") {
            groups.push(parse_group(part, group_start, text)?);
            group_start += part.len() + 2;
        }
        Ok(Self { groups })
    }

    /// `true` if `version` satisfies every constraint of at least one OR-group.
    pub fn matches(&self, version: &SemanticVersion) -> bool {
        self.groups
            .iter()
            .any(|group| group.iter().all(|c| c.matches(version)))
    }

    pub fn groups(&self) -> &[Vec<Comparator>] {
        &self.groups
    }

    /// `true` if this range places no restriction on versions.
    pub fn is_any(&self) -> bool {
        self.groups.iter().any(|g| g.is_empty())
    }
}

fn parse_group(part: &str, base: usize, input: &str) -> Result<Vec<Comparator>, ParseError> {
    let tokens = tokenize(part, base);
    if tokens.is_empty() {
        let reason = if input.trim().is_empty() {
            "empty range"
        } else {
            "empty alternative in '||' expression"
        };
        return Err(ParseError::new(input, part, base, reason));
    }

    let mut comparators = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let (pos, token) = tokens[i];
        // `>= 1.0` is written with a space after the operator; glue it back.
        let joined;
        let token = if is_operator_only(token) {
            match tokens.get(i + 1) {
                Some((_, next)) => {
                    i += 1;
                    joined = format!("{token}{next}");
                    joined.as_str()
                }
                None => {
                    return Err(ParseError::new(
                        input,
                        token,
                        pos,
                        "operator without a version",
                    ))
                }
            }
        } else {
            token
        };
        parse_comparator(token, pos, input, &mut comparators)?;
        i += 1;
    }
    Ok(comparators)
}

fn tokenize(part: &str, base: usize) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    for (i, ch) in part.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push((base + s, &part[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push((base + s, &part[s..]));
    }
    tokens
}

fn is_operator_only(token: &str) -> bool {
    matches!(token, ">=" | "<=" | ">" | "<" | "=" | "^" | "~")
}

fn parse_comparator(
    token: &str,
    pos: usize,
    input: &str,
    out: &mut Vec<Comparator>,
) -> Result<(), ParseError> {
    if token == "*" || token.eq_ignore_ascii_case("x") {
        return Ok(());
    }

    let (prefix, rest) = [">=", "<=", ">", "<", "=", "^", "~"]
        .iter()
        .find_map(|p| token.strip_prefix(p).map(|r| (*p, r)))
        .unwrap_or(("", token));

    if rest.is_empty() {
        return Err(ParseError::new(input, token, pos, "operator without a version"));
    }
    let version = parse_version_at(rest, pos + prefix.len(), input)?;

    match prefix {
        ">=" => out.push(Comparator::new(Op::GreaterEq, version)),
        "<=" => out.push(Comparator::new(Op::LessEq, version)),
        ">" => out.push(Comparator::new(Op::Greater, version)),
        "<" => out.push(Comparator::new(Op::Less, version)),
        "" | "=" => out.push(Comparator::new(Op::Exact, version)),
        "^" => {
            let overflow = || ParseError::new(input, token, pos, "version component overflows");
            let upper = if version.major() > 0 {
                SemanticVersion::new(version.major().checked_add(1).ok_or_else(overflow)?, 0, 0)
            } else {
                SemanticVersion::new(0, version.minor().checked_add(1).ok_or_else(overflow)?, 0)
            };
            out.push(Comparator::new(Op::GreaterEq, version));
            out.push(Comparator::new(Op::Less, upper));
        }
        "~" => {
            let minor = version
                .minor()
                .checked_add(1)
                .ok_or_else(|| ParseError::new(input, token, pos, "version component overflows"))?;
            let upper = SemanticVersion::new(version.major(), minor, 0);
            out.push(Comparator::new(Op::GreaterEq, version));
            out.push(Comparator::new(Op::Less, upper));
        }
        _ => unreachable!("prefix list and match arms are the same set"),
    }
    Ok(())
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                f.write_str(" || ")?;
            }
            if group.is_empty() {
                f.write_str("*")?;
                continue;
            }
            for (j, c) in group.iter().enumerate() {
                if j > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for VersionRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> SemanticVersion {
        SemanticVersion::parse(s).unwrap()
    }

    fn r(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn basic_ordering() {
        assert!(v("1.0.0") < v("2.0.0"));
        assert!(v("1.0.0") < v("1.0.1"));
        assert!(v("1.0.1") < v("1.1.0"));
        assert!(v("1.10.0") > v("1.9.0"));
    }

    #[test]
    fn prerelease_sorts_before_release() {
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-alpha.1"));
        assert!(v("1.0.0-alpha.1") < v("1.0.0-beta"));
        assert!(v("1.0.0-rc.1") < v("1.0.0"));
        assert!(v("1.0.0") < v("1.0.1-alpha"));
    }

    #[test]
    fn build_metadata_ignored() {
        assert_eq!(v("1.2.3+build.1"), v("1.2.3+build.2"));
        assert_eq!(v("1.2.3+build.1"), v("1.2.3"));
        assert_eq!(v("1.2.3+b").compare(&v("1.2.3")), Ordering::Equal);
        assert_eq!(v("1.2.3+b").build_metadata(), Some("b"));
    }

    #[test]
    fn hash_agrees_with_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(v("1.0.0+a"));
        assert!(set.contains(&v("1.0.0+b")));
    }

    #[test]
    fn total_order_over_sample() {
        let sample: Vec<SemanticVersion> = [
            "0.0.1", "0.1.0", "1.0.0-alpha", "1.0.0-alpha.1", "1.0.0-beta",
            "1.0.0", "1.0.0+x", "1.0.1", "1.2.0", "2.0.0-rc.1", "2.0.0",
        ]
        .iter()
        .map(|s| v(s))
        .collect();
        for a in &sample {
            for b in &sample {
                let held = [a < b, a == b, a > b].iter().filter(|x| **x).count();
                assert_eq!(held, 1, "{a} vs {b}");
                for c in &sample {
                    if a < b && b < c {
                        assert!(a < c, "{a} < {b} < {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn partial_versions_fill_zeros() {
        assert_eq!(v("1.0"), SemanticVersion::new(1, 0, 0));
        assert_eq!(v("2"), SemanticVersion::new(2, 0, 0));
        assert_eq!(v("v1.2.3"), SemanticVersion::new(1, 2, 3));
    }

    #[test]
    fn display_keeps_full_text() {
        assert_eq!(v("1.8.0").to_string(), "1.8.0");
        assert_eq!(v("1.0.0-rc.1+b7").to_string(), "1.0.0-rc.1+b7");
        assert_eq!(v("1.9").to_string(), "1.9.0");
    }

    #[test]
    fn parse_errors_report_position() {
        let err = SemanticVersion::parse("1.x.3").unwrap_err();
        assert_eq!(err.offending, "x");
        assert_eq!(err.position, 2);

        let err = SemanticVersion::parse("1.02.3").unwrap_err();
        assert_eq!(err.offending, "02");

        let err = SemanticVersion::parse("1.2.3.4").unwrap_err();
        assert_eq!(err.offending, "4");
        assert_eq!(err.position, 6);

        assert!(SemanticVersion::parse("").is_err());
        assert!(SemanticVersion::parse("1..2").is_err());
        assert!(SemanticVersion::parse("1.0.0-").is_err());
        assert!(SemanticVersion::parse("1.0.0+").is_err());
        assert!(SemanticVersion::parse("latest").is_err());
    }

    #[test]
    fn or_groups_are_independent() {
        let range = r(">=2.0.0 || >=1.0.0 <1.5.0");
        assert!(range.matches(&v("1.2.0")));
        assert!(range.matches(&v("3.0.0")));
        assert!(!range.matches(&v("1.8.0")));
        assert!(!range.matches(&v("0.9.0")));
        assert_eq!(range.groups().len(), 2);
        assert_eq!(range.groups()[1].len(), 2);
    }

    #[test]
    fn caret_expansion() {
        let range = r("^1.2.3");
        assert!(range.matches(&v("1.2.3")));
        assert!(range.matches(&v("1.9.0")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(!range.matches(&v("1.2.2")));
        assert_eq!(range.to_string(), ">=1.2.3 <2.0.0");

        let zero = r("^0.2.3");
        assert!(zero.matches(&v("0.2.9")));
        assert!(!zero.matches(&v("0.3.0")));
    }

    #[test]
    fn expansion_overflow_is_a_parse_error() {
        let err = VersionRange::parse(">=1.0 ^18446744073709551615.0.0").unwrap_err();
        assert_eq!(err.position, 6);
        assert_eq!(err.reason, "version component overflows");

        let err = VersionRange::parse("~1.18446744073709551615.0").unwrap_err();
        assert_eq!(err.offending, "~1.18446744073709551615.0");
        assert!(VersionRange::parse("^0.18446744073709551615.0").is_err());
        assert!(VersionRange::parse("^18446744073709551614.0.0").is_ok());
    }

    #[test]
    fn tilde_expansion() {
        let range = r("~1.2.3");
        assert!(range.matches(&v("1.2.9")));
        assert!(!range.matches(&v("1.3.0")));
        assert_eq!(range.to_string(), ">=1.2.3 <1.3.0");
    }

    #[test]
    fn operators() {
        assert!(r("=1.0").matches(&v("1.0.0")));
        assert!(r("1.0").matches(&v("1.0.0")));
        assert!(!r("1.0").matches(&v("1.0.1")));
        assert!(r(">1.0").matches(&v("1.0.1")));
        assert!(!r(">1.0").matches(&v("1.0.0")));
        assert!(r("<=1.0").matches(&v("1.0.0")));
        assert!(!r("<1.0").matches(&v("1.0.0")));
    }

    #[test]
    fn operator_separated_by_space() {
        let range = r(">= 1.0 < 2.0");
        assert!(range.matches(&v("1.5.0")));
        assert!(!range.matches(&v("2.0.0")));
    }

    #[test]
    fn star_matches_anything() {
        let range = r("*");
        assert!(range.is_any());
        assert!(range.matches(&v("0.0.1")));
        assert!(range.matches(&v("99.0.0-beta")));
        assert_eq!(VersionRange::any(), range);
    }

    #[test]
    fn range_errors_point_into_input() {
        let err = VersionRange::parse(">=1.0 || <2.y").unwrap_err();
        assert_eq!(err.offending, "y");
        assert_eq!(err.position, 12);
        assert_eq!(err.input, ">=1.0 || <2.y");

        let err = VersionRange::parse(">=1.0 || ").unwrap_err();
        assert!(err.reason.contains("empty alternative"));

        assert!(VersionRange::parse("").is_err());
        assert!(VersionRange::parse(">=").is_err());
        assert!(VersionRange::parse("1.0 >=").is_err());
    }

    #[test]
    fn range_display_round_trips() {
        let range = r(">=2.0.0 || >=1.0.0 <1.5.0");
        assert_eq!(range.to_string(), ">=2.0.0 || >=1.0.0 <1.5.0");
        assert_eq!(r(&range.to_string()), range);
    }
}
