//! Chart references as given on the command line
//!
//! A chart is a local path, a `repo/name` reference, or an `oci://` URL, each
//! optionally pinned with `@version`. Extra charts are given as
//! `release=chart[@version]`.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A chart plus an optional pinned version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRef {
    /// Path, `repo/name` or OCI URL
    pub reference: String,
    /// Version passed to `--version`
    pub version: Option<String>,
}

impl ChartRef {
    /// Unpinned chart reference
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            version: None,
        }
    }
}

impl FromStr for ChartRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::configuration("chart reference is empty"));
        }

        // a trailing @x is a version unless it is part of a path segment or an
        // OCI digest (@sha256:...)
        if let Some((reference, version)) = s.rsplit_once('@') {
            if !reference.is_empty()
                && !version.is_empty()
                && !version.contains('/')
                && !version.contains(':')
            {
                return Ok(Self {
                    reference: reference.to_string(),
                    version: Some(version.to_string()),
                });
            }
        }

        Ok(Self::new(s))
    }
}

impl fmt::Display for ChartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{}", self.reference, v),
            None => f.write_str(&self.reference),
        }
    }
}

/// A release name bound to a chart (`release=chart[@version]`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedChart {
    pub release: String,
    pub chart: ChartRef,
}

impl FromStr for NamedChart {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (release, chart) = s.split_once('=').ok_or_else(|| {
            Error::configuration(format!("chart '{}' must be release=chart[@version]", s))
        })?;
        let release = release.trim();
        if release.is_empty() {
            return Err(Error::configuration(format!(
                "chart '{}' has an empty release name",
                s
            )));
        }
        Ok(Self {
            release: release.to_string(),
            chart: chart.parse()?,
        })
    }
}

/// Parse a list of `release=chart[@version]` entries
pub fn parse_named_charts<S: AsRef<str>>(entries: &[S]) -> Result<Vec<NamedChart>, Error> {
    entries.iter().map(|e| e.as_ref().parse()).collect()
}
