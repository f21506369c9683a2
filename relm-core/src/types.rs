//! Domain types for exported releases.
//!
//! A [`Release`] is one installed deployment unit as reported by the release
//! source. It is immutable for the duration of a reconciliation pass; the
//! store persists it verbatim as JSON.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Helm refuses release names longer than this.
pub const MAX_RELEASE_NAME_LEN: usize = 53;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed release name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReleaseName(pub String);

impl ReleaseName {
    /// Whether helm would accept the name: a lowercase DNS-1123 subdomain
    /// (dot-separated labels) of at most [`MAX_RELEASE_NAME_LEN`] characters.
    pub fn is_valid(&self) -> bool {
        let s = self.0.as_str();
        if s.is_empty() || s.len() > MAX_RELEASE_NAME_LEN {
            return false;
        }
        s.split('.').all(is_dns_label)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_dns_label(label: &str) -> bool {
    let edge_ok = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    !label.is_empty()
        && label.chars().all(|c| edge_ok(c) || c == '-')
        && label.chars().next().is_some_and(edge_ok)
        && label.chars().last().is_some_and(edge_ok)
}

impl fmt::Display for ReleaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ReleaseName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ReleaseName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Key under which a release record lives in the state store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoredId(pub String);

impl StoredId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for StoredId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StoredId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

/// One installed release as observed from the live source.
///
/// Field names follow `helm list --output json`. Anything helm reports that
/// is not modelled here is kept in `extra` and written back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: ReleaseName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, deserialize_with = "revision_compat")]
    pub revision: u64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub chart: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub updated: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Release {
    /// A bare release carrying only a name.
    pub fn named(name: impl Into<ReleaseName>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            revision: 0,
            status: String::new(),
            chart: String::new(),
            app_version: String::new(),
            updated: String::new(),
            extra: Map::new(),
        }
    }

    /// Builder-style namespace setter.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Namespace, with an empty string treated as absent.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// One human-readable line for dry-run output.
    pub fn describe(&self, verbose: bool) -> String {
        if !verbose {
            return self.name.0.clone();
        }
        format!(
            "{} (namespace={}, revision={}, status={}, chart={}, app_version={}, updated={})",
            self.name,
            self.namespace().unwrap_or("-"),
            self.revision,
            or_dash(&self.status),
            or_dash(&self.chart),
            or_dash(&self.app_version),
            or_dash(&self.updated),
        )
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

/// `helm list -o json` reports the revision as a string; stored records use
/// a number. Accept both.
#[derive(Deserialize)]
#[serde(untagged)]
enum RevisionCompat {
    Number(u64),
    Text(String),
}

fn revision_compat<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match RevisionCompat::deserialize(deserializer)? {
        RevisionCompat::Number(n) => Ok(n),
        RevisionCompat::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Which live releases an export tracks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// Every installed release.
    #[default]
    All,
    /// A single named release.
    Release(ReleaseName),
}

impl Scope {
    /// An empty or missing name means "all releases".
    pub fn from_release_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            None | Some("") => Scope::All,
            Some(name) => Scope::Release(ReleaseName::from(name)),
        }
    }

    pub fn matches(&self, release: &Release) -> bool {
        match self {
            Scope::All => true,
            Scope::Release(name) => &release.name == name,
        }
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self, Scope::Release(_))
    }

    /// Stable label recorded in store snapshots.
    pub fn label(&self) -> String {
        match self {
            Scope::All => "all".to_string(),
            Scope::Release(name) => format!("release:{name}"),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("nginx", true)]
    #[case("my-app-2", true)]
    #[case("a", true)]
    #[case("", false)]
    #[case("-leading", false)]
    #[case("trailing-", false)]
    #[case("Upper", false)]
    #[case("my.app", true)]
    #[case("web.v2.eu", true)]
    #[case(".leading-dot", false)]
    #[case("trailing.", false)]
    #[case("double..dot", false)]
    #[case("bad.-label", false)]
    #[case("under_score", false)]
    fn release_name_validation(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(ReleaseName::from(name).is_valid(), valid, "name: {name:?}");
    }

    #[test]
    fn release_name_length_limit() {
        let ok = "a".repeat(MAX_RELEASE_NAME_LEN);
        let too_long = "a".repeat(MAX_RELEASE_NAME_LEN + 1);
        assert!(ReleaseName::from(ok).is_valid());
        assert!(!ReleaseName::from(too_long).is_valid());
    }

    #[test]
    fn parses_helm_list_entry_with_string_revision() {
        let json = r#"{
            "name": "ingress",
            "namespace": "kube-system",
            "revision": "7",
            "updated": "2024-03-01 10:00:00.000000 +0000 UTC",
            "status": "deployed",
            "chart": "ingress-nginx-4.9.0",
            "app_version": "1.9.5"
        }"#;
        let release: Release = serde_json::from_str(json).expect("parse");
        assert_eq!(release.name.0, "ingress");
        assert_eq!(release.namespace(), Some("kube-system"));
        assert_eq!(release.revision, 7);
        assert!(release.extra.is_empty());
    }

    #[test]
    fn unknown_fields_survive_a_reserialize() {
        let json = r#"{"name":"api","revision":3,"labels":{"team":"core"}}"#;
        let release: Release = serde_json::from_str(json).expect("parse");
        assert_eq!(release.extra["labels"]["team"], "core");

        let out = serde_json::to_value(&release).expect("serialize");
        assert_eq!(out["labels"]["team"], "core");
        assert_eq!(out["revision"], 3);
        assert!(out.get("namespace").is_none());
    }

    #[test]
    fn bad_revision_is_rejected() {
        let err = serde_json::from_str::<Release>(r#"{"name":"x","revision":"seven"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn empty_namespace_reads_as_absent() {
        let release = Release::named("api").in_namespace("");
        assert_eq!(release.namespace(), None);
    }

    #[test]
    fn describe_respects_verbosity() {
        let mut release = Release::named("api").in_namespace("prod");
        release.revision = 4;
        release.status = "deployed".into();

        assert_eq!(release.describe(false), "api");
        let verbose = release.describe(true);
        assert!(verbose.starts_with("api (namespace=prod, revision=4"));
        assert!(verbose.contains("status=deployed"));
        assert!(verbose.contains("chart=-"));
    }

    #[rstest]
    #[case(None, Scope::All)]
    #[case(Some(""), Scope::All)]
    #[case(Some("  "), Scope::All)]
    #[case(Some("api"), Scope::Release(ReleaseName::from("api")))]
    fn scope_from_release_name(#[case] input: Option<&str>, #[case] expected: Scope) {
        assert_eq!(Scope::from_release_name(input), expected);
    }

    #[test]
    fn scoped_export_only_matches_its_release() {
        let scope = Scope::Release(ReleaseName::from("api"));
        assert!(scope.matches(&Release::named("api")));
        assert!(!scope.matches(&Release::named("worker")));
        assert!(Scope::All.matches(&Release::named("worker")));
        assert_eq!(scope.label(), "release:api");
        assert_eq!(Scope::All.to_string(), "all");
    }
}
