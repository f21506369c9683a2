//! Parsing `helm list --output json` documents into releases.

use relm_core::{identity, Release, Scope, StoredId};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const HELM_LIST: &str = r#"[
  {
    "name": "ingress",
    "namespace": "kube-system",
    "revision": "3",
    "updated": "2024-03-01 10:00:00.000000 +0000 UTC",
    "status": "deployed",
    "chart": "ingress-nginx-4.9.0",
    "app_version": "1.9.5"
  },
  {
    "name": "api",
    "namespace": "prod",
    "revision": "41",
    "updated": "2024-03-02 08:30:12.123456 +0000 UTC",
    "status": "deployed",
    "chart": "api-2.3.1",
    "app_version": "2.3.1"
  },
  {
    "name": "api",
    "namespace": "staging",
    "revision": "97",
    "updated": "2024-03-02 09:01:44.000001 +0000 UTC",
    "status": "deployed",
    "chart": "api-2.4.0-rc1",
    "app_version": "2.4.0-rc1"
  }
]"#;

fn releases() -> Vec<Release> {
    serde_json::from_str(HELM_LIST).expect("parse helm list")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn every_entry_parses() {
    let releases = releases();
    assert_eq!(releases.len(), 3);
    assert_eq!(releases[1].revision, 41);
    assert_eq!(releases[2].chart, "api-2.4.0-rc1");
}

#[test]
fn identities_are_unique_across_namespaces() {
    let mut ids: Vec<StoredId> = releases().iter().map(identity).collect();
    ids.sort();
    assert_eq!(
        ids,
        vec![
            StoredId::from("kube-system_ingress"),
            StoredId::from("prod_api"),
            StoredId::from("staging_api"),
        ]
    );
}

#[rstest]
#[case(Scope::All, 3)]
#[case(Scope::from_release_name(Some("api")), 2)]
#[case(Scope::from_release_name(Some("ingress")), 1)]
#[case(Scope::from_release_name(Some("missing")), 0)]
fn scope_filters_live_set(#[case] scope: Scope, #[case] expected: usize) {
    let matching = releases().iter().filter(|r| scope.matches(r)).count();
    assert_eq!(matching, expected);
}

#[test]
fn stored_record_reloads_identically() {
    for release in releases() {
        let stored = serde_json::to_string_pretty(&release).expect("serialize");
        let reloaded: Release = serde_json::from_str(&stored).expect("reload");
        assert_eq!(reloaded, release);
        assert_eq!(identity(&reloaded), identity(&release));
    }
}
