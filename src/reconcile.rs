use crate::state::{Conflict, RemoteVersionInfo};
use crate::util::FnvHashMap;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// The result of classifying one conflict.
pub enum Resolution {
    /// only the local copy changed since the last sync
    KeepLocal,
    /// only the remote copy changed since the last sync
    KeepRemote,
    /// nothing can be decided without asking the user
    Unresolved(UnresolvedReason),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// the peer returned no version for this file, or an unknown one
    NoVersionData,
    /// there is no baseline, so it is unknown whether the local copy changed
    NoBaseline,
    /// the item was changed on both sides
    ChangedOnBothSides,
    /// neither side moved away from the baseline, yet the contents differ
    NeitherSideChanged,
}

/// Conflicts split by how they were classified. The three lists always
/// partition the input, in input order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AutoResolution {
    pub auto_resolved_local: Vec<Conflict>,
    pub auto_resolved_remote: Vec<Conflict>,
    pub remaining_conflicts: Vec<Conflict>,
}

/// Determines which side (if any) is the only one that changed.
///
/// `version` is the peer's authoritative answer for this file. Any difference
/// from `last_synced_at` counts as a remote change, whatever its direction,
/// since the two timestamps may come from different clocks.
pub fn classify(conflict: &Conflict, version: Option<&RemoteVersionInfo>) -> Resolution {
    let latest = match version.and_then(|v| v.latest_remote_version_ms) {
        Some(latest) => latest,
        None => return Resolution::Unresolved(UnresolvedReason::NoVersionData),
    };
    let remote_changed = Some(latest) != conflict.last_synced_at;

    match (conflict.local_clean, remote_changed) {
        (Some(false), false) => Resolution::KeepLocal,
        (Some(true), true) => Resolution::KeepRemote,
        (Some(false), true) => Resolution::Unresolved(UnresolvedReason::ChangedOnBothSides),
        (Some(true), false) => Resolution::Unresolved(UnresolvedReason::NeitherSideChanged),
        (None, _) => Resolution::Unresolved(UnresolvedReason::NoBaseline),
    }
}

/// Splits conflicts into the ones that can be settled without the user and
/// the ones that can't.
pub fn auto_resolve_conflicts(conflicts: Vec<Conflict>, remote_versions: &[RemoteVersionInfo]) -> AutoResolution {
    let versions: FnvHashMap<&str, &RemoteVersionInfo> = remote_versions
        .iter()
        .map(|version| (version.file_name.as_str(), version))
        .collect();

    let mut result = AutoResolution::default();
    for conflict in conflicts {
        let resolution = classify(&conflict, versions.get(conflict.file_name.as_str()).copied());
        debug!("Reconciling {}: {:?}", conflict.file_name, resolution);
        match resolution {
            Resolution::KeepLocal => result.auto_resolved_local.push(conflict),
            Resolution::KeepRemote => result.auto_resolved_remote.push(conflict),
            Resolution::Unresolved(_) => result.remaining_conflicts.push(conflict),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(last_synced_at: Option<i64>, local_clean: Option<bool>) -> Conflict {
        Conflict {
            file_name: "Test.tsx".to_owned(),
            local_content: Some("local".to_owned()),
            remote_content: Some("remote".to_owned()),
            local_modified_at: 6000,
            remote_modified_at: 7000,
            last_synced_at,
            local_clean,
        }
    }

    fn version(latest: i64) -> Vec<RemoteVersionInfo> {
        vec![RemoteVersionInfo {
            file_name: "Test.tsx".to_owned(),
            latest_remote_version_ms: Some(latest),
        }]
    }

    fn lens(result: &AutoResolution) -> (usize, usize, usize) {
        (
            result.auto_resolved_local.len(),
            result.auto_resolved_remote.len(),
            result.remaining_conflicts.len(),
        )
    }

    #[test]
    fn test_only_local_changed() {
        let result = auto_resolve_conflicts(vec![conflict(Some(5000), Some(false))], &version(5000));
        assert_eq!(lens(&result), (1, 0, 0));
    }

    #[test]
    fn test_only_remote_changed() {
        let result = auto_resolve_conflicts(vec![conflict(Some(5000), Some(true))], &version(10000));
        assert_eq!(lens(&result), (0, 1, 0));
    }

    #[test]
    fn test_remote_change_in_either_direction() {
        let result = auto_resolve_conflicts(vec![conflict(Some(5000), Some(true))], &version(4000));
        assert_eq!(lens(&result), (0, 1, 0));
    }

    #[test]
    fn test_both_changed() {
        let result = auto_resolve_conflicts(vec![conflict(Some(5000), Some(false))], &version(7500));
        assert_eq!(lens(&result), (0, 0, 1));
    }

    #[test]
    fn test_missing_version_data_is_never_resolved() {
        for local_clean in [Some(true), Some(false), None] {
            let result = auto_resolve_conflicts(vec![conflict(Some(5000), local_clean)], &[]);
            assert_eq!(lens(&result), (0, 0, 1));
        }

        let unknown = vec![RemoteVersionInfo {
            file_name: "Test.tsx".to_owned(),
            latest_remote_version_ms: None,
        }];
        let c = conflict(Some(5000), Some(false));
        assert_eq!(classify(&c, unknown.first()), Resolution::Unresolved(UnresolvedReason::NoVersionData));
    }

    #[test]
    fn test_clean_and_unchanged_stays_unresolved() {
        let c = conflict(Some(5000), Some(true));
        let versions = version(5000);
        assert_eq!(
            classify(&c, versions.first()),
            Resolution::Unresolved(UnresolvedReason::NeitherSideChanged)
        );
    }

    #[test]
    fn test_never_synced_stays_unresolved() {
        let c = conflict(None, None);
        let versions = version(5000);
        assert_eq!(classify(&c, versions.first()), Resolution::Unresolved(UnresolvedReason::NoBaseline));
    }

    #[test]
    fn test_empty_input() {
        let result = auto_resolve_conflicts(Vec::new(), &version(1));
        assert_eq!(result, AutoResolution::default());
    }

    #[test]
    fn test_outputs_partition_the_input() {
        let mut conflicts = Vec::new();
        let mut versions = Vec::new();
        let cases = [
            (Some(false), Some(5000)),
            (Some(true), Some(9000)),
            (Some(false), Some(9000)),
            (None, Some(5000)),
            (Some(true), None),
        ];
        for (i, (local_clean, latest)) in cases.iter().enumerate() {
            let mut c = conflict(Some(5000), *local_clean);
            c.file_name = format!("File{}.tsx", i);
            if let Some(latest) = latest {
                versions.push(RemoteVersionInfo {
                    file_name: c.file_name.clone(),
                    latest_remote_version_ms: Some(*latest),
                });
            }
            conflicts.push(c);
        }

        let result = auto_resolve_conflicts(conflicts.clone(), &versions);
        assert_eq!(lens(&result), (1, 1, 3));

        let mut names: Vec<String> = result
            .auto_resolved_local
            .iter()
            .chain(&result.auto_resolved_remote)
            .chain(&result.remaining_conflicts)
            .map(|c| c.file_name.clone())
            .collect();
        names.sort();
        let mut expected: Vec<String> = conflicts.iter().map(|c| c.file_name.clone()).collect();
        expected.sort();
        assert_eq!(names, expected);
    }
}
