//! Change filter for path-scoped (monorepo) pipelines

fn normalize_root(root_dir: Option<&str>) -> Option<&str> {
    root_dir
        .map(|d| d.trim_matches('/'))
        .filter(|d| !d.is_empty())
}

fn is_under(file: &str, root: &str) -> bool {
    file.strip_prefix(root)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// True when the pipeline has no root directory, or at least one changed
/// file lives under it.
pub fn has_changes_under_root_dir(root_dir: Option<&str>, changed_files: &[String]) -> bool {
    match normalize_root(root_dir) {
        Some(root) => changed_files.iter().any(|f| is_under(f, root)),
        None => true,
    }
}

/// Changed files reported on a pipeline's event: everything for unscoped
/// pipelines, the subset under `root_dir` otherwise.
pub fn changed_files_for(root_dir: Option<&str>, changed_files: &[String]) -> Vec<String> {
    match normalize_root(root_dir) {
        Some(root) => changed_files
            .iter()
            .filter(|f| is_under(f, root))
            .cloned()
            .collect(),
        None => changed_files.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unscoped_pipeline_sees_everything() {
        let changed = files(&["README.md", "api/main.rs"]);
        assert!(has_changes_under_root_dir(None, &changed));
        assert!(has_changes_under_root_dir(Some(""), &changed));
        assert_eq!(changed_files_for(None, &changed), changed);
    }

    #[test]
    fn scoped_pipeline_sees_only_its_subtree() {
        let changed = files(&["README.md", "api/main.rs", "apiary/x.rs", "api/src/lib.rs"]);
        assert!(has_changes_under_root_dir(Some("api"), &changed));
        assert_eq!(
            changed_files_for(Some("api/"), &changed),
            files(&["api/main.rs", "api/src/lib.rs"])
        );
    }

    #[test]
    fn scoped_pipeline_without_matching_changes() {
        let changed = files(&["web/index.html"]);
        assert!(!has_changes_under_root_dir(Some("api"), &changed));
        assert!(!has_changes_under_root_dir(Some("api"), &[]));
        assert!(changed_files_for(Some("api"), &changed).is_empty());
    }
}
