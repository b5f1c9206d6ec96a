//! Property-based tests for source tree cleaning.
//!
//! These tests build random trees under a single source root and check that
//! cleaning is idempotent and never deletes a preserved path.

#[cfg(test)]
mod proptest_tests {
    use crate::cleaner::{clean, plan_clean};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn build_tree(root: &Path, files: &BTreeSet<String>) {
        for file in files {
            let full = root.join("src").join(file);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, file.as_bytes()).unwrap();
        }
    }

    fn snapshot(root: &Path) -> Vec<String> {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .map(|e| e.unwrap().path().strip_prefix(root).unwrap().display().to_string())
            .collect()
    }

    // Paths like "a/b.txt", "c.keep" with at most three levels.
    fn tree_strategy() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set(
            prop::collection::vec("[a-c]", 0..3).prop_flat_map(|dirs| {
                ("[a-c]", prop_oneof![Just("txt"), Just("keep")]).prop_map(move |(name, ext)| {
                    let mut parts = dirs.clone();
                    parts.push(format!("{}.{}", name, ext));
                    parts.join("/")
                })
            }),
            1..12,
        )
        .prop_filter("file names must not collide with directories", |files| {
            files.iter().all(|f| {
                let as_dir = format!("{}/", f);
                !files.iter().any(|other| other.starts_with(&as_dir))
            })
        })
    }

    proptest! {
        /// Property: a second clean with the same inputs changes nothing
        #[test]
        fn clean_is_idempotent(files in tree_strategy()) {
            let temp = TempDir::new().unwrap();
            build_tree(temp.path(), &files);
            let roots = vec!["src".to_string()];
            let remove = vec![r"^src(/.*)?$".to_string()];
            let preserve = vec![r"\.keep$".to_string()];

            clean(temp.path(), &roots, &remove, &preserve).unwrap();
            let after_first = snapshot(temp.path());
            clean(temp.path(), &roots, &remove, &preserve).unwrap();
            let after_second = snapshot(temp.path());

            prop_assert_eq!(after_first, after_second);
        }

        /// Property: preserved files always survive, everything else is removed
        #[test]
        fn preserved_files_survive(files in tree_strategy()) {
            let temp = TempDir::new().unwrap();
            build_tree(temp.path(), &files);
            let roots = vec!["src".to_string()];
            let remove = vec![r"^src(/.*)?$".to_string()];
            let preserve = vec![r"\.keep$".to_string()];

            clean(temp.path(), &roots, &remove, &preserve).unwrap();

            for file in &files {
                let exists = temp.path().join("src").join(file).exists();
                prop_assert_eq!(exists, file.ends_with(".keep"), "unexpected state for {}", file);
            }
            let plan = plan_clean(temp.path(), &roots, &remove, &preserve).unwrap();
            prop_assert!(plan.files.is_empty());
        }
    }
}
