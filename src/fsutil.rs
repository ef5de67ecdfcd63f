//! Input discovery: literal paths first, glob patterns otherwise.

use globset::{Glob, GlobSet, GlobSetBuilder};

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{LensError, LensResult};

/// Resolves CLI inputs. Existing paths are taken as-is; anything else is a
/// glob matched under the current directory. Duplicates are dropped.
pub fn resolve_inputs(inputs: &[String]) -> LensResult<Vec<PathBuf>> {
    resolve_inputs_in(Path::new("."), inputs)
}

pub fn resolve_inputs_in(root: &Path, inputs: &[String]) -> LensResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut patterns = Vec::new();
    for input in inputs {
        let literal = root.join(input);
        if literal.is_file() {
            out.push(if root == Path::new(".") { PathBuf::from(input) } else { literal });
        } else {
            patterns.push(input.clone());
        }
    }
    if !patterns.is_empty() {
        let matched = find_matching_files(root, &patterns)?;
        if matched.is_empty() {
            return Err(LensError::InvalidArgument(format!(
                "no input matches {}",
                patterns.join(", ")
            )));
        }
        out.extend(matched);
    }
    let mut seen = std::collections::HashSet::new();
    out.retain(|p| seen.insert(p.clone()));
    Ok(out)
}

pub fn find_matching_files(root: &Path, patterns: &[String]) -> LensResult<Vec<PathBuf>> {
    let set = compile_globset(patterns)?;
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let msg = e.to_string();
            LensError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other(msg)),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let p = entry.path();
        let rel = p.strip_prefix(root).unwrap_or(p);
        if set.is_match(rel) {
            out.push(if root == Path::new(".") { rel.to_path_buf() } else { p.to_path_buf() });
        }
    }
    out.sort();
    Ok(out)
}

fn compile_globset(patterns: &[String]) -> LensResult<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        let g = Glob::new(p).map_err(|e| LensError::InvalidArgument(format!("invalid glob {p:?}: {e}")))?;
        b.add(g);
    }
    b.build()
        .map_err(|e| LensError::InvalidArgument(format!("invalid globset: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_paths_and_globs_resolve_once() {
        let root = std::env::temp_dir().join(format!("jfrlens-fs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(root.join("rec")).expect("dir");
        for name in ["rec/a.jsonl", "rec/b.jsonl.gz", "rec/notes.txt"] {
            std::fs::write(root.join(name), "").expect("write");
        }
        let found = resolve_inputs_in(
            &root,
            &["rec/a.jsonl".to_string(), "rec/*.jsonl*".to_string()],
        )
        .expect("resolve");
        assert_eq!(found, vec![root.join("rec/a.jsonl"), root.join("rec/b.jsonl.gz")]);
    }

    #[test]
    fn unmatched_pattern_is_an_error() {
        let root = std::env::temp_dir().join(format!("jfrlens-fs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).expect("dir");
        let err = resolve_inputs_in(&root, &["*.jfr".to_string()]).expect_err("no match");
        assert!(matches!(err, LensError::InvalidArgument(_)));
    }
}
