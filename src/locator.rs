use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use tracing::debug;

use crate::domain::FileReference;
use crate::error::BidsError;

/// A most-specific-match lookup of `[field-value_]*tag.type` files in one folder.
#[derive(Debug, Clone)]
pub struct FileQuery {
    pub filters: Vec<(String, String)>,
    pub tag: String,
    /// Glob fragment, `*` matches any extension.
    pub file_type: String,
    pub allow_other_fields: bool,
}

impl FileQuery {
    pub fn new(tag: &str, file_type: &str) -> Self {
        Self {
            filters: Vec::new(),
            tag: tag.to_string(),
            file_type: file_type.to_string(),
            allow_other_fields: true,
        }
    }

    pub fn filter(mut self, field: &str, value: &str) -> Self {
        self.filters.push((field.to_string(), value.to_string()));
        self
    }

    pub fn allow_other_fields(mut self, allow: bool) -> Self {
        self.allow_other_fields = allow;
        self
    }
}

/// Most specific file under `root` with respect to the query filters.
///
/// Filter subsets are tried from all filters down to none; the first subset
/// with a match wins and ties go to the lexicographically smallest path.
pub fn most_specific_file(
    root: &Utf8Path,
    query: &FileQuery,
) -> Result<Option<Utf8PathBuf>, BidsError> {
    for subset in filter_subsets(&query.filters) {
        let found = matching_files(root, query, &subset)?;
        if let Some(first) = found.into_iter().next() {
            debug!(path = %first, filters = subset.len(), "locator match");
            return Ok(Some(first));
        }
    }
    Ok(None)
}

/// Files of `root` named `*<tag>.<type>` that satisfy every filter in `filters`.
pub fn matching_files(
    root: &Utf8Path,
    query: &FileQuery,
    filters: &[&(String, String)],
) -> Result<Vec<Utf8PathBuf>, BidsError> {
    let pattern = format!(
        "{}/*{}.{}",
        Pattern::escape(root.as_str()),
        query.tag,
        query.file_type
    );
    let entries =
        glob::glob(&pattern).map_err(|err| BidsError::Filesystem(format!("{pattern}: {err}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| BidsError::Filesystem(err.to_string()))?;
        if !path.is_file() {
            continue;
        }
        let path = Utf8PathBuf::from_path_buf(path)
            .map_err(|path| BidsError::Filesystem(format!("non-utf8 path {}", path.display())))?;
        files.push(path);
    }
    files.sort();

    if filters.is_empty() {
        return Ok(files);
    }

    let mut matched = Vec::new();
    for path in files {
        let reference = match FileReference::parse(&path) {
            Ok(reference) => reference,
            Err(err) => {
                debug!(%path, %err, "skipping unparsable file name");
                continue;
            }
        };
        if !query.allow_other_fields && reference.fields().len() > filters.len() {
            continue;
        }
        let keep = filters
            .iter()
            .all(|(field, value)| reference.field(field) == Some(value.as_str()));
        if keep {
            matched.push(path);
        }
    }
    Ok(matched)
}

/// Every subset of `filters`, largest first; within a size, in combination order.
fn filter_subsets(filters: &[(String, String)]) -> Vec<Vec<&(String, String)>> {
    let mut subsets = Vec::new();
    for size in (1..=filters.len()).rev() {
        let mut current = Vec::with_capacity(size);
        combinations(filters, size, 0, &mut current, &mut subsets);
    }
    subsets.push(Vec::new());
    subsets
}

fn combinations<'a>(
    items: &'a [(String, String)],
    size: usize,
    start: usize,
    current: &mut Vec<&'a (String, String)>,
    out: &mut Vec<Vec<&'a (String, String)>>,
) {
    if current.len() == size {
        out.push(current.clone());
        return;
    }
    for index in start..items.len() {
        current.push(&items[index]);
        combinations(items, size, index + 1, current, out);
        current.pop();
    }
}
