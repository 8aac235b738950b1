use std::collections::HashMap;

use crate::error::{ExporterError, Result};

/// Converts a project's `path_with_namespace` into a metric label value.
///
/// Every `/` is replaced with `separator`, so "group/sub/app" becomes
/// "group-sub-app" with the default separator.
pub fn project_label(path_with_namespace: &str, separator: &str) -> String {
    path_with_namespace.replace('/', separator)
}

/// Checks that a separator can stand in for `/` in project labels.
pub fn validate_separator(separator: &str) -> Result<()> {
    if separator.is_empty() {
        return Err(ExporterError::Config(
            "label separator must not be empty".to_string(),
        ));
    }
    if separator.contains('/') {
        return Err(ExporterError::Config(format!(
            "label separator {separator:?} must not contain '/'"
        )));
    }
    Ok(())
}

/// Label values handed out during one collection cycle.
///
/// GitLab paths may contain `-`, so two different projects can end up with the
/// same label under the default separator ("a-b/c" and "a/b-c"). GitLab paths
/// never contain `:`, which makes it a collision-free choice.
#[derive(Debug, Default)]
pub struct LabelRegistry {
    owners: HashMap<String, String>,
}

impl LabelRegistry {
    /// Records `label` as belonging to `path`.
    ///
    /// Returns the path that already claimed this label when it differs.
    pub fn claim(&mut self, label: &str, path: &str) -> Option<String> {
        match self.owners.get(label) {
            Some(owner) if owner != path => Some(owner.clone()),
            Some(_) => None,
            None => {
                self.owners.insert(label.to_owned(), path.to_owned());
                None
            }
        }
    }
}
