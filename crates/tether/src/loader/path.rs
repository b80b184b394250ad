//! Relation path parsing.
//!
//! `"Posts.Comments:id,body"` requests `Posts`, then `Comments` on every loaded
//! post, selecting only `id` and `body` for the comments. Paths sharing a
//! prefix are merged into one tree so each relation is loaded once.

use crate::error::{OrmError, Result};

/// One relation segment and the segments nested below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathNode {
    /// Relation name on the parent type.
    pub(crate) name: String,
    /// Dotted path from the root, without projection.
    pub(crate) path: String,
    /// Explicit column projection for this segment.
    pub(crate) columns: Option<Vec<String>>,
    pub(crate) children: Vec<PathNode>,
}

impl PathNode {
    fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            columns: None,
            children: Vec::new(),
        }
    }
}

fn parse_columns(raw: &str, list: &str) -> Result<Vec<String>> {
    let columns: Vec<String> = list.split(',').map(|c| c.trim().to_string()).collect();
    if columns.iter().any(String::is_empty) {
        return Err(OrmError::InvalidPath(raw.to_string()));
    }
    Ok(columns)
}

/// Parses and merges relation paths into a forest, preserving request order.
pub(crate) fn parse_paths<S: AsRef<str>>(paths: &[S]) -> Result<Vec<PathNode>> {
    let mut roots: Vec<PathNode> = Vec::new();
    for raw in paths {
        let raw = raw.as_ref().trim();
        let (names, columns) = match raw.split_once(':') {
            Some((names, list)) => (names, Some(parse_columns(raw, list)?)),
            None => (raw, None),
        };
        let segments: Vec<&str> = names.split('.').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(OrmError::InvalidPath(raw.to_string()));
        }

        let last = segments.len() - 1;
        let mut level = &mut roots;
        let mut path = String::new();
        for (depth, segment) in segments.into_iter().enumerate() {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(segment);
            let position = match level.iter().position(|node| node.name == segment) {
                Some(position) => position,
                None => {
                    level.push(PathNode::new(segment, &path));
                    level.len() - 1
                }
            };
            let node = &mut level[position];
            if depth == last {
                if let Some(columns) = &columns {
                    node.columns = Some(columns.clone());
                }
            }
            level = &mut node.children;
        }
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_shared_prefixes() {
        let roots = parse_paths(&["Posts", "Posts.Comments", "Profile"]).unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].name, "Posts");
        assert_eq!(roots[0].children.len(), 1);
        assert_eq!(roots[0].children[0].path, "Posts.Comments");
        assert_eq!(roots[1].name, "Profile");
    }

    #[test]
    fn projection_applies_to_last_segment() {
        let roots = parse_paths(&["Posts.Comments:id, body"]).unwrap();
        assert_eq!(roots[0].columns, None);
        let comments = &roots[0].children[0];
        assert_eq!(
            comments.columns,
            Some(vec![String::from("id"), String::from("body")])
        );
        assert_eq!(comments.path, "Posts.Comments");
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(matches!(
            parse_paths(&["Posts..Comments"]),
            Err(OrmError::InvalidPath(_))
        ));
        assert!(matches!(parse_paths(&[""]), Err(OrmError::InvalidPath(_))));
        assert!(matches!(
            parse_paths(&["Posts:id,"]),
            Err(OrmError::InvalidPath(_))
        ));
    }
}
