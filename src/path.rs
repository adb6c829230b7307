//! Path syntax: `/` separates components, a leading `/` anchors the walk
//! at the root, `.` stays, `..` goes up (clamped at the root), and a
//! trailing `/` requires the referent to be a directory.

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    /// `.`
    Stay,
    /// `..`
    Up,
    /// A literal child name.
    Named(String),
    /// Synthetic marker for a trailing `/`: the node reached so far must
    /// be a directory.
    RequireDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    /// Anchor at the root instead of the current working directory.
    pub absolute: bool,
    pub components: Vec<Component>,
}

/// Split a path string into its anchor and component list. Empty
/// components (`a//b`) are skipped; the empty path resolves to the anchor
/// itself.
pub fn parse(path: &str) -> ParsedPath {
    let absolute = path.starts_with('/');

    let mut components: Vec<Component> = path
        .split('/')
        .filter(|part| !part.is_empty())
        .map(|part| match part {
            "." => Component::Stay,
            ".." => Component::Up,
            name => Component::Named(name.to_string()),
        })
        .collect();

    if path.ends_with('/') && !path.is_empty() {
        components.push(Component::RequireDir);
    }

    ParsedPath {
        absolute,
        components,
    }
}

/// Split a path into the path of its parent and the leaf name, for the
/// operations that create or look up the leaf specially. Fails (returns
/// `None`) when the path has no literal leaf to split off (`/`, `..`).
pub fn split_leaf(path: &str) -> Option<(ParsedPath, String)> {
    let mut parsed = parse(path);

    // a trailing slash on "a/b/" still names the leaf b
    if parsed.components.last() == Some(&Component::RequireDir) {
        parsed.components.pop();
    }

    match parsed.components.pop() {
        Some(Component::Named(leaf)) => Some((parsed, leaf)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Component {
        Component::Named(name.to_string())
    }

    #[test]
    fn test_absolute_and_relative_anchors() {
        assert!(parse("/a/b").absolute);
        assert!(!parse("a/b").absolute);
        assert!(!parse("").absolute);
    }

    #[test]
    fn test_component_kinds() {
        let parsed = parse("./a/../b");
        assert_eq!(
            parsed.components,
            vec![Component::Stay, named("a"), Component::Up, named("b")]
        );
    }

    #[test]
    fn test_trailing_slash_adds_marker() {
        let parsed = parse("/a/b/");
        assert_eq!(
            parsed.components,
            vec![named("a"), named("b"), Component::RequireDir]
        );
        assert_eq!(parse("/").components, vec![Component::RequireDir]);
    }

    #[test]
    fn test_empty_components_are_skipped() {
        assert_eq!(parse("a//b").components, vec![named("a"), named("b")]);
    }

    #[test]
    fn test_split_leaf() {
        let (parent, leaf) = split_leaf("/a/b/c").unwrap();
        assert!(parent.absolute);
        assert_eq!(parent.components, vec![named("a"), named("b")]);
        assert_eq!(leaf, "c");

        let (parent, leaf) = split_leaf("d").unwrap();
        assert!(!parent.absolute);
        assert!(parent.components.is_empty());
        assert_eq!(leaf, "d");

        // trailing slash still names the same leaf
        let (_, leaf) = split_leaf("a/b/").unwrap();
        assert_eq!(leaf, "b");
    }

    #[test]
    fn test_split_leaf_needs_a_literal_leaf() {
        assert!(split_leaf("/").is_none());
        assert!(split_leaf("..").is_none());
        assert!(split_leaf("").is_none());
    }
}
