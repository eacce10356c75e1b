//! Dotted field paths: `spec.predicates[0].requiredClusterSelector`.
//!
//! Keys are alnum/underscore/hyphen; each key may carry one or more `[n]`
//! indices. Keys containing dots or slashes (label and annotation keys) are
//! addressed through `ManifestDocument::set_in` instead.

use serde_yaml::Value;

use crate::ManifestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

fn valid_key(k: &str) -> bool {
    !k.is_empty() && k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, ManifestError> {
        let invalid = || ManifestError::InvalidPath(path.to_string());
        let s = path.strip_prefix('.').unwrap_or(path);
        if s.is_empty() {
            return Err(invalid());
        }
        let mut segments = Vec::new();
        for part in s.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if !valid_key(key) {
                return Err(invalid());
            }
            segments.push(Segment::Key(key.to_string()));
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(invalid)?;
                let digits = &rest[1..close];
                if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid());
                }
                segments.push(Segment::Index(digits.parse().map_err(|_| invalid())?));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(invalid());
                }
            }
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Parent path and final segment; `None` for the empty path.
    pub fn split_last(&self) -> Option<(FieldPath, &Segment)> {
        let (last, parent) = self.segments.split_last()?;
        Some((FieldPath { segments: parent.to_vec() }, last))
    }

    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut cur = root;
        for seg in &self.segments {
            cur = match (seg, cur) {
                (Segment::Key(k), Value::Mapping(m)) => m.get(k.as_str())?,
                (Segment::Index(i), Value::Sequence(s)) => s.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    pub fn resolve_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        let mut cur = root;
        for seg in &self.segments {
            cur = match (seg, cur) {
                (Segment::Key(k), Value::Mapping(m)) => m.get_mut(k.as_str())?,
                (Segment::Index(i), Value::Sequence(s)) => s.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_and_indices() {
        let p = FieldPath::parse(".spec.workflows[1].sequence[0].group").unwrap();
        assert_eq!(
            p.segments(),
            &[
                Segment::Key("spec".into()),
                Segment::Key("workflows".into()),
                Segment::Index(1),
                Segment::Key("sequence".into()),
                Segment::Index(0),
                Segment::Key("group".into()),
            ]
        );
    }

    #[test]
    fn nested_indices() {
        let p = FieldPath::parse("a[0][2]").unwrap();
        assert_eq!(p.segments().len(), 3);
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", ".", "a..b", "a[x]", "a[]", "a[0", "a[0]b", "a/b", "a.b*"] {
            assert!(FieldPath::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn resolve_walks_values() {
        let v: Value = serde_yaml::from_str("a:\n  b:\n    - x\n    - y\n").unwrap();
        let p = FieldPath::parse("a.b[1]").unwrap();
        assert_eq!(p.resolve(&v).and_then(Value::as_str), Some("y"));
        assert!(FieldPath::parse("a.b[2]").unwrap().resolve(&v).is_none());
        assert!(FieldPath::parse("a.c").unwrap().resolve(&v).is_none());
    }
}
