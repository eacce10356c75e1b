//! drdeploy manifests: ordered YAML documents mutated by field path.
//!
//! A [`ManifestDocument`] wraps one top-level mapping. Documents are edited in
//! place through dotted paths (`spec.sources[0].path`) so fields a template
//! carries but the mutator never touches survive unchanged.

#![forbid(unsafe_code)]

use std::path::Path;

use metrics::counter;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

mod path;

pub use path::{FieldPath, Segment};

fn env_limit(var: &str, default: usize) -> usize {
    std::env::var(var).ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(default)
}

fn max_yaml_bytes() -> usize {
    env_limit("DRDEPLOY_MAX_YAML_BYTES", 1_000_000) // 1 MiB default
}

fn max_yaml_nodes() -> usize {
    env_limit("DRDEPLOY_MAX_YAML_NODES", 100_000)
}

/// Value nodes (keys excluded) seen so far in one YAML stream. The limit
/// covers the whole stream, not each document.
struct NodeBudget {
    limit: usize,
    used: usize,
}

impl NodeBudget {
    fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    fn charge(&mut self, root: &Value) -> ManifestResult<()> {
        let mut pending = vec![root];
        while let Some(v) = pending.pop() {
            self.used += 1;
            if self.used >= self.limit {
                return Err(ManifestError::TooComplex(self.limit));
            }
            match v {
                Value::Mapping(map) => pending.extend(map.values()),
                Value::Sequence(seq) => pending.extend(seq.iter()),
                Value::Tagged(t) => pending.push(&t.value),
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("parsing YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("YAML payload too large (>{0} bytes)")]
    TooLarge(usize),
    #[error("YAML document too complex (>{0} nodes)")]
    TooComplex(usize),
    #[error("document {0} is not a mapping")]
    NotAMapping(usize),
    #[error("{kind}: field path '{path}' is absent")]
    MissingPath { kind: String, path: String },
    #[error("{kind}: field path '{path}' is not a {expected}")]
    WrongShape { kind: String, path: String, expected: &'static str },
    #[error("invalid field path '{0}'")]
    InvalidPath(String),
    #[error("template has no '{0}' document")]
    MissingKind(String),
    #[error("reading {path}: {source}")]
    Io { path: String, source: std::io::Error },
}

pub type ManifestResult<T> = Result<T, ManifestError>;

/// One YAML document, tagged by its `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDocument {
    /// Always a `Value::Mapping`.
    root: Value,
}

impl ManifestDocument {
    pub fn from_mapping(root: Mapping) -> Self {
        Self { root: Value::Mapping(root) }
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// The `kind` discriminator, empty when absent.
    pub fn kind(&self) -> &str {
        self.root.get("kind").and_then(Value::as_str).unwrap_or("")
    }

    pub fn name(&self) -> Option<&str> {
        self.get_str("metadata.name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get_str("metadata.namespace")
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let fp = FieldPath::parse(path).ok()?;
        fp.resolve(&self.root)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    fn missing(&self, path: &str) -> ManifestError {
        ManifestError::MissingPath { kind: self.kind().to_string(), path: path.to_string() }
    }

    fn wrong_shape(&self, path: &str, expected: &'static str) -> ManifestError {
        ManifestError::WrongShape { kind: self.kind().to_string(), path: path.to_string(), expected }
    }

    /// Set the value at `path`. Every segment except the last must already
    /// exist; a trailing key is inserted or overwritten, a trailing index must
    /// be in bounds.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> ManifestResult<()> {
        let fp = FieldPath::parse(path)?;
        let (parent, last) = fp.split_last().ok_or_else(|| ManifestError::InvalidPath(path.to_string()))?;
        let kind = self.kind().to_string();
        let missing = || ManifestError::MissingPath { kind: kind.clone(), path: path.to_string() };
        let node = parent.resolve_mut(&mut self.root).ok_or_else(missing)?;
        match (last, node) {
            (Segment::Key(k), Value::Mapping(map)) => {
                map.insert(Value::String(k.clone()), value.into());
                Ok(())
            }
            (Segment::Index(i), Value::Sequence(seq)) => match seq.get_mut(*i) {
                Some(slot) => {
                    *slot = value.into();
                    Ok(())
                }
                None => Err(missing()),
            },
            (Segment::Key(_), _) => Err(ManifestError::WrongShape { kind: kind.clone(), path: path.to_string(), expected: "mapping" }),
            (Segment::Index(_), _) => Err(ManifestError::WrongShape { kind: kind.clone(), path: path.to_string(), expected: "sequence" }),
        }
    }

    /// Insert `key` (which may contain dots or slashes) into the mapping at
    /// `path`, overwriting any previous value.
    pub fn set_in(&mut self, path: &str, key: &str, value: impl Into<Value>) -> ManifestResult<()> {
        let map = self.mapping_mut(path)?;
        map.insert(Value::String(key.to_string()), value.into());
        Ok(())
    }

    /// Insert `key` into the mapping at `path` only when absent, creating the
    /// mapping chain if needed. Returns true when a value was inserted.
    pub fn insert_if_absent(&mut self, path: &str, key: &str, value: impl Into<Value>) -> ManifestResult<bool> {
        let map = self.ensure_mapping(path)?;
        let k = Value::String(key.to_string());
        if map.contains_key(&k) {
            return Ok(false);
        }
        map.insert(k, value.into());
        Ok(true)
    }

    /// Add an annotation unless one with the same key is already present.
    pub fn annotate(&mut self, key: &str, value: &str) -> ManifestResult<bool> {
        self.insert_if_absent("metadata.annotations", key, value)
    }

    /// Existing mapping at `path`.
    pub fn mapping_mut(&mut self, path: &str) -> ManifestResult<&mut Mapping> {
        let fp = FieldPath::parse(path)?;
        let missing = self.missing(path);
        let shape = self.wrong_shape(path, "mapping");
        match fp.resolve_mut(&mut self.root) {
            Some(Value::Mapping(m)) => Ok(m),
            Some(_) => Err(shape),
            None => Err(missing),
        }
    }

    /// Mapping at `path`, creating missing or null keys along the way.
    pub fn ensure_mapping(&mut self, path: &str) -> ManifestResult<&mut Mapping> {
        let fp = FieldPath::parse(path)?;
        let shape = self.wrong_shape(path, "mapping");
        let missing = self.missing(path);
        let mut cur: &mut Mapping = match &mut self.root {
            Value::Mapping(m) => m,
            _ => return Err(shape),
        };
        for seg in fp.segments() {
            let key = match seg {
                Segment::Key(k) => Value::String(k.clone()),
                Segment::Index(_) => return Err(missing),
            };
            let slot = cur.entry(key).or_insert(Value::Null);
            if slot.is_null() {
                *slot = Value::Mapping(Mapping::new());
            }
            cur = match slot {
                Value::Mapping(m) => m,
                _ => return Err(shape),
            };
        }
        Ok(cur)
    }

    /// Remove the value at `path`, returning it when present.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let fp = FieldPath::parse(path).ok()?;
        let (parent, last) = fp.split_last()?;
        match (last, parent.resolve_mut(&mut self.root)?) {
            (Segment::Key(k), Value::Mapping(map)) => map.remove(k.as_str()),
            (Segment::Index(i), Value::Sequence(seq)) if *i < seq.len() => Some(seq.remove(*i)),
            _ => None,
        }
    }

    pub fn to_yaml(&self) -> ManifestResult<String> {
        Ok(serde_yaml::to_string(&self.root)?)
    }
}

/// Parse a single-document YAML payload.
pub fn parse_document(yaml: &str) -> ManifestResult<ManifestDocument> {
    let mut docs = parse_documents(yaml)?;
    match docs.len() {
        0 => Err(ManifestError::NotAMapping(0)),
        _ => Ok(docs.swap_remove(0)),
    }
}

/// Parse a multi-document YAML stream. Empty documents are skipped.
pub fn parse_documents(yaml: &str) -> ManifestResult<Vec<ManifestDocument>> {
    if yaml.len() > max_yaml_bytes() {
        return Err(ManifestError::TooLarge(max_yaml_bytes()));
    }
    parse_with_budget(yaml, NodeBudget::new(max_yaml_nodes()))
}

fn parse_with_budget(yaml: &str, mut budget: NodeBudget) -> ManifestResult<Vec<ManifestDocument>> {
    let mut out = Vec::new();
    for (idx, de) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let value = Value::deserialize(de)?;
        budget.charge(&value)?;
        match value {
            Value::Null => continue,
            Value::Mapping(root) => out.push(ManifestDocument::from_mapping(root)),
            _ => return Err(ManifestError::NotAMapping(idx)),
        }
    }
    counter!("manifest_documents_parsed_total", out.len() as u64);
    Ok(out)
}

/// Render documents as one `---`-separated stream, keys in original order.
pub fn render_documents(docs: &[ManifestDocument]) -> ManifestResult<String> {
    let mut out = String::new();
    for doc in docs {
        out.push_str("---\n");
        out.push_str(&doc.to_yaml()?);
    }
    Ok(out)
}

pub fn load_file(path: &Path) -> ManifestResult<Vec<ManifestDocument>> {
    debug!(path = %path.display(), "loading YAML file");
    let text = std::fs::read_to_string(path)
        .map_err(|source| ManifestError::Io { path: path.display().to_string(), source })?;
    parse_documents(&text)
}

/// Write documents to `path`. An empty set writes nothing and logs a warning.
pub fn write_file(path: &Path, docs: &[ManifestDocument]) -> ManifestResult<()> {
    if docs.is_empty() {
        warn!(path = %path.display(), "no documents to write");
        return Ok(());
    }
    debug!(path = %path.display(), count = docs.len(), "writing YAML documents");
    let text = render_documents(docs)?;
    std::fs::write(path, text).map_err(|source| ManifestError::Io { path: path.display().to_string(), source })
}

/// A parsed template. Each [`Template::instance`] is an independent deep copy,
/// so no two workloads share a mutable document graph.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    docs: Vec<ManifestDocument>,
}

impl Template {
    pub fn new(name: impl Into<String>, docs: Vec<ManifestDocument>) -> Self {
        Self { name: name.into(), docs }
    }

    pub fn parse(name: impl Into<String>, yaml: &str) -> ManifestResult<Self> {
        Ok(Self::new(name, parse_documents(yaml)?))
    }

    pub fn load(path: &Path) -> ManifestResult<Self> {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(Self::new(name, load_file(path)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> Vec<ManifestDocument> {
        self.docs.clone()
    }

    /// Deep copy of the first document of a single-document template.
    pub fn single(&self) -> ManifestResult<ManifestDocument> {
        self.docs.first().cloned().ok_or_else(|| ManifestError::MissingKind(self.name.clone()))
    }

    pub fn kinds(&self) -> Vec<String> {
        self.docs.iter().map(|d| d.kind().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apiVersion: argoproj.io/v1alpha1
kind: ApplicationSet
metadata:
  name: sample
  namespace: openshift-gitops
spec:
  generators:
    - clusterDecisionResource:
        labelSelector:
          matchLabels:
            cluster.open-cluster-management.io/placement: sample-placs
  template:
    spec:
      sources:
        - path: old/path
          repoURL: https://example.invalid/repo.git
---
apiVersion: cluster.open-cluster-management.io/v1beta1
kind: Placement
metadata:
  name: sample-placs
spec:
  clusterSets:
    - default
"#;

    #[test]
    fn parses_multi_document_stream_in_order() {
        let docs = parse_documents(SAMPLE).unwrap();
        let kinds: Vec<_> = docs.iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, vec!["ApplicationSet", "Placement"]);
        assert_eq!(docs[1].name(), Some("sample-placs"));
    }

    #[test]
    fn set_edits_value_and_keeps_siblings() {
        let mut doc = parse_documents(SAMPLE).unwrap().remove(0);
        doc.set("spec.template.spec.sources[0].path", "rdr/busybox").unwrap();
        assert_eq!(doc.get_str("spec.template.spec.sources[0].path"), Some("rdr/busybox"));
        assert_eq!(
            doc.get_str("spec.template.spec.sources[0].repoURL"),
            Some("https://example.invalid/repo.git")
        );
        assert_eq!(doc.namespace(), Some("openshift-gitops"));
    }

    #[test]
    fn set_in_handles_dotted_keys() {
        let mut doc = parse_documents(SAMPLE).unwrap().remove(0);
        doc.set_in(
            "spec.generators[0].clusterDecisionResource.labelSelector.matchLabels",
            "cluster.open-cluster-management.io/placement",
            "w-placs",
        )
        .unwrap();
        let labels = doc.get("spec.generators[0].clusterDecisionResource.labelSelector.matchLabels").unwrap();
        assert_eq!(labels.get("cluster.open-cluster-management.io/placement").and_then(Value::as_str), Some("w-placs"));
    }

    #[test]
    fn missing_parent_is_reported_with_kind() {
        let mut doc = parse_documents(SAMPLE).unwrap().remove(1);
        let e = doc.set("spec.predicates[0].requiredClusterSelector", "x").unwrap_err();
        let msg = e.to_string();
        assert!(msg.contains("Placement") && msg.contains("spec.predicates[0]"), "msg={}", msg);
        let oob = doc.set("spec.clusterSets[3]", "x").unwrap_err();
        assert!(matches!(oob, ManifestError::MissingPath { .. }));
    }

    #[test]
    fn annotate_does_not_overwrite() {
        let mut doc = parse_documents(SAMPLE).unwrap().remove(1);
        assert!(doc.annotate("a.io/flag", "true").unwrap());
        assert!(!doc.annotate("a.io/flag", "false").unwrap());
        let ann = doc.get("metadata.annotations").unwrap();
        assert_eq!(ann.get("a.io/flag").and_then(Value::as_str), Some("true"));
    }

    #[test]
    fn remove_drops_field() {
        let mut doc = parse_documents(SAMPLE).unwrap().remove(0);
        assert!(doc.remove("spec.template").is_some());
        assert!(doc.get("spec.template").is_none());
        assert!(doc.remove("spec.template").is_none());
    }

    #[test]
    fn render_then_parse_preserves_kinds() {
        let docs = parse_documents(SAMPLE).unwrap();
        let text = render_documents(&docs).unwrap();
        let again = parse_documents(&text).unwrap();
        assert_eq!(again, docs);
    }

    #[test]
    fn template_instances_are_independent() {
        let t = Template::parse("sample", SAMPLE).unwrap();
        let mut a = t.instance();
        a[0].set("metadata.name", "changed").unwrap();
        let b = t.instance();
        assert_eq!(b[0].name(), Some("sample"));
        assert_eq!(t.kinds(), vec!["ApplicationSet", "Placement"]);
    }

    #[test]
    fn scalar_documents_are_rejected() {
        let e = parse_documents("--- just a string\n").unwrap_err();
        assert!(matches!(e, ManifestError::NotAMapping(0)));
    }

    #[test]
    fn node_budget_spans_the_whole_stream() {
        let doc = "kind: A\nspec:\n  items: [1, 2, 3]\n";
        // one document: root, kind, spec, items, 3 scalars = 7 nodes
        assert_eq!(parse_with_budget(doc, NodeBudget::new(8)).unwrap().len(), 1);
        assert!(matches!(parse_with_budget(doc, NodeBudget::new(7)), Err(ManifestError::TooComplex(7))));
        let two = format!("{doc}---\n{doc}");
        assert!(matches!(parse_with_budget(&two, NodeBudget::new(10)), Err(ManifestError::TooComplex(10))));
        assert_eq!(parse_with_budget(&two, NodeBudget::new(15)).unwrap().len(), 2);
    }

    #[test]
    fn write_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.yaml");
        let docs = parse_documents(SAMPLE).unwrap();
        write_file(&p, &docs).unwrap();
        assert_eq!(load_file(&p).unwrap(), docs);
        let empty = dir.path().join("empty.yaml");
        write_file(&empty, &[]).unwrap();
        assert!(!empty.exists());
    }
}
