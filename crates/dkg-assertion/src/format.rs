//! Assertion formatter
//!
//! Turns a graph payload (JSON-LD subset, see [`format_graph`]) into a
//! canonical statement set. The canonical form is the sorted, de-duplicated
//! list of N-Quads style lines, so neither document order nor map iteration
//! order can influence it. Blank nodes are labelled from a digest of their
//! own content for the same reason.

use crate::hash::ContentHash;
use crate::merkle::StatementTree;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";

/// Predicate linking a public assertion to the root of its private part
pub const PRIVATE_ROOT_PREDICATE: &str = "https://ontology.origintrail.io/dkg/1.0#privateMerkleRoot";

/// Formatting failures. Always fatal: retrying the same payload cannot help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// Payload is not a well-formed graph
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
}

fn invalid(reason: impl Into<String>) -> FormatError {
    FormatError::InvalidGraph(reason.into())
}

/// Raw content to publish: a public sub-graph and an optional private one
#[derive(Debug, Clone, PartialEq)]
pub struct GraphPayload {
    pub public: Value,
    pub private: Option<Value>,
}

impl GraphPayload {
    /// Payload with only public content
    #[must_use]
    pub fn public(graph: Value) -> Self {
        Self {
            public: graph,
            private: None,
        }
    }

    /// Attach a private sub-graph
    #[must_use]
    pub fn with_private(mut self, graph: Value) -> Self {
        self.private = Some(graph);
        self
    }

    /// Split a `{"public": .., "private": ..}` document
    ///
    /// # Errors
    /// [`FormatError::InvalidGraph`] when the document is not an object or
    /// lacks `public`
    pub fn from_value(value: Value) -> Result<Self, FormatError> {
        let Value::Object(mut map) = value else {
            return Err(invalid("payload must be an object"));
        };
        let public = map
            .remove("public")
            .ok_or_else(|| invalid("payload has no public sub-graph"))?;
        let private = map.remove("private").filter(|v| !v.is_null());
        Ok(Self { public, private })
    }
}

/// A canonicalized sub-graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalGraph {
    statements: Vec<String>,
    root: ContentHash,
}

impl CanonicalGraph {
    fn from_set(set: BTreeSet<String>) -> Self {
        let statements: Vec<String> = set.into_iter().collect();
        let root = StatementTree::from_statements(&statements).root();
        Self { statements, root }
    }

    /// Canonical statements in order
    #[inline]
    #[must_use]
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Merkle root over the statements
    #[inline]
    #[must_use]
    pub fn root(&self) -> ContentHash {
        self.root
    }

    /// Serialized form, one statement per line
    #[must_use]
    pub fn to_nquads(&self) -> String {
        let mut out = String::with_capacity(self.byte_size());
        for statement in &self.statements {
            out.push_str(statement);
            out.push('\n');
        }
        out
    }

    /// Size in bytes of [`to_nquads`](Self::to_nquads)
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.statements.iter().map(|s| s.len() + 1).sum()
    }

    /// Merkle tree over the statements, for inclusion proofs
    #[must_use]
    pub fn tree(&self) -> StatementTree {
        StatementTree::from_statements(&self.statements)
    }
}

/// Formatted, content-addressed assertion
///
/// Immutable once built. Equal logical content always yields an equal
/// [`content_id`](Self::content_id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    public: CanonicalGraph,
    private: Option<CanonicalGraph>,
}

impl Assertion {
    /// Content identifier (Merkle root of the public part)
    #[inline]
    #[must_use]
    pub fn content_id(&self) -> ContentHash {
        self.public.root()
    }

    /// Byte size of the public canonical form
    #[inline]
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.public.byte_size()
    }

    #[inline]
    #[must_use]
    pub fn public(&self) -> &CanonicalGraph {
        &self.public
    }

    #[inline]
    #[must_use]
    pub fn private(&self) -> Option<&CanonicalGraph> {
        self.private.as_ref()
    }

    /// Root of the private part, if any
    #[must_use]
    pub fn private_id(&self) -> Option<ContentHash> {
        self.private.as_ref().map(CanonicalGraph::root)
    }
}

/// Canonicalize a payload into an [`Assertion`]
///
/// Accepted shape per sub-graph: a node object, or an object holding an
/// `@graph` array of node objects, either with an optional `@context`.
/// Contexts may be a vocabulary string, an object with `@vocab` and term
/// mappings, or an array of those. Nodes without `@id` become blank nodes.
///
/// # Errors
/// [`FormatError::InvalidGraph`] for any shape outside that subset, `null`
/// values, unexpandable keys or an empty sub-graph
pub fn format_graph(payload: &GraphPayload) -> Result<Assertion, FormatError> {
    let private = payload
        .private
        .as_ref()
        .map(|graph| canonicalize(graph).map(CanonicalGraph::from_set))
        .transpose()?;

    let mut public = canonicalize(&payload.public)?;
    if let Some(private) = &private {
        public.insert(format!(
            "_:private <{PRIVATE_ROOT_PREDICATE}> \"{}\" .",
            private.root()
        ));
    }

    Ok(Assertion {
        public: CanonicalGraph::from_set(public),
        private,
    })
}

fn canonicalize(graph: &Value) -> Result<BTreeSet<String>, FormatError> {
    let obj = graph
        .as_object()
        .ok_or_else(|| invalid("sub-graph must be an object"))?;

    let mut ctx = Context::default();
    if let Some(local) = obj.get("@context") {
        ctx.merge(local)?;
    }

    let mut emitter = Emitter::default();
    match obj.get("@graph") {
        Some(Value::Array(nodes)) => {
            for node in nodes {
                let node = node
                    .as_object()
                    .ok_or_else(|| invalid("@graph entries must be node objects"))?;
                emitter.node(&ctx, node)?;
            }
        }
        Some(_) => return Err(invalid("@graph must be an array")),
        None => {
            emitter.node(&ctx, obj)?;
        }
    }

    if emitter.out.is_empty() {
        return Err(invalid("graph has no statements"));
    }
    Ok(emitter.out)
}

#[derive(Debug, Clone, Default)]
struct Context {
    vocab: Option<String>,
    terms: BTreeMap<String, String>,
}

impl Context {
    fn merge(&mut self, value: &Value) -> Result<(), FormatError> {
        match value {
            Value::String(base) => {
                self.vocab = Some(vocab_base(base));
                Ok(())
            }
            Value::Array(items) => items.iter().try_for_each(|item| self.merge(item)),
            Value::Object(map) => {
                for (term, definition) in map {
                    match (term.as_str(), definition) {
                        ("@vocab", Value::String(v)) => self.vocab = Some(v.clone()),
                        ("@vocab", _) => return Err(invalid("@vocab must be a string")),
                        (_, Value::String(iri)) => {
                            self.terms.insert(term.clone(), iri.clone());
                        }
                        (_, Value::Object(def)) => {
                            let iri = def
                                .get("@id")
                                .and_then(Value::as_str)
                                .ok_or_else(|| invalid(format!("term {term} has no @id")))?;
                            self.terms.insert(term.clone(), iri.to_owned());
                        }
                        _ => return Err(invalid(format!("unsupported definition for {term}"))),
                    }
                }
                Ok(())
            }
            _ => Err(invalid("@context must be a string, object or array")),
        }
    }

    fn expand(&self, term: &str) -> Result<String, FormatError> {
        if let Some(iri) = self.terms.get(term) {
            return Ok(iri.clone());
        }
        if term.contains(':') {
            return Ok(term.to_owned());
        }
        self.vocab
            .as_ref()
            .map(|vocab| format!("{vocab}{term}"))
            .ok_or_else(|| invalid(format!("cannot expand term {term}")))
    }
}

fn vocab_base(base: &str) -> String {
    if base.ends_with('/') || base.ends_with('#') {
        base.to_owned()
    } else {
        format!("{base}/")
    }
}

#[derive(Debug, Default)]
struct Emitter {
    out: BTreeSet<String>,
}

impl Emitter {
    /// Emit a node's statements and return its subject term
    fn node(&mut self, outer: &Context, obj: &Map<String, Value>) -> Result<String, FormatError> {
        let scoped;
        let ctx = match obj.get("@context") {
            Some(local) => {
                let mut merged = outer.clone();
                merged.merge(local)?;
                scoped = merged;
                &scoped
            }
            None => outer,
        };

        let mut pairs: Vec<(String, String)> = Vec::new();
        for (key, value) in obj {
            match key.as_str() {
                "@id" | "@context" => {}
                "@type" => {
                    for ty in flatten(value) {
                        let ty = ty
                            .as_str()
                            .ok_or_else(|| invalid("@type values must be strings"))?;
                        pairs.push((iri(RDF_TYPE), iri(&ctx.expand(ty)?)));
                    }
                }
                k if k.starts_with('@') => {
                    return Err(invalid(format!("unsupported keyword {k} in node")));
                }
                _ => {
                    let predicate = iri(&ctx.expand(key)?);
                    let mut objects = Vec::new();
                    self.objects(ctx, value, &mut objects)?;
                    pairs.extend(objects.into_iter().map(|o| (predicate.clone(), o)));
                }
            }
        }

        let subject = match obj.get("@id") {
            Some(Value::String(id)) => subject_term(id),
            Some(_) => return Err(invalid("@id must be a string")),
            None => blank_label(&mut pairs)?,
        };

        for (predicate, object) in pairs {
            self.out.insert(format!("{subject} {predicate} {object} ."));
        }
        Ok(subject)
    }

    /// Object terms of a property value; arrays contribute every item
    fn objects(
        &mut self,
        ctx: &Context,
        value: &Value,
        terms: &mut Vec<String>,
    ) -> Result<(), FormatError> {
        let term = match value {
            Value::Null => return Err(invalid("null values are not allowed")),
            Value::Bool(b) => typed_literal(&b.to_string(), XSD_BOOLEAN),
            Value::Number(n) => number_literal(n),
            Value::String(s) => format!("\"{}\"", escape(s)),
            Value::Array(items) => {
                for item in items {
                    self.objects(ctx, item, terms)?;
                }
                return Ok(());
            }
            Value::Object(map) => match (map.get("@value"), map.get("@id")) {
                (Some(raw), _) => value_object(ctx, raw, map)?,
                (None, Some(Value::String(id))) if map.len() == 1 => subject_term(id),
                _ => self.node(ctx, map)?,
            },
        };
        terms.push(term);
        Ok(())
    }
}

fn value_object(ctx: &Context, raw: &Value, map: &Map<String, Value>) -> Result<String, FormatError> {
    let lexical = match raw {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(invalid("@value must be a scalar")),
    };
    match (map.get("@type"), map.get("@language")) {
        (Some(Value::String(ty)), None) => Ok(typed_literal(&lexical, &ctx.expand(ty)?)),
        (None, Some(Value::String(lang))) => Ok(format!(
            "\"{}\"@{}",
            escape(&lexical),
            lang.to_ascii_lowercase()
        )),
        (None, None) => Ok(match raw {
            Value::Bool(_) => typed_literal(&lexical, XSD_BOOLEAN),
            Value::Number(n) => number_literal(n),
            _ => format!("\"{}\"", escape(&lexical)),
        }),
        _ => Err(invalid("value object has conflicting @type/@language")),
    }
}

fn flatten(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().flat_map(flatten).collect(),
        other => vec![other],
    }
}

/// Label a blank node from its sorted predicate/object pairs
fn blank_label(pairs: &mut [(String, String)]) -> Result<String, FormatError> {
    if pairs.is_empty() {
        return Err(invalid("blank node without properties"));
    }
    pairs.sort();
    let mut digest_input = String::new();
    for (predicate, object) in pairs.iter() {
        digest_input.push_str(predicate);
        digest_input.push(' ');
        digest_input.push_str(object);
        digest_input.push('\n');
    }
    Ok(format!("_:c14n{}", ContentHash::compute(digest_input.as_bytes()).short()))
}

fn subject_term(id: &str) -> String {
    if id.starts_with("_:") {
        id.to_owned()
    } else {
        iri(id)
    }
}

fn iri(value: &str) -> String {
    format!("<{value}>")
}

fn typed_literal(lexical: &str, datatype: &str) -> String {
    format!("\"{}\"^^<{datatype}>", escape(lexical))
}

fn number_literal(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        typed_literal(&n.to_string(), XSD_INTEGER)
    } else {
        let f = n.as_f64().unwrap_or_default();
        typed_literal(&format!("{f:E}"), XSD_DOUBLE)
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn person(id: &str, email: &str) -> Value {
        json!({
            "@type": "Person",
            "id": id,
            "email": email,
            "ip_address": "10.0.0.1"
        })
    }

    fn schema_graph(nodes: Vec<Value>) -> Value {
        json!({
            "@context": {
                "@vocab": "http://schema.org/",
                "id": "http://schema.org/identifier",
                "ip_address": "http://schema.org/IPAddress"
            },
            "@graph": nodes
        })
    }

    #[test]
    fn node_order_does_not_change_identifier() {
        let a = schema_graph(vec![person("1", "a@x.io"), person("2", "b@x.io")]);
        let b = schema_graph(vec![person("2", "b@x.io"), person("1", "a@x.io")]);
        let fa = format_graph(&GraphPayload::public(a)).unwrap();
        let fb = format_graph(&GraphPayload::public(b)).unwrap();
        assert_eq!(fa.content_id(), fb.content_id());
        assert_eq!(fa.public().to_nquads(), fb.public().to_nquads());
    }

    #[test]
    fn different_content_yields_different_identifier() {
        let a = schema_graph(vec![person("1", "a@x.io")]);
        let b = schema_graph(vec![person("1", "c@x.io")]);
        let fa = format_graph(&GraphPayload::public(a)).unwrap();
        let fb = format_graph(&GraphPayload::public(b)).unwrap();
        assert_ne!(fa.content_id(), fb.content_id());
    }

    #[test]
    fn iri_subjects_and_links() {
        let graph = json!({
            "@context": ["http://schema.org"],
            "@id": "uuid:1",
            "company": "BAH",
            "user": {"@id": "uuid:user:1"}
        });
        let assertion = format_graph(&GraphPayload::public(graph)).unwrap();
        let statements = assertion.public().statements();
        assert!(statements.contains(&"<uuid:1> <http://schema.org/company> \"BAH\" .".to_string()));
        assert!(statements.contains(&"<uuid:1> <http://schema.org/user> <uuid:user:1> .".to_string()));
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn nested_value_arrays_flatten_into_statements() {
        let graph = |keywords: Value| {
            json!({
                "@context": ["http://schema.org"],
                "@id": "uuid:1",
                "keywords": keywords
            })
        };
        let nested = format_graph(&GraphPayload::public(graph(json!(["a", ["b", "c"]])))).unwrap();
        let flat = format_graph(&GraphPayload::public(graph(json!(["a", "b", "c"])))).unwrap();

        let statements = nested.public().statements();
        assert_eq!(statements.len(), 3);
        for word in ["a", "b", "c"] {
            let line = format!("<uuid:1> <http://schema.org/keywords> \"{word}\" .");
            assert!(statements.contains(&line), "missing {line}");
        }
        assert_eq!(statements, flat.public().statements());
        assert_eq!(nested.content_id(), flat.content_id());
    }

    #[test]
    fn typed_literals() {
        let graph = json!({
            "@context": {"@vocab": "http://schema.org/"},
            "@id": "urn:x",
            "count": 3,
            "ratio": 1.5,
            "active": true,
            "name": {"@value": "Lee", "@language": "EN"}
        });
        let nquads = format_graph(&GraphPayload::public(graph))
            .unwrap()
            .public()
            .to_nquads();
        assert!(nquads.contains(&format!("\"3\"^^<{XSD_INTEGER}>")));
        assert!(nquads.contains(&format!("\"1.5E0\"^^<{XSD_DOUBLE}>")));
        assert!(nquads.contains(&format!("\"true\"^^<{XSD_BOOLEAN}>")));
        assert!(nquads.contains("\"Lee\"@en"));
    }

    #[test]
    fn byte_size_matches_serialized_form() {
        let graph = schema_graph(vec![person("1", "a@x.io")]);
        let assertion = format_graph(&GraphPayload::public(graph)).unwrap();
        assert_eq!(assertion.byte_size(), assertion.public().to_nquads().len());
    }

    #[test]
    fn private_part_commits_into_public_identifier() {
        let public = json!({"@context": "http://schema.org", "@id": "uuid:1", "company": "BAH"});
        let private_a = json!({"@context": "http://schema.org", "@id": "uuid:user:1", "name": "lee"});
        let private_b = json!({"@context": "http://schema.org", "@id": "uuid:user:1", "name": "kim"});

        let a = format_graph(&GraphPayload::public(public.clone()).with_private(private_a)).unwrap();
        let b = format_graph(&GraphPayload::public(public).with_private(private_b)).unwrap();

        assert!(a.private_id().is_some());
        assert_ne!(a.private_id(), b.private_id());
        assert_ne!(a.content_id(), b.content_id());
    }

    #[test]
    fn escapes_quotes_and_newlines() {
        let graph = json!({"@id": "urn:x", "urn:p": "say \"hi\"\nbye"});
        let assertion = format_graph(&GraphPayload::public(graph)).unwrap();
        assert_eq!(
            assertion.public().statements()[0],
            "<urn:x> <urn:p> \"say \\\"hi\\\"\\nbye\" ."
        );
    }

    #[test]
    fn malformed_graphs_are_rejected() {
        let cases = vec![
            json!("not an object"),
            json!({"@graph": "nope"}),
            json!({"@graph": []}),
            json!({"@id": "urn:x", "unmapped": "v"}),
            json!({"@id": "urn:x", "urn:p": null}),
            json!({"@id": 5, "urn:p": "v"}),
            json!({"@context": 7, "urn:p": "v"}),
        ];
        for case in cases {
            let result = format_graph(&GraphPayload::public(case.clone()));
            assert!(
                matches!(result, Err(FormatError::InvalidGraph(_))),
                "expected InvalidGraph for {case}"
            );
        }
    }

    #[test]
    fn payload_requires_public_part() {
        let err = GraphPayload::from_value(json!({"private": {}})).unwrap_err();
        assert!(matches!(err, FormatError::InvalidGraph(_)));
        let payload = GraphPayload::from_value(json!({"public": {"urn:p": 1}})).unwrap();
        assert!(payload.private.is_none());
    }

    #[test]
    fn nested_blank_nodes_are_order_independent() {
        let a = json!({
            "@id": "urn:org",
            "urn:member": [
                {"urn:name": "a", "urn:role": {"urn:title": "lead"}},
                {"urn:name": "b"}
            ]
        });
        let b = json!({
            "@id": "urn:org",
            "urn:member": [
                {"urn:name": "b"},
                {"urn:role": {"urn:title": "lead"}, "urn:name": "a"}
            ]
        });
        let fa = format_graph(&GraphPayload::public(a)).unwrap();
        let fb = format_graph(&GraphPayload::public(b)).unwrap();
        assert_eq!(fa.content_id(), fb.content_id());
        assert_eq!(fa.public().statements().len(), 6);
    }

    proptest! {
        #[test]
        fn any_permutation_gives_same_identifier(
            values in proptest::collection::btree_set("[a-z]{1,8}", 1..8),
            seed in any::<u64>(),
        ) {
            let nodes: Vec<Value> = values
                .iter()
                .map(|v| json!({"@id": format!("urn:{v}"), "urn:label": v}))
                .collect();
            let mut shuffled = nodes.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let a = format_graph(&GraphPayload::public(json!({"@graph": nodes}))).unwrap();
            let b = format_graph(&GraphPayload::public(json!({"@graph": shuffled}))).unwrap();
            prop_assert_eq!(a.content_id(), b.content_id());
        }
    }
}
