use crate::error::ApiError;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Side-channel key holding fetched data on an expanded reference
pub const EXPANDED_KEY: &str = "__expanded__";

/// A mapping whose `url` member is a string
pub fn is_ref(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|map| map.get("url"))
        .is_some_and(Value::is_string)
}

pub fn ref_url(value: &Value) -> Option<&str> {
    value.as_object()?.get("url")?.as_str()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Key(String),
    Wildcard,
    Index(usize),
}

/// Dotted path selecting references, e.g. `abilities.ability` or `moves.*.move`
///
/// - a name matches a mapping member; sequences on the way are searched
///   element by element
/// - `*` matches every element of a sequence or every member of a mapping
/// - a number selects one sequence element (or a member with that name)
///
/// A selected sequence contributes each of its reference elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathFilter {
    raw: String,
    segments: Vec<Segment>,
}

impl PathFilter {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Pointers to every reference under `root` this filter selects, in
    /// document order.
    pub(super) fn select(&self, root: &Value) -> Vec<Pointer> {
        let mut frontier = vec![(Pointer::root(), root)];
        for segment in &self.segments {
            let mut next = Vec::new();
            for (ptr, node) in frontier {
                step(segment, &ptr, node, &mut next);
            }
            frontier = next;
        }

        let mut out = Vec::new();
        for (ptr, node) in frontier {
            match node {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if is_ref(item) {
                            out.push(ptr.index(i));
                        }
                    }
                }
                _ if is_ref(node) => out.push(ptr),
                _ => {}
            }
        }
        out
    }
}

fn step<'v>(
    segment: &Segment,
    ptr: &Pointer,
    node: &'v Value,
    out: &mut Vec<(Pointer, &'v Value)>,
) {
    match (segment, node) {
        (Segment::Wildcard, Value::Array(items)) => {
            out.extend(items.iter().enumerate().map(|(i, v)| (ptr.index(i), v)));
        }
        (Segment::Wildcard, Value::Object(map)) => {
            out.extend(map.iter().map(|(k, v)| (ptr.key(k), v)));
        }
        (Segment::Index(i), Value::Array(items)) => {
            if let Some(v) = items.get(*i) {
                out.push((ptr.index(*i), v));
            }
        }
        (Segment::Index(i), Value::Object(map)) => {
            let name = i.to_string();
            if let Some(v) = map.get(&name) {
                out.push((ptr.key(&name), v));
            }
        }
        (Segment::Key(k), Value::Object(map)) => {
            if let Some(v) = map.get(k) {
                out.push((ptr.key(k), v));
            }
        }
        (Segment::Key(_), Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                step(segment, &ptr.index(i), item, out);
            }
        }
        _ => {}
    }
}

impl FromStr for PathFilter {
    type Err = ApiError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let segments = raw
            .split('.')
            .map(|segment| match segment {
                "" => Err(ApiError::InvalidRequest {
                    message: format!("empty segment in expansion path '{raw}'"),
                }),
                "*" => Ok(Segment::Wildcard),
                s if s.bytes().all(|b| b.is_ascii_digit()) => s
                    .parse()
                    .map(Segment::Index)
                    .map_err(|e| ApiError::InvalidRequest {
                        message: format!("bad index '{s}' in expansion path '{raw}': {e}"),
                    }),
                s => Ok(Segment::Key(s.to_owned())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }
}

impl fmt::Display for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Step {
    Key(String),
    Index(usize),
}

/// Location of a node inside a JSON document
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Pointer(Vec<Step>);

impl Pointer {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(&self, key: &str) -> Self {
        let mut steps = self.0.clone();
        steps.push(Step::Key(key.to_owned()));
        Self(steps)
    }

    pub fn index(&self, index: usize) -> Self {
        let mut steps = self.0.clone();
        steps.push(Step::Index(index));
        Self(steps)
    }

    /// `self` followed by the steps of `rest`
    pub fn join(&self, rest: &Pointer) -> Self {
        let mut steps = self.0.clone();
        steps.extend(rest.0.iter().cloned());
        Self(steps)
    }

    pub fn get<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.0.iter().try_fold(root, |node, step| match step {
            Step::Key(k) => node.get(k),
            Step::Index(i) => node.get(*i),
        })
    }

    pub fn get_mut<'v>(&self, root: &'v mut Value) -> Option<&'v mut Value> {
        self.0.iter().try_fold(root, |node, step| match step {
            Step::Key(k) => node.get_mut(k),
            Step::Index(i) => node.get_mut(*i),
        })
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (n, step) in self.0.iter().enumerate() {
            if n > 0 {
                f.write_str(".")?;
            }
            match step {
                Step::Key(k) => f.write_str(k)?,
                Step::Index(i) => write!(f, "{i}")?,
            }
        }
        Ok(())
    }
}

/// References directly under `node`: members that are references and
/// reference elements of member sequences.
pub fn immediate_refs(node: &Value) -> Vec<Pointer> {
    let root = Pointer::root();
    let mut out = Vec::new();
    let Value::Object(map) = node else {
        return out;
    };
    for (key, value) in map {
        if is_ref(value) {
            out.push(root.key(key));
        } else if let Value::Array(items) = value {
            for (i, item) in items.iter().enumerate() {
                if is_ref(item) {
                    out.push(root.key(key).index(i));
                }
            }
        }
    }
    out
}
