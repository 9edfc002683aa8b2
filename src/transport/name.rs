use std::fmt::{Display, Formatter};

/// One name component. Segment numbers and timestamps are typed so that a branch
/// literally called `7` is never mistaken for a segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    Generic(String),
    Segment(u64),
    Timestamp(u64),
}

impl Component {
    /// Parses one printed component; `%2F` and `%25` stand for `/` and `%`.
    pub fn parse(s: &str) -> Component {
        if let Some(n) = s.strip_prefix("seg=").and_then(|n| n.parse().ok()) {
            return Component::Segment(n);
        }
        if let Some(t) = s.strip_prefix("t=").and_then(|t| t.parse().ok()) {
            return Component::Timestamp(t);
        }
        Component::Generic(unescape(s))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Component::Generic(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_timestamp(&self) -> Option<u64> {
        match self {
            Component::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Component::Generic(s) => write!(f, "{}", s.replace('%', "%25").replace('/', "%2F")),
            Component::Segment(n) => write!(f, "seg={}", n),
            Component::Timestamp(t) => write!(f, "t={}", t),
        }
    }
}

fn unescape(s: &str) -> String {
    if !s.contains('%') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        let escaped = &rest[at..];
        if escaped.get(1..3).is_some_and(|hex| hex.eq_ignore_ascii_case("2f")) {
            out.push('/');
            rest = &escaped[3..];
        } else if escaped.starts_with("%25") {
            out.push('%');
            rest = &escaped[3..];
        } else {
            out.push('%');
            rest = &escaped[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Hierarchical name, printed as `/a/b/seg=3`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    components: Vec<Component>,
}

impl Name {
    pub fn new() -> Name {
        Name::default()
    }

    pub fn parse(uri: &str) -> Name {
        Name {
            components: uri
                .split('/')
                .filter(|c| !c.is_empty())
                .map(Component::parse)
                .collect(),
        }
    }

    pub fn append(mut self, component: impl Into<String>) -> Name {
        self.components.push(Component::Generic(component.into()));
        self
    }

    pub fn append_segment(mut self, segment: u64) -> Name {
        self.components.push(Component::Segment(segment));
        self
    }

    pub fn append_timestamp(mut self, timestamp: u64) -> Name {
        self.components.push(Component::Timestamp(timestamp));
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Component at `index`; negative indexes count from the end.
    pub fn get(&self, index: isize) -> Option<&Component> {
        let index = if index < 0 {
            self.components.len().checked_sub(index.unsigned_abs())?
        } else {
            index as usize
        };
        self.components.get(index)
    }

    pub fn is_prefix_of(&self, other: &Name) -> bool {
        other.components.starts_with(&self.components)
    }

    /// Components of `self` after `prefix`, if `prefix` is a prefix of it.
    pub fn strip_prefix(&self, prefix: &Name) -> Option<&[Component]> {
        self.components.strip_prefix(prefix.components.as_slice())
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

impl From<&str> for Name {
    fn from(uri: &str) -> Self {
        Name::parse(uri)
    }
}
