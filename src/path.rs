//! Field paths and the path templates rules are bound to.
//!
//! A [`Path`] locates one concrete field inside an object, e.g.
//! `spec.drivers[0].nodeID`. A [`PathTemplate`] is the form a rule declares,
//! where `[*]` stands for every item of a list, e.g. `spec.drivers[*].nodeID`.
//! Templates are resolved against an object to produce concrete paths.

use std::fmt;

/// One step of a [`Path`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A named field of an object.
    Field(String),
    /// A position in a list.
    Index(usize),
    /// A key of a map-valued field.
    Key(String),
}

/// A concrete location of a field inside an object.
///
/// Paths are never mutated; [`child`](Path::child), [`index`](Path::index)
/// and [`key`](Path::key) return a new path with one more segment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// The empty path, pointing at the object itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// A path with a single field segment.
    pub fn new(name: impl Into<String>) -> Self {
        Self::root().child(name)
    }

    /// Build a path from a sequence of field names.
    ///
    /// `Path::from_fields(["spec", "attacher"])` renders as `spec.attacher`.
    pub fn from_fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .fold(Self::root(), |path, name| path.child(name))
    }

    /// This path extended by the object field `name`.
    pub fn child(&self, name: impl Into<String>) -> Self {
        self.with(Segment::Field(name.into()))
    }

    /// This path extended by list position `index`.
    pub fn index(&self, index: usize) -> Self {
        self.with(Segment::Index(index))
    }

    /// This path extended by map key `key`.
    pub fn key(&self, key: impl Into<String>) -> Self {
        self.with(Segment::Key(key.into()))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Parse a rendered path such as `spec.drivers[0].nodeID`.
    ///
    /// Bracketed segments made only of ASCII digits parse as list indices,
    /// anything else in brackets as a map key.
    pub fn parse(input: &str) -> Result<Self, TemplateError> {
        let mut path = Self::root();
        for token in tokenize(input)? {
            path = match token {
                Token::Field(name) => path.child(name),
                Token::Bracket(inner) => match inner.parse::<usize>() {
                    Ok(i) if inner.bytes().all(|b| b.is_ascii_digit()) => path.index(i),
                    _ => path.key(inner),
                },
            };
        }
        Ok(path)
    }

    fn with(&self, segment: Segment) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment);
        Self { segments }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Field(name) if i == 0 => f.write_str(name)?,
                Segment::Field(name) => write!(f, ".{name}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Key(key) => write!(f, "[{key}]")?,
            }
        }
        Ok(())
    }
}

impl serde::Serialize for Path {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Errors produced while parsing a [`Path`] or [`PathTemplate`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("path is empty")]
    Empty,
    #[error("empty field name at byte {position} of \"{input}\"")]
    EmptySegment { input: String, position: usize },
    #[error("expected '.' or '[' at byte {position} of \"{input}\"")]
    MissingSeparator { input: String, position: usize },
    #[error("unterminated '[' in \"{input}\"")]
    Unterminated { input: String },
    #[error("unsupported list selector \"[{selector}]\" in \"{input}\", only [*] is allowed")]
    Selector { input: String, selector: String },
}

/// One step of a [`PathTemplate`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TemplateSegment {
    Field(String),
    /// `[*]`: every item of a list.
    Each,
}

/// A field locator declared by a rule.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathTemplate {
    source: String,
    segments: Vec<TemplateSegment>,
}

/// A concrete location produced by resolving a [`PathTemplate`].
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved<'a> {
    pub path: Path,
    /// `None` when the final field is absent from its parent object.
    pub value: Option<&'a serde_json::Value>,
}

impl PathTemplate {
    pub fn parse(input: &str) -> Result<Self, TemplateError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(TemplateError::Empty);
        }
        let segments = tokens
            .into_iter()
            .map(|token| match token {
                Token::Field(name) => Ok(TemplateSegment::Field(name.to_string())),
                Token::Bracket("*") => Ok(TemplateSegment::Each),
                Token::Bracket(other) => Err(TemplateError::Selector {
                    input: input.to_string(),
                    selector: other.to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source: input.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[TemplateSegment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Resolve the template against an object.
    ///
    /// Resolution stops at an absent or null intermediate value, so children
    /// of a missing parent are never reported. A missing final field yields a
    /// [`Resolved`] with `value: None`.
    pub fn resolve<'a>(&self, root: &'a serde_json::Value) -> Vec<Resolved<'a>> {
        let mut out = Vec::new();
        resolve_into(&self.segments, Path::root(), Some(root), &mut out);
        out
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn resolve_into<'a>(
    segments: &[TemplateSegment],
    path: Path,
    value: Option<&'a serde_json::Value>,
    out: &mut Vec<Resolved<'a>>,
) {
    let Some((first, rest)) = segments.split_first() else {
        out.push(Resolved { path, value });
        return;
    };
    let Some(current) = value.filter(|v| !v.is_null()) else {
        return;
    };
    match first {
        TemplateSegment::Field(name) => {
            let Some(obj) = current.as_object() else {
                return;
            };
            let child = obj.get(name);
            if child.is_none() && !rest.is_empty() {
                return;
            }
            resolve_into(rest, path.child(name.as_str()), child, out);
        }
        TemplateSegment::Each => {
            if let Some(items) = current.as_array() {
                for (i, item) in items.iter().enumerate() {
                    resolve_into(rest, path.index(i), Some(item), out);
                }
            }
        }
    }
}

enum Token<'a> {
    Field(&'a str),
    Bracket(&'a str),
}

fn tokenize(input: &str) -> Result<Vec<Token<'_>>, TemplateError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut pos = 0;
    let mut expect_field = true;

    while pos < bytes.len() {
        match bytes[pos] {
            b'[' => {
                let close = input[pos..]
                    .find(']')
                    .map(|off| pos + off)
                    .ok_or_else(|| TemplateError::Unterminated {
                        input: input.to_string(),
                    })?;
                tokens.push(Token::Bracket(&input[pos + 1..close]));
                pos = close + 1;
                expect_field = false;
            }
            b'.' => {
                if expect_field {
                    return Err(TemplateError::EmptySegment {
                        input: input.to_string(),
                        position: pos,
                    });
                }
                pos += 1;
                expect_field = true;
                if pos == bytes.len() {
                    return Err(TemplateError::EmptySegment {
                        input: input.to_string(),
                        position: pos,
                    });
                }
            }
            _ => {
                if !expect_field {
                    return Err(TemplateError::MissingSeparator {
                        input: input.to_string(),
                        position: pos,
                    });
                }
                let end = input[pos..]
                    .find(['.', '['])
                    .map(|off| pos + off)
                    .unwrap_or(input.len());
                tokens.push(Token::Field(&input[pos..end]));
                pos = end;
                expect_field = false;
            }
        }
    }
    Ok(tokens)
}
