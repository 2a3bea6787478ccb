//! Grammar of textual asset paths.
//!
//! ```text
//! path     := element+
//! element  := sep name [ '#' instance ]
//! sep      := '/' (descend into a package) | ':' (descend into an object)
//! instance := '0' | [1-9][0-9]*
//! ```
//!
//! A doubled `::` inside a name is literal content so that qualified names like
//! `Render::Mesh` can be used as object names. Packages may only nest under packages, so
//! a `/` after the first object element is rejected.

use tessera_shared::thiserror;

pub const PACKAGE_SEPARATOR: char = '/';
pub const OBJECT_SEPARATOR: char = ':';
pub const INSTANCE_SEPARATOR: char = '#';

/// Reserved value that never denotes a valid instance.
pub const INVALID_INSTANCE: u32 = u32::MAX;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathElement {
    pub name: String,
    pub instance_index: Option<u32>,
    pub is_package: bool,
}

impl PathElement {
    pub fn package(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_index: None,
            is_package: true,
        }
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_index: None,
            is_package: false,
        }
    }

    pub fn with_instance(mut self, instance_index: u32) -> Self {
        self.instance_index = Some(instance_index);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Path is empty")]
    Empty,
    #[error("Path '{0}' doesn't start with '/' or ':'")]
    MissingLeadingSeparator(String),
    #[error("Path '{path}' contains an empty name at byte {position}")]
    EmptyName { path: String, position: usize },
    #[error("Path '{path}' descends into a package at byte {position} although an object already started")]
    PackageAfterObject { path: String, position: usize },
    #[error("Path '{0}' has an empty instance index")]
    EmptyInstance(String),
    #[error("Instance index '{index}' of path '{path}' is not a decimal number")]
    InvalidInstance { path: String, index: String },
    #[error("Instance index '{index}' of path '{path}' has a leading zero")]
    ZeroPaddedInstance { path: String, index: String },
    #[error("Instance index of path '{0}' is the reserved invalid instance")]
    ReservedInstance(String),
}

/// Splits `text` into its elements.
///
/// # Example
///
/// ```
/// use tessera_content::path_parse::{parse, PathElement};
/// let elements = parse("/Packages/Weapons:Rifle#2").unwrap();
/// assert_eq!(
///     elements,
///     vec![
///         PathElement::package("Packages"),
///         PathElement::package("Weapons"),
///         PathElement::object("Rifle").with_instance(2),
///     ]
/// );
/// ```
pub fn parse(text: &str) -> Result<Vec<PathElement>, ParseError> {
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let bytes = text.as_bytes();
    let starts_with_separator = match bytes[0] {
        b'/' => true,
        b':' => bytes.get(1) != Some(&b':'),
        _ => false,
    };
    if !starts_with_separator {
        return Err(ParseError::MissingLeadingSeparator(text.to_owned()));
    }

    let mut elements = Vec::new();
    let mut seen_object = false;
    let mut position = 0;
    while position < bytes.len() {
        // Every iteration starts on a single separator.
        let is_package = bytes[position] == b'/';
        if is_package && seen_object {
            return Err(ParseError::PackageAfterObject {
                path: text.to_owned(),
                position,
            });
        }
        position += 1;

        let name_start = position;
        while position < bytes.len() {
            match bytes[position] {
                b'/' | b'#' => break,
                b':' if bytes.get(position + 1) == Some(&b':') => position += 2,
                b':' => break,
                _ => position += 1,
            }
        }
        let name = &text[name_start..position];
        if name.is_empty() {
            return Err(ParseError::EmptyName {
                path: text.to_owned(),
                position: name_start,
            });
        }

        let mut instance_index = None;
        if bytes.get(position) == Some(&b'#') {
            position += 1;
            let index_start = position;
            while position < bytes.len() && bytes[position] != b'/' && bytes[position] != b':' {
                position += 1;
            }
            instance_index = Some(parse_instance(text, &text[index_start..position])?);
        }

        elements.push(PathElement {
            name: name.to_owned(),
            instance_index,
            is_package,
        });
        seen_object |= !is_package;
    }
    Ok(elements)
}

fn parse_instance(path: &str, index: &str) -> Result<u32, ParseError> {
    if index.is_empty() {
        return Err(ParseError::EmptyInstance(path.to_owned()));
    }
    let invalid = || ParseError::InvalidInstance {
        path: path.to_owned(),
        index: index.to_owned(),
    };
    if !index.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(invalid());
    }
    if index.len() > 1 && index.starts_with('0') {
        return Err(ParseError::ZeroPaddedInstance {
            path: path.to_owned(),
            index: index.to_owned(),
        });
    }
    let value = index.parse::<u32>().map_err(|_| invalid())?;
    if value == INVALID_INSTANCE {
        return Err(ParseError::ReservedInstance(path.to_owned()));
    }
    Ok(value)
}

/// Returns whether `name` can be used as a single path element so that it survives a round-trip
/// through [`parse`] wherever it is placed. Colons must come in interior pairs.
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.contains(PACKAGE_SEPARATOR) || name.contains(INSTANCE_SEPARATOR) {
        return false;
    }
    if name.starts_with(OBJECT_SEPARATOR) || name.ends_with(OBJECT_SEPARATOR) {
        return false;
    }
    let bytes = name.as_bytes();
    let mut position = 0;
    while position < bytes.len() {
        if bytes[position] == b':' {
            if bytes.get(position + 1) != Some(&b':') {
                return false;
            }
            position += 2;
        } else {
            position += 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packages_and_object() {
        let elements = parse("/Packages/Weapons:Rifle").unwrap();
        assert_eq!(
            elements,
            vec![
                PathElement::package("Packages"),
                PathElement::package("Weapons"),
                PathElement::object("Rifle")
            ]
        );
    }

    #[test]
    fn root_object() {
        assert_eq!(parse(":Settings").unwrap(), vec![PathElement::object("Settings")]);
    }

    #[test]
    fn nested_objects() {
        let elements = parse("/Weapons:Rifle:Scope").unwrap();
        assert_eq!(elements[1], PathElement::object("Rifle"));
        assert_eq!(elements[2], PathElement::object("Scope"));
    }

    #[test]
    fn instance_index() {
        let elements = parse("/Weapons/Rifle#2").unwrap();
        assert_eq!(elements[1], PathElement::package("Rifle").with_instance(2));
        assert_eq!(parse("/A#0").unwrap()[0].instance_index, Some(0));
    }

    #[test]
    fn instance_on_intermediate_element() {
        let elements = parse("/A#3:B").unwrap();
        assert_eq!(elements, vec![PathElement::package("A").with_instance(3), PathElement::object("B")]);
    }

    #[test]
    fn doubled_object_separator_is_literal() {
        let elements = parse("/Types:Render::Mesh").unwrap();
        assert_eq!(elements, vec![PathElement::package("Types"), PathElement::object("Render::Mesh")]);

        let elements = parse("/A:::B").unwrap();
        assert_eq!(elements, vec![PathElement::package("A::"), PathElement::object("B")]);

        let elements = parse("/::A").unwrap();
        assert_eq!(elements, vec![PathElement::package("::A")]);
    }

    #[test]
    fn empty() {
        assert_eq!(parse(""), Err(ParseError::Empty));
    }

    #[test]
    fn missing_leading_separator() {
        assert!(matches!(parse("Weapons:Rifle#2"), Err(ParseError::MissingLeadingSeparator(_))));
        assert!(matches!(parse("::Rifle"), Err(ParseError::MissingLeadingSeparator(_))));
        assert!(matches!(parse("#1"), Err(ParseError::MissingLeadingSeparator(_))));
    }

    #[test]
    fn empty_names() {
        assert!(matches!(parse("/"), Err(ParseError::EmptyName { position: 1, .. })));
        assert!(matches!(parse("//A"), Err(ParseError::EmptyName { .. })));
        assert!(matches!(parse("/A/"), Err(ParseError::EmptyName { .. })));
        assert!(matches!(parse("/A/:B"), Err(ParseError::EmptyName { .. })));
        assert!(matches!(parse("/#1"), Err(ParseError::EmptyName { .. })));
    }

    #[test]
    fn package_after_object() {
        assert_eq!(
            parse("/A:B/C"),
            Err(ParseError::PackageAfterObject {
                path: "/A:B/C".to_owned(),
                position: 4
            })
        );
    }

    #[test]
    fn invalid_instances() {
        assert!(matches!(parse("/Weapons/Rifle#01"), Err(ParseError::ZeroPaddedInstance { .. })));
        assert!(matches!(parse("/Weapons/Rifle#"), Err(ParseError::EmptyInstance(_))));
        assert!(matches!(parse("/Weapons/Rifle#x"), Err(ParseError::InvalidInstance { .. })));
        assert!(matches!(parse("/Weapons/Rifle#-1"), Err(ParseError::InvalidInstance { .. })));
        assert!(matches!(parse("/Weapons/Rifle#1#2"), Err(ParseError::InvalidInstance { .. })));
        assert!(matches!(parse("/A#99999999999"), Err(ParseError::InvalidInstance { .. })));
        assert!(matches!(parse("/A#4294967295"), Err(ParseError::ReservedInstance(_))));
        assert!(parse("/A#4294967294").is_ok());
    }

    #[test]
    fn valid_names() {
        assert!(is_valid_name("Rifle"));
        assert!(is_valid_name("Render::Mesh"));
        assert!(!is_valid_name("::"));
        assert!(!is_valid_name("::A"));
        assert!(!is_valid_name("A::"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("A:B"));
        assert!(!is_valid_name("A:::"));
        assert!(!is_valid_name("A/B"));
        assert!(!is_valid_name("A#1"));
    }
}
