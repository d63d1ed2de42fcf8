//! Representation of the WDL type system.
//!
//! Types form a lattice with `Any` at the bottom; every type carries an
//! *optional* flag, and arrays additionally carry a *nonempty* flag.
//! Coercion is a partial order over the lattice; the `check_quant` switch
//! relaxes only the optional/nonempty parts of that order for legacy
//! documents.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

/// The member types of a struct or object, in declaration order.
pub type StructMembers = Arc<IndexMap<String, Type>>;

/// Represents a WDL type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// The bottom type, coercible in both directions with every type.
    ///
    /// `Any` is also used for indeterminate types arising from prior type
    /// errors, and `Any?` is the type of the `None` literal.
    Any {
        /// Whether the type is optional.
        optional: bool,
    },
    /// The `Boolean` type.
    Boolean {
        /// Whether the type is optional.
        optional: bool,
    },
    /// The `Int` type.
    Int {
        /// Whether the type is optional.
        optional: bool,
    },
    /// The `Float` type.
    Float {
        /// Whether the type is optional.
        optional: bool,
    },
    /// The `String` type.
    String {
        /// Whether the type is optional.
        optional: bool,
    },
    /// The `File` type.
    File {
        /// Whether the type is optional.
        optional: bool,
    },
    /// The `Directory` type.
    Directory {
        /// Whether the type is optional.
        optional: bool,
    },
    /// An `Array[T]` type.
    Array {
        /// The item type.
        item: Box<Type>,
        /// Whether the type is optional.
        optional: bool,
        /// Whether the `+` (nonempty) quantifier applies.
        nonempty: bool,
    },
    /// A `Map[K, V]` type.
    Map {
        /// The key type.
        key: Box<Type>,
        /// The value type.
        value: Box<Type>,
        /// Whether the type is optional.
        optional: bool,
    },
    /// A `Pair[L, R]` type.
    Pair {
        /// The left type.
        left: Box<Type>,
        /// The right type.
        right: Box<Type>,
        /// Whether the type is optional.
        optional: bool,
    },
    /// A struct instance type.
    ///
    /// An empty name denotes an anonymous struct, which is how `object`
    /// literals and the pre-1.0 `Object` sentinel are represented.
    Struct {
        /// The name of the struct type (empty for anonymous).
        name: String,
        /// The member types.
        members: StructMembers,
        /// Whether the type is optional.
        optional: bool,
    },
}

impl Type {
    /// Creates the `Any` type.
    pub fn any() -> Self {
        Self::Any { optional: false }
    }

    /// Creates the type of the `None` literal (`Any?`).
    pub fn none() -> Self {
        Self::Any { optional: true }
    }

    /// Creates the `Boolean` type.
    pub fn boolean() -> Self {
        Self::Boolean { optional: false }
    }

    /// Creates the `Int` type.
    pub fn int() -> Self {
        Self::Int { optional: false }
    }

    /// Creates the `Float` type.
    pub fn float() -> Self {
        Self::Float { optional: false }
    }

    /// Creates the `String` type.
    pub fn string() -> Self {
        Self::String { optional: false }
    }

    /// Creates the `File` type.
    pub fn file() -> Self {
        Self::File { optional: false }
    }

    /// Creates the `Directory` type.
    pub fn directory() -> Self {
        Self::Directory { optional: false }
    }

    /// Creates an `Array[T]` type.
    pub fn array(item: Type) -> Self {
        Self::Array {
            item: Box::new(item),
            optional: false,
            nonempty: false,
        }
    }

    /// Creates a nonempty `Array[T]+` type.
    pub fn nonempty_array(item: Type) -> Self {
        Self::Array {
            item: Box::new(item),
            optional: false,
            nonempty: true,
        }
    }

    /// Creates a `Map[K, V]` type.
    pub fn map(key: Type, value: Type) -> Self {
        Self::Map {
            key: Box::new(key),
            value: Box::new(value),
            optional: false,
        }
    }

    /// Creates a `Pair[L, R]` type.
    pub fn pair(left: Type, right: Type) -> Self {
        Self::Pair {
            left: Box::new(left),
            right: Box::new(right),
            optional: false,
        }
    }

    /// Creates a named struct instance type.
    pub fn struct_instance(name: impl Into<String>, members: StructMembers) -> Self {
        Self::Struct {
            name: name.into(),
            members,
            optional: false,
        }
    }

    /// Creates an anonymous struct (object) type.
    pub fn object(members: IndexMap<String, Type>) -> Self {
        Self::Struct {
            name: String::new(),
            members: Arc::new(members),
            optional: false,
        }
    }

    /// Determines if the type is optional.
    pub fn is_optional(&self) -> bool {
        match self {
            Self::Any { optional }
            | Self::Boolean { optional }
            | Self::Int { optional }
            | Self::Float { optional }
            | Self::String { optional }
            | Self::File { optional }
            | Self::Directory { optional }
            | Self::Array { optional, .. }
            | Self::Map { optional, .. }
            | Self::Pair { optional, .. }
            | Self::Struct { optional, .. } => *optional,
        }
    }

    /// Returns the type with the given optional flag.
    pub fn with_optional(mut self, value: bool) -> Self {
        match &mut self {
            Self::Any { optional }
            | Self::Boolean { optional }
            | Self::Int { optional }
            | Self::Float { optional }
            | Self::String { optional }
            | Self::File { optional }
            | Self::Directory { optional }
            | Self::Array { optional, .. }
            | Self::Map { optional, .. }
            | Self::Pair { optional, .. }
            | Self::Struct { optional, .. } => *optional = value,
        }

        self
    }

    /// Returns the required (non-optional) form of the type.
    pub fn require(self) -> Self {
        self.with_optional(false)
    }

    /// Determines if the type is the `Any` bottom type.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any { .. })
    }

    /// Determines if the type is a coercion target of primitive `String`
    /// conversion (i.e. a primitive WDL type).
    fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Boolean { .. }
                | Self::Int { .. }
                | Self::Float { .. }
                | Self::String { .. }
                | Self::File { .. }
                | Self::Directory { .. }
        )
    }

    /// Determines if this type is coercible to the target type.
    ///
    /// When `check_quant` is false, optional/nonempty mismatches are
    /// ignored, but all other rules still apply.
    pub fn coerces(&self, target: &Type, check_quant: bool) -> bool {
        // An optional type cannot coerce into a required type
        if check_quant && self.is_optional() && !target.is_optional() && !target.is_any() {
            return false;
        }

        match (self, target) {
            (Self::Any { .. }, _) | (_, Self::Any { .. }) => true,

            (Self::Boolean { .. }, Self::Boolean { .. })
            | (Self::Int { .. }, Self::Int { .. })
            | (Self::Float { .. }, Self::Float { .. })
            | (Self::String { .. }, Self::String { .. })
            | (Self::File { .. }, Self::File { .. })
            | (Self::Directory { .. }, Self::Directory { .. }) => true,

            // Int -> Float
            (Self::Int { .. }, Self::Float { .. }) => true,

            // String -> File, String -> Directory
            (Self::String { .. }, Self::File { .. })
            | (Self::String { .. }, Self::Directory { .. }) => true,

            // Any primitive -> String, with prescribed formatting
            (src, Self::String { .. }) if src.is_primitive() => true,

            (
                Self::Array { item: s, nonempty: sn, .. },
                Self::Array { item: t, nonempty: tn, .. },
            ) => {
                if check_quant && *tn && !*sn {
                    return false;
                }

                s.coerces(t, check_quant)
            }

            (
                Self::Map { key: sk, value: sv, .. },
                Self::Map { key: tk, value: tv, .. },
            ) => sk.coerces(tk, check_quant) && sv.coerces(tv, check_quant),

            (
                Self::Pair { left: sl, right: sr, .. },
                Self::Pair { left: tl, right: tr, .. },
            ) => sl.coerces(tl, check_quant) && sr.coerces(tr, check_quant),

            // Map[String, V] -> struct/object, member-wise
            (Self::Map { key, value, .. }, Self::Struct { members, .. }) => {
                matches!(**key, Self::String { .. })
                    && members.values().all(|m| value.coerces(m, check_quant))
            }

            // struct -> Map[String, V]
            (Self::Struct { members, .. }, Self::Map { key, value, .. }) => {
                matches!(**key, Self::String { .. })
                    && members.values().all(|m| m.coerces(value, check_quant))
            }

            (
                Self::Struct { name: sn, members: sm, .. },
                Self::Struct { name: tn, members: tm, .. },
            ) => {
                // Identical named structs coerce; anything coerces to an
                // anonymous struct (object); an anonymous struct coerces to
                // a named struct member-wise.
                if tn.is_empty() {
                    return true;
                }

                if sn == tn {
                    return true;
                }

                if !sn.is_empty() {
                    return false;
                }

                tm.iter().all(|(name, ty)| match sm.get(name) {
                    Some(src) => src.coerces(ty, check_quant),
                    None => ty.is_optional(),
                }) && sm.keys().all(|name| tm.contains_key(name))
            }

            _ => false,
        }
    }

    /// Computes the least type that every given type coerces to.
    ///
    /// Returns `None` when no such type exists.
    pub fn unify<'a>(types: impl IntoIterator<Item = &'a Type>, check_quant: bool) -> Option<Type> {
        let types: Vec<&Type> = types.into_iter().collect();
        if types.is_empty() {
            return Some(Type::any());
        }

        let optional = types.iter().any(|t| t.is_optional());

        // Candidates are the input types themselves (optionalized when any
        // input is optional), plus Float to absorb Int/Float mixes.
        let mut candidates: Vec<Type> = types
            .iter()
            .map(|t| (*t).clone().with_optional(optional))
            .collect();
        candidates.push(Type::Float { optional });

        // Among the candidates every input coerces to, prefer the one with
        // the fewest `Any` holes so that e.g. `Array[Int]` wins over the
        // empty-literal type `Array[Any]`.
        candidates
            .into_iter()
            .enumerate()
            .filter(|(_, candidate)| {
                if candidate.is_any() && !types.iter().all(|t| t.is_any()) {
                    return false;
                }

                types.iter().all(|t| t.coerces(candidate, check_quant))
            })
            .min_by_key(|(i, candidate)| (candidate.any_count(), *i))
            .map(|(_, candidate)| candidate)
    }

    /// Counts the `Any` nodes within the type.
    fn any_count(&self) -> usize {
        match self {
            Self::Any { .. } => 1,
            Self::Array { item, .. } => item.any_count(),
            Self::Map { key, value, .. } => key.any_count() + value.any_count(),
            Self::Pair { left, right, .. } => left.any_count() + right.any_count(),
            Self::Struct { members, .. } => members.values().map(Type::any_count).sum(),
            _ => 0,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any { .. } => write!(f, "Any")?,
            Self::Boolean { .. } => write!(f, "Boolean")?,
            Self::Int { .. } => write!(f, "Int")?,
            Self::Float { .. } => write!(f, "Float")?,
            Self::String { .. } => write!(f, "String")?,
            Self::File { .. } => write!(f, "File")?,
            Self::Directory { .. } => write!(f, "Directory")?,
            Self::Array { item, nonempty, .. } => {
                write!(f, "Array[{item}]")?;
                if *nonempty {
                    write!(f, "+")?;
                }
            }
            Self::Map { key, value, .. } => write!(f, "Map[{key},{value}]")?,
            Self::Pair { left, right, .. } => write!(f, "Pair[{left},{right}]")?,
            Self::Struct { name, .. } => {
                if name.is_empty() {
                    write!(f, "Object")?;
                } else {
                    write!(f, "{name}")?;
                }
            }
        }

        if self.is_optional() {
            write!(f, "?")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn display() {
        assert_eq!(Type::int().to_string(), "Int");
        assert_eq!(Type::int().with_optional(true).to_string(), "Int?");
        assert_eq!(
            Type::nonempty_array(Type::file()).to_string(),
            "Array[File]+"
        );
        assert_eq!(
            Type::map(Type::string(), Type::int()).to_string(),
            "Map[String,Int]"
        );
        assert_eq!(
            Type::array(Type::int()).with_optional(true).to_string(),
            "Array[Int]?"
        );
    }

    #[test]
    fn primitive_coercion() {
        assert!(Type::int().coerces(&Type::float(), true));
        assert!(!Type::float().coerces(&Type::int(), true));
        assert!(Type::int().coerces(&Type::string(), true));
        assert!(Type::float().coerces(&Type::string(), true));
        assert!(Type::boolean().coerces(&Type::string(), true));
        assert!(Type::file().coerces(&Type::string(), true));
        assert!(Type::string().coerces(&Type::file(), true));
        assert!(Type::string().coerces(&Type::directory(), true));
        assert!(!Type::boolean().coerces(&Type::int(), true));
    }

    #[test]
    fn optional_coercion() {
        // T -> T?
        assert!(Type::int().coerces(&Type::int().with_optional(true), true));
        // T? -> T fails under strict quantifier checking
        assert!(!Type::int().with_optional(true).coerces(&Type::int(), true));
        // ... but is permitted when relaxed
        assert!(Type::int().with_optional(true).coerces(&Type::int(), false));
        // None -> T?
        assert!(Type::none().coerces(&Type::file().with_optional(true), true));
        // None -> T fails
        assert!(!Type::none().coerces(&Type::file(), true));
    }

    #[test]
    fn array_coercion() {
        assert!(Type::array(Type::int()).coerces(&Type::array(Type::float()), true));
        assert!(Type::nonempty_array(Type::int()).coerces(&Type::array(Type::int()), true));
        // Array[T] -> Array[T]+ requires the relaxation
        assert!(!Type::array(Type::int()).coerces(&Type::nonempty_array(Type::int()), true));
        assert!(Type::array(Type::int()).coerces(&Type::nonempty_array(Type::int()), false));
        // Empty array literals are Array[Any]
        assert!(Type::array(Type::any()).coerces(&Type::array(Type::file()), true));
    }

    #[test]
    fn struct_coercion() {
        let members: StructMembers = Arc::new(IndexMap::from_iter([
            ("name".to_string(), Type::string()),
            ("count".to_string(), Type::int()),
        ]));
        let sample = Type::struct_instance("Sample", members.clone());

        assert!(sample.coerces(&sample, true));
        assert!(sample.coerces(&Type::object(IndexMap::new()), true));
        assert!(
            Type::object(IndexMap::from_iter([
                ("name".to_string(), Type::string()),
                ("count".to_string(), Type::int()),
            ]))
            .coerces(&sample, true)
        );
        // A missing non-optional member prevents the coercion
        assert!(
            !Type::object(IndexMap::from_iter([("name".to_string(), Type::string())]))
                .coerces(&sample, true)
        );
        // Map[String, X] -> struct when X fits all members
        assert!(!Type::map(Type::string(), Type::string()).coerces(&sample, true));
        assert!(Type::map(Type::string(), Type::string()).coerces(
            &Type::struct_instance(
                "Names",
                Arc::new(IndexMap::from_iter([("a".to_string(), Type::string())]))
            ),
            true
        ));
    }

    #[test]
    fn unification() {
        assert_eq!(
            Type::unify([&Type::int(), &Type::float()], true),
            Some(Type::float())
        );
        assert_eq!(
            Type::unify([&Type::int(), &Type::int()], true),
            Some(Type::int())
        );
        assert_eq!(
            Type::unify([&Type::int(), &Type::none()], true),
            Some(Type::int().with_optional(true))
        );
        assert_eq!(
            Type::unify([&Type::array(Type::any()), &Type::array(Type::int())], true),
            Some(Type::array(Type::int()))
        );
        assert_eq!(Type::unify([&Type::int(), &Type::boolean()], true), None);
        assert_eq!(Type::unify(std::iter::empty(), true), Some(Type::any()));
    }
}
