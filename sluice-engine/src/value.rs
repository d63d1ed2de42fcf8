//! Runtime values and the JSON bridge.
//!
//! Values are tagged variants paralleling the type lattice; compound values
//! hold their contents behind [`Arc`]s so cloning is cheap and scatter
//! iterations share structure. A `File` value is a string path; the engine
//! never holds file contents in memory.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde_json::Value as JsonValue;
use sluice_analysis::types::Type;

/// Represents a WDL runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The null value.
    Null,
    /// A `Boolean` value.
    Boolean(bool),
    /// An `Int` value.
    Int(i64),
    /// A `Float` value.
    Float(OrderedFloat<f64>),
    /// A `String` value.
    String(Arc<str>),
    /// A `File` value (a string path).
    File(Arc<str>),
    /// A `Directory` value (a string path).
    Directory(Arc<str>),
    /// An `Array` value.
    Array(Array),
    /// A `Pair` value.
    Pair(Pair),
    /// A `Map` value.
    Map(Map),
    /// A struct or object value.
    Struct(StructValue),
}

/// Represents an `Array` value.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    /// The item type of the array.
    item_ty: Type,
    /// The values of the array.
    values: Arc<Vec<Value>>,
}

impl Array {
    /// Creates a new array value with the given item type.
    pub fn new(item_ty: Type, values: Vec<Value>) -> Self {
        Self {
            item_ty,
            values: Arc::new(values),
        }
    }

    /// Gets the item type of the array.
    pub fn item_ty(&self) -> &Type {
        &self.item_ty
    }

    /// Gets the values of the array.
    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    /// Gets the number of items in the array.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Determines if the array is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Represents a `Pair` value.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    /// The left and right values.
    inner: Arc<(Value, Value)>,
}

impl Pair {
    /// Creates a new pair value.
    pub fn new(left: Value, right: Value) -> Self {
        Self {
            inner: Arc::new((left, right)),
        }
    }

    /// Gets the left value.
    pub fn left(&self) -> &Value {
        &self.inner.0
    }

    /// Gets the right value.
    pub fn right(&self) -> &Value {
        &self.inner.1
    }
}

/// Represents a `Map` value.
///
/// Entries preserve insertion order; keys are unique by value equality.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    /// The key type of the map.
    key_ty: Type,
    /// The value type of the map.
    value_ty: Type,
    /// The entries of the map.
    entries: Arc<Vec<(Value, Value)>>,
}

impl Map {
    /// Creates a new map value with the given key and value types.
    pub fn new(key_ty: Type, value_ty: Type, entries: Vec<(Value, Value)>) -> Self {
        Self {
            key_ty,
            value_ty,
            entries: Arc::new(entries),
        }
    }

    /// Gets the key type of the map.
    pub fn key_ty(&self) -> &Type {
        &self.key_ty
    }

    /// Gets the value type of the map.
    pub fn value_ty(&self) -> &Type {
        &self.value_ty
    }

    /// Gets the entries of the map.
    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    /// Looks up a key by value equality.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Represents a struct or object value.
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    /// The type of the value (a named or anonymous struct).
    ty: Type,
    /// The members of the value.
    members: Arc<IndexMap<String, Value>>,
}

impl StructValue {
    /// Creates a new struct value.
    pub fn new(ty: Type, members: IndexMap<String, Value>) -> Self {
        Self {
            ty,
            members: Arc::new(members),
        }
    }

    /// Gets the type of the value.
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// Gets a member by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.members.get(name)
    }

    /// Iterates the members of the value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.members.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// An error produced by a runtime coercion.
#[derive(Debug)]
pub enum CoercionError {
    /// A null value reached a non-optional target.
    NullValue,
    /// The value's type cannot coerce to the target.
    Mismatch {
        /// The source type.
        from: Type,
        /// The target type.
        to: Type,
    },
    /// The coercion failed for a value-specific reason.
    Message(String),
}

impl fmt::Display for CoercionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullValue => write!(f, "null value used where a value is required"),
            Self::Mismatch { from, to } => {
                write!(f, "cannot coerce a value of type `{from}` to `{to}`")
            }
            Self::Message(message) => write!(f, "{message}"),
        }
    }
}

impl Value {
    /// Creates a `String` value.
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Arc::from(s.as_ref()))
    }

    /// Creates a `File` value.
    pub fn file(s: impl AsRef<str>) -> Self {
        Self::File(Arc::from(s.as_ref()))
    }

    /// Creates a `Directory` value.
    pub fn directory(s: impl AsRef<str>) -> Self {
        Self::Directory(Arc::from(s.as_ref()))
    }

    /// Creates a `Float` value.
    pub fn float(v: f64) -> Self {
        Self::Float(OrderedFloat(v))
    }

    /// Gets the type of the value.
    pub fn ty(&self) -> Type {
        match self {
            Self::Null => Type::none(),
            Self::Boolean(_) => Type::boolean(),
            Self::Int(_) => Type::int(),
            Self::Float(_) => Type::float(),
            Self::String(_) => Type::string(),
            Self::File(_) => Type::file(),
            Self::Directory(_) => Type::directory(),
            Self::Array(v) => Type::array(v.item_ty.clone()),
            Self::Pair(v) => Type::pair(v.left().ty(), v.right().ty()),
            Self::Map(v) => Type::map(v.key_ty.clone(), v.value_ty.clone()),
            Self::Struct(v) => v.ty.clone(),
        }
    }

    /// Determines if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Gets the value as a `Boolean`.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Unwraps the value into a `Boolean`.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a `Boolean`.
    pub fn unwrap_boolean(&self) -> bool {
        self.as_boolean().expect("value is not a boolean")
    }

    /// Gets the value as an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Unwraps the value into an `Int`.
    ///
    /// # Panics
    ///
    /// Panics if the value is not an `Int`.
    pub fn unwrap_int(&self) -> i64 {
        self.as_int().expect("value is not an integer")
    }

    /// Gets the value as a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(v.0),
            _ => None,
        }
    }

    /// Unwraps the value into a `Float`.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a `Float`.
    pub fn unwrap_float(&self) -> f64 {
        self.as_float().expect("value is not a float")
    }

    /// Gets the string form of a `String`, `File`, or `Directory` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::File(s) | Self::Directory(s) => Some(s),
            _ => None,
        }
    }

    /// Unwraps the string form of a `String`, `File`, or `Directory` value.
    ///
    /// # Panics
    ///
    /// Panics if the value has no string form.
    pub fn unwrap_str(&self) -> &str {
        self.as_str().expect("value has no string form")
    }

    /// Gets the value as an `Array`.
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Unwraps the value into an `Array`.
    ///
    /// # Panics
    ///
    /// Panics if the value is not an `Array`.
    pub fn unwrap_array(&self) -> &Array {
        self.as_array().expect("value is not an array")
    }

    /// Gets the value as a `Pair`.
    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Self::Pair(v) => Some(v),
            _ => None,
        }
    }

    /// Gets the value as a `Map`.
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Gets the value as a struct/object.
    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Self::Struct(v) => Some(v),
            _ => None,
        }
    }

    /// Coerces the value to the given type.
    pub fn coerce(&self, target: &Type) -> Result<Value, CoercionError> {
        if target.is_any() {
            return Ok(self.clone());
        }

        if self.is_null() {
            if target.is_optional() {
                return Ok(Value::Null);
            }

            return Err(CoercionError::NullValue);
        }

        let mismatch = || CoercionError::Mismatch {
            from: self.ty(),
            to: target.clone(),
        };

        match (self, target) {
            (Self::Boolean(_), Type::Boolean { .. })
            | (Self::Int(_), Type::Int { .. })
            | (Self::Float(_), Type::Float { .. })
            | (Self::String(_), Type::String { .. })
            | (Self::File(_), Type::File { .. })
            | (Self::Directory(_), Type::Directory { .. }) => Ok(self.clone()),

            (Self::Int(v), Type::Float { .. }) => Ok(Value::float(*v as f64)),

            (Self::String(s), Type::File { .. }) => Ok(Value::File(s.clone())),
            (Self::String(s), Type::Directory { .. }) => Ok(Value::Directory(s.clone())),

            (_, Type::String { .. }) => match self.as_display_string() {
                Some(s) => Ok(Value::string(s)),
                None => Err(mismatch()),
            },

            (Self::Array(array), Type::Array { item, nonempty, .. }) => {
                if *nonempty && array.is_empty() {
                    return Err(CoercionError::Message(
                        "cannot coerce an empty array to a nonempty array type".to_string(),
                    ));
                }

                let values: Result<Vec<Value>, CoercionError> =
                    array.as_slice().iter().map(|v| v.coerce(item)).collect();
                Ok(Value::Array(Array::new((**item).clone(), values?)))
            }

            (Self::Pair(pair), Type::Pair { left, right, .. }) => Ok(Value::Pair(Pair::new(
                pair.left().coerce(left)?,
                pair.right().coerce(right)?,
            ))),

            (Self::Map(map), Type::Map { key, value, .. }) => {
                let entries: Result<Vec<(Value, Value)>, CoercionError> = map
                    .entries()
                    .iter()
                    .map(|(k, v)| Ok((k.coerce(key)?, v.coerce(value)?)))
                    .collect();
                Ok(Value::Map(Map::new(
                    (**key).clone(),
                    (**value).clone(),
                    entries?,
                )))
            }

            (Self::Map(map), Type::Struct { members, .. }) => {
                let mut result = IndexMap::new();
                for (k, v) in map.entries() {
                    let name = k.as_str().ok_or_else(|| mismatch())?;
                    let member_ty = members.get(name).ok_or_else(|| {
                        CoercionError::Message(format!(
                            "map key `{name}` is not a member of `{target}`"
                        ))
                    })?;
                    result.insert(name.to_string(), v.coerce(member_ty)?);
                }

                complete_struct(target, members, result)
            }

            (Self::Struct(value), Type::Map { key, value: value_ty, .. }) => {
                if !matches!(**key, Type::String { .. }) {
                    return Err(mismatch());
                }

                let entries: Result<Vec<(Value, Value)>, CoercionError> = value
                    .iter()
                    .map(|(k, v)| Ok((Value::string(k), v.coerce(value_ty)?)))
                    .collect();
                Ok(Value::Map(Map::new(
                    Type::string(),
                    (**value_ty).clone(),
                    entries?,
                )))
            }

            (Self::Struct(value), Type::Struct { name, members, .. }) => {
                if name.is_empty() {
                    return Ok(self.clone());
                }

                let mut result = IndexMap::new();
                for (member_name, v) in value.iter() {
                    let member_ty = members.get(member_name).ok_or_else(|| {
                        CoercionError::Message(format!(
                            "`{member_name}` is not a member of `{target}`"
                        ))
                    })?;
                    result.insert(member_name.to_string(), v.coerce(member_ty)?);
                }

                complete_struct(target, members, result)
            }

            _ => Err(mismatch()),
        }
    }

    /// Gets the prescribed string form of a primitive value.
    ///
    /// Floats use six fraction digits; booleans are lowercase; files and
    /// directories are their paths.
    pub fn as_display_string(&self) -> Option<String> {
        match self {
            Self::Boolean(v) => Some(if *v { "true".to_string() } else { "false".to_string() }),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) => Some(format!("{v:.6}", v = v.0)),
            Self::String(s) | Self::File(s) | Self::Directory(s) => Some(s.to_string()),
            _ => None,
        }
    }

    /// Converts the value to its JSON encoding.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Boolean(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(v.0)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::String(s) | Self::File(s) | Self::Directory(s) => {
                JsonValue::String(s.to_string())
            }
            Self::Array(array) => {
                JsonValue::Array(array.as_slice().iter().map(Value::to_json).collect())
            }
            Self::Pair(pair) => serde_json::json!({
                "left": pair.left().to_json(),
                "right": pair.right().to_json(),
            }),
            Self::Map(map) => {
                if matches!(map.key_ty(), Type::String { .. }) {
                    let mut object = serde_json::Map::new();
                    for (k, v) in map.entries() {
                        let key = k.as_str().map(str::to_string).unwrap_or_default();
                        object.insert(key, v.to_json());
                    }

                    JsonValue::Object(object)
                } else {
                    JsonValue::Array(
                        map.entries()
                            .iter()
                            .map(|(k, v)| {
                                serde_json::json!({ "left": k.to_json(), "right": v.to_json() })
                            })
                            .collect(),
                    )
                }
            }
            Self::Struct(value) => {
                let mut object = serde_json::Map::new();
                for (k, v) in value.iter() {
                    object.insert(k.to_string(), v.to_json());
                }

                JsonValue::Object(object)
            }
        }
    }

    /// Constructs a value of the given type from its JSON encoding.
    ///
    /// The shape is validated strictly: mismatches are errors rather than
    /// best-effort conversions.
    pub fn from_json(ty: &Type, json: &JsonValue) -> Result<Value, String> {
        /// Formats a shape-mismatch error.
        fn mismatch(ty: &Type, json: &JsonValue) -> String {
            format!("JSON value `{json}` does not have the shape of WDL type `{ty}`")
        }

        if json.is_null() {
            if ty.is_optional() || ty.is_any() {
                return Ok(Value::Null);
            }

            return Err(mismatch(ty, json));
        }

        match ty {
            Type::Any { .. } => Ok(Self::from_json_untyped(json)),
            Type::Boolean { .. } => json
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| mismatch(ty, json)),
            Type::Int { .. } => json
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| mismatch(ty, json)),
            Type::Float { .. } => json
                .as_f64()
                .map(Value::float)
                .ok_or_else(|| mismatch(ty, json)),
            Type::String { .. } => json
                .as_str()
                .map(Value::string)
                .ok_or_else(|| mismatch(ty, json)),
            Type::File { .. } => json
                .as_str()
                .map(Value::file)
                .ok_or_else(|| mismatch(ty, json)),
            Type::Directory { .. } => json
                .as_str()
                .map(Value::directory)
                .ok_or_else(|| mismatch(ty, json)),
            Type::Array { item, nonempty, .. } => {
                let items = json.as_array().ok_or_else(|| mismatch(ty, json))?;
                if *nonempty && items.is_empty() {
                    return Err(mismatch(ty, json));
                }

                let values: Result<Vec<Value>, String> =
                    items.iter().map(|j| Self::from_json(item, j)).collect();
                Ok(Value::Array(Array::new((**item).clone(), values?)))
            }
            Type::Pair { left, right, .. } => {
                let object = json.as_object().ok_or_else(|| mismatch(ty, json))?;
                if object.len() != 2 {
                    return Err(mismatch(ty, json));
                }

                let l = object.get("left").ok_or_else(|| mismatch(ty, json))?;
                let r = object.get("right").ok_or_else(|| mismatch(ty, json))?;
                Ok(Value::Pair(Pair::new(
                    Self::from_json(left, l)?,
                    Self::from_json(right, r)?,
                )))
            }
            Type::Map { key, value, .. } => {
                if let Some(object) = json.as_object() {
                    if !matches!(**key, Type::String { .. }) {
                        return Err(mismatch(ty, json));
                    }

                    let entries: Result<Vec<(Value, Value)>, String> = object
                        .iter()
                        .map(|(k, v)| Ok((Value::string(k), Self::from_json(value, v)?)))
                        .collect();
                    return Ok(Value::Map(Map::new(
                        (**key).clone(),
                        (**value).clone(),
                        entries?,
                    )));
                }

                let items = json.as_array().ok_or_else(|| mismatch(ty, json))?;
                let entries: Result<Vec<(Value, Value)>, String> = items
                    .iter()
                    .map(|item| {
                        let object = item.as_object().ok_or_else(|| mismatch(ty, json))?;
                        let l = object.get("left").ok_or_else(|| mismatch(ty, json))?;
                        let r = object.get("right").ok_or_else(|| mismatch(ty, json))?;
                        Ok((Self::from_json(key, l)?, Self::from_json(value, r)?))
                    })
                    .collect();
                Ok(Value::Map(Map::new(
                    (**key).clone(),
                    (**value).clone(),
                    entries?,
                )))
            }
            Type::Struct { members, .. } => {
                let object = json.as_object().ok_or_else(|| mismatch(ty, json))?;
                for key in object.keys() {
                    if !members.contains_key(key) {
                        return Err(format!("`{key}` is not a member of `{ty}`"));
                    }
                }

                let mut result = IndexMap::new();
                for (name, member_ty) in members.iter() {
                    match object.get(name) {
                        Some(j) => {
                            result.insert(name.clone(), Self::from_json(member_ty, j)?);
                        }
                        None if member_ty.is_optional() => {
                            result.insert(name.clone(), Value::Null);
                        }
                        None => return Err(format!("missing member `{name}` of `{ty}`")),
                    }
                }

                Ok(Value::Struct(StructValue::new(ty.clone(), result)))
            }
        }
    }

    /// Constructs a value from JSON without a declared type, inferring the
    /// natural WDL shape.
    pub fn from_json_untyped(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(v) => Value::Boolean(*v),
            JsonValue::Number(n) => match n.as_i64() {
                Some(v) => Value::Int(v),
                None => Value::float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::string(s),
            JsonValue::Array(items) => {
                let values: Vec<Value> = items.iter().map(Self::from_json_untyped).collect();
                let item_ty = Type::unify(values.iter().map(|v| v.ty()).collect::<Vec<_>>().iter(), false)
                    .unwrap_or_else(Type::any);
                Value::Array(Array::new(item_ty, values))
            }
            JsonValue::Object(object) => {
                let members: IndexMap<String, Value> = object
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json_untyped(v)))
                    .collect();
                let member_types = members.iter().map(|(k, v)| (k.clone(), v.ty())).collect();
                Value::Struct(StructValue::new(Type::object(member_types), members))
            }
        }
    }

    /// Rewrites every `File`/`Directory` path in the value through the
    /// given function.
    ///
    /// The function receives the path and whether it is a directory, and
    /// returns the replacement path (or `None` to keep the original).
    pub fn rewrite_paths(
        &self,
        f: &mut impl FnMut(&str, bool) -> Option<String>,
    ) -> Value {
        match self {
            Self::File(path) => match f(path, false) {
                Some(new) => Value::file(new),
                None => self.clone(),
            },
            Self::Directory(path) => match f(path, true) {
                Some(new) => Value::directory(new),
                None => self.clone(),
            },
            Self::Array(array) => Value::Array(Array::new(
                array.item_ty.clone(),
                array.as_slice().iter().map(|v| v.rewrite_paths(f)).collect(),
            )),
            Self::Pair(pair) => Value::Pair(Pair::new(
                pair.left().rewrite_paths(f),
                pair.right().rewrite_paths(f),
            )),
            Self::Map(map) => Value::Map(Map::new(
                map.key_ty.clone(),
                map.value_ty.clone(),
                map.entries()
                    .iter()
                    .map(|(k, v)| (k.rewrite_paths(f), v.rewrite_paths(f)))
                    .collect(),
            )),
            Self::Struct(value) => Value::Struct(StructValue::new(
                value.ty.clone(),
                value
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.rewrite_paths(f)))
                    .collect(),
            )),
            _ => self.clone(),
        }
    }

    /// Visits every `File`/`Directory` path in the value.
    pub fn visit_paths(&self, f: &mut impl FnMut(&str, bool)) {
        self.rewrite_paths(&mut |path, dir| {
            f(path, dir);
            None
        });
    }
}

/// Fills the missing members of a struct coercion result with nulls and
/// builds the final value.
fn complete_struct(
    target: &Type,
    members: &indexmap::IndexMap<String, Type>,
    mut partial: IndexMap<String, Value>,
) -> Result<Value, CoercionError> {
    let mut result = IndexMap::new();
    for (name, member_ty) in members {
        match partial.swap_remove(name) {
            Some(v) => {
                result.insert(name.clone(), v);
            }
            None if member_ty.is_optional() => {
                result.insert(name.clone(), Value::Null);
            }
            None => {
                return Err(CoercionError::Message(format!(
                    "missing member `{name}` of `{target}`"
                )));
            }
        }
    }

    Ok(Value::Struct(StructValue::new(target.clone().require(), result)))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "None"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:.6}", v = v.0),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::File(s) | Self::Directory(s) => write!(f, "\"{s}\""),
            Self::Array(array) => {
                write!(f, "[")?;
                for (i, v) in array.as_slice().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }

                    write!(f, "{v}")?;
                }

                write!(f, "]")
            }
            Self::Pair(pair) => write!(f, "({left}, {right})", left = pair.left(), right = pair.right()),
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.entries().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }

                    write!(f, "{k}: {v}")?;
                }

                write!(f, "}}")
            }
            Self::Struct(value) => {
                write!(f, "object {{")?;
                for (i, (k, v)) in value.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }

                    write!(f, "{k}: {v}")?;
                }

                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn display_strings() {
        assert_eq!(Value::float(3.14159).as_display_string().unwrap(), "3.141590");
        assert_eq!(Value::Boolean(true).as_display_string().unwrap(), "true");
        assert_eq!(Value::Int(42).as_display_string().unwrap(), "42");
    }

    #[test]
    fn primitive_coercion() {
        assert_eq!(
            Value::Int(3).coerce(&Type::float()).unwrap(),
            Value::float(3.0)
        );
        assert_eq!(
            Value::string("a/b.txt").coerce(&Type::file()).unwrap(),
            Value::file("a/b.txt")
        );
        assert_eq!(
            Value::float(1.5).coerce(&Type::string()).unwrap(),
            Value::string("1.500000")
        );
        assert!(matches!(
            Value::Null.coerce(&Type::int()),
            Err(CoercionError::NullValue)
        ));
        assert_eq!(
            Value::Null.coerce(&Type::int().with_optional(true)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn array_coercion() {
        let array = Value::Array(Array::new(
            Type::int(),
            vec![Value::Int(1), Value::Int(2)],
        ));
        let coerced = array.coerce(&Type::array(Type::float())).unwrap();
        assert_eq!(
            coerced.unwrap_array().as_slice(),
            &[Value::float(1.0), Value::float(2.0)]
        );

        let empty = Value::Array(Array::new(Type::int(), Vec::new()));
        assert!(empty.coerce(&Type::nonempty_array(Type::int())).is_err());
    }

    #[test]
    fn json_round_trip() {
        let ty = Type::map(Type::string(), Type::array(Type::int()));
        let value = Value::Map(Map::new(
            Type::string(),
            Type::array(Type::int()),
            vec![
                (
                    Value::string("a"),
                    Value::Array(Array::new(Type::int(), vec![Value::Int(1), Value::Int(2)])),
                ),
                (
                    Value::string("b"),
                    Value::Array(Array::new(Type::int(), Vec::new())),
                ),
            ],
        ));

        let json = value.to_json();
        let back = Value::from_json(&ty, &json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn pair_json() {
        let ty = Type::pair(Type::int(), Type::string());
        let value = Value::Pair(Pair::new(Value::Int(1), Value::string("x")));
        let json = value.to_json();
        assert_eq!(json, serde_json::json!({ "left": 1, "right": "x" }));
        assert_eq!(Value::from_json(&ty, &json).unwrap(), value);
    }

    #[test]
    fn strict_json_shapes() {
        assert!(Value::from_json(&Type::int(), &serde_json::json!("nope")).is_err());
        assert!(Value::from_json(&Type::boolean(), &serde_json::json!(1)).is_err());
        assert!(Value::from_json(&Type::int(), &serde_json::json!(null)).is_err());
        assert_eq!(
            Value::from_json(&Type::int().with_optional(true), &serde_json::json!(null)).unwrap(),
            Value::Null
        );
        // Int -> Float widening is permitted by the JSON bridge
        assert_eq!(
            Value::from_json(&Type::float(), &serde_json::json!(2)).unwrap(),
            Value::float(2.0)
        );
    }

    #[test]
    fn path_rewriting() {
        let value = Value::Array(Array::new(
            Type::file(),
            vec![Value::file("/a.txt"), Value::file("/b.txt")],
        ));
        let rewritten = value.rewrite_paths(&mut |path, _| Some(format!("/staged{path}")));
        assert_eq!(
            rewritten.unwrap_array().as_slice(),
            &[Value::file("/staged/a.txt"), Value::file("/staged/b.txt")]
        );

        let mut seen = Vec::new();
        value.visit_paths(&mut |path, _| seen.push(path.to_string()));
        assert_eq!(seen, ["/a.txt", "/b.txt"]);
    }
}
