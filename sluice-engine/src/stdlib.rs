//! Implementations of the WDL standard library.
//!
//! The registry maps function names to implementation callbacks; static
//! dispatch and typing live in the analysis crate, so implementations may
//! assume their arguments already passed the signature check and merely
//! coerce them into position.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use sluice_analysis::types::Type;
use sluice_syntax::SourcePosition;

use crate::error::RunError;
use crate::error::RunResult;
use crate::eval::EvaluationContext;
use crate::value::Array;
use crate::value::CoercionError;
use crate::value::Value;

mod arrays;
mod files;
mod io;
mod math;
mod strings;

/// The context of a standard library function call.
pub struct CallContext<'a> {
    /// The name of the function being called.
    pub name: &'a str,
    /// The evaluated arguments and their positions.
    pub args: &'a [(Value, &'a SourcePosition)],
    /// The position of the call site.
    pub pos: &'a SourcePosition,
    /// The evaluation context.
    pub context: &'a dyn EvaluationContext,
}

impl CallContext<'_> {
    /// Gets an argument value.
    pub fn arg(&self, index: usize) -> &Value {
        &self.args[index].0
    }

    /// Gets an argument's position.
    pub fn arg_pos(&self, index: usize) -> &SourcePosition {
        self.args[index].1
    }

    /// Coerces an argument to the given type.
    pub fn coerce_arg(&self, index: usize, target: &Type) -> RunResult<Value> {
        self.arg(index).coerce(target).map_err(|e| match e {
            CoercionError::NullValue => RunError::NullValue {
                pos: self.arg_pos(index).clone(),
            },
            other => self.error(other),
        })
    }

    /// Coerces an argument to a `String` and returns its text.
    pub fn string_arg(&self, index: usize) -> RunResult<String> {
        Ok(self
            .coerce_arg(index, &Type::string())?
            .unwrap_str()
            .to_string())
    }

    /// Coerces an argument to an `Int`.
    pub fn int_arg(&self, index: usize) -> RunResult<i64> {
        Ok(self.coerce_arg(index, &Type::int())?.unwrap_int())
    }

    /// Coerces an argument to a `Float`.
    pub fn float_arg(&self, index: usize) -> RunResult<f64> {
        Ok(self.coerce_arg(index, &Type::float())?.unwrap_float())
    }

    /// Coerces an argument to a `File` and resolves it against the current
    /// working directory.
    pub fn path_arg(&self, index: usize) -> RunResult<PathBuf> {
        let value = self.coerce_arg(index, &Type::file())?;
        Ok(resolve_path(self.context, value.unwrap_str()))
    }

    /// Requires an argument to be an array.
    pub fn array_arg(&self, index: usize) -> RunResult<&Array> {
        self.arg(index)
            .as_array()
            .ok_or_else(|| self.error("expected an array argument"))
    }

    /// Creates a "call to function failed" error at the call site.
    pub fn error(&self, message: impl std::fmt::Display) -> RunError {
        RunError::eval(
            format!(
                "call to function `{name}` failed: {message}",
                name = self.name
            ),
            self.pos,
        )
    }
}

/// Resolves a possibly-relative path against the context's working
/// directory.
pub(crate) fn resolve_path(context: &dyn EvaluationContext, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        context.work_dir().join(p)
    }
}

/// A standard library function implementation.
type Callback = fn(&CallContext<'_>) -> RunResult<Value>;

/// The function implementation registry.
static STDLIB: LazyLock<HashMap<&'static str, Callback>> = LazyLock::new(|| {
    HashMap::from_iter([
        ("floor", math::floor as Callback),
        ("ceil", math::ceil),
        ("round", math::round),
        ("min", math::min),
        ("max", math::max),
        ("range", math::range),
        ("sub", strings::sub),
        ("basename", strings::basename),
        ("sep", strings::sep),
        ("prefix", strings::prefix),
        ("suffix", strings::suffix),
        ("quote", strings::quote),
        ("squote", strings::squote),
        ("length", arrays::length),
        ("flatten", arrays::flatten),
        ("select_first", arrays::select_first),
        ("select_all", arrays::select_all),
        ("defined", arrays::defined),
        ("zip", arrays::zip),
        ("cross", arrays::cross),
        ("unzip", arrays::unzip),
        ("transpose", arrays::transpose),
        ("keys", arrays::keys),
        ("as_map", arrays::as_map),
        ("as_pairs", arrays::as_pairs),
        ("size", files::size),
        ("glob", files::glob),
        ("stdout", files::stdout),
        ("stderr", files::stderr),
        ("read_string", io::read_string),
        ("read_int", io::read_int),
        ("read_float", io::read_float),
        ("read_boolean", io::read_boolean),
        ("read_lines", io::read_lines),
        ("read_tsv", io::read_tsv),
        ("read_map", io::read_map),
        ("read_json", io::read_json),
        ("write_lines", io::write_lines),
        ("write_tsv", io::write_tsv),
        ("write_map", io::write_map),
        ("write_json", io::write_json),
    ])
});

/// Calls a standard library function by name.
pub fn call(name: &str, context: &CallContext<'_>) -> RunResult<Value> {
    match STDLIB.get(name) {
        Some(callback) => callback(context),
        None => Err(RunError::eval(
            format!("no such function `{name}`"),
            context.pos,
        )),
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use sluice_analysis::types::StructMembers;
    use sluice_syntax::WdlVersion;
    use tempfile::TempDir;

    use super::*;
    use crate::value::Array;
    use crate::value::Pair;

    /// A minimal evaluation context rooted at a temp directory.
    struct TestContext {
        /// The working directory.
        work: TempDir,
        /// The temp directory for `write_*` outputs.
        temp: TempDir,
    }

    impl TestContext {
        /// Creates a fresh context.
        fn new() -> Self {
            Self {
                work: TempDir::new().expect("should create work dir"),
                temp: TempDir::new().expect("should create temp dir"),
            }
        }

        /// Writes a file into the working directory.
        fn write(&self, name: &str, contents: &str) -> String {
            let path = self.work.path().join(name);
            fs::write(&path, contents).expect("should write file");
            path.to_string_lossy().to_string()
        }
    }

    impl EvaluationContext for TestContext {
        fn version(&self) -> WdlVersion {
            WdlVersion::OneOne
        }

        fn resolve_name(&self, _name: &str) -> Option<Value> {
            None
        }

        fn has_namespace(&self, _name: &str) -> bool {
            false
        }

        fn struct_members(&self, _name: &str) -> Option<StructMembers> {
            None
        }

        fn work_dir(&self) -> &Path {
            self.work.path()
        }

        fn temp_dir(&self) -> &Path {
            self.temp.path()
        }
    }

    /// Calls a stdlib function with the given arguments.
    fn call_fn(context: &TestContext, name: &str, args: &[Value]) -> RunResult<Value> {
        let pos = SourcePosition::unknown();
        let args: Vec<(Value, &SourcePosition)> =
            args.iter().map(|v| (v.clone(), &pos)).collect();
        call(
            name,
            &CallContext {
                name,
                args: &args,
                pos: &pos,
                context,
            },
        )
    }

    #[test]
    fn range_rejects_negative_counts() {
        let context = TestContext::new();
        let value = call_fn(&context, "range", &[Value::Int(3)]).unwrap();
        assert_eq!(
            value.unwrap_array().as_slice(),
            &[Value::Int(0), Value::Int(1), Value::Int(2)]
        );

        let error = call_fn(&context, "range", &[Value::Int(-1)]).unwrap_err();
        assert_eq!(error.kind(), "EvalError");
    }

    #[test]
    fn select_first_requires_a_defined_value() {
        let context = TestContext::new();
        let array = Value::Array(Array::new(
            Type::int().with_optional(true),
            vec![Value::Null, Value::Int(5)],
        ));
        assert_eq!(
            call_fn(&context, "select_first", &[array]).unwrap(),
            Value::Int(5)
        );

        let empty = Value::Array(Array::new(Type::int().with_optional(true), vec![Value::Null]));
        let error = call_fn(&context, "select_first", &[empty]).unwrap_err();
        assert!(error.to_string().contains("no defined value"));
    }

    #[test]
    fn read_map_is_strict() {
        let context = TestContext::new();

        let good = context.write("good.tsv", "a\t1\nb\t2\n");
        let value = call_fn(&context, "read_map", &[Value::file(&good)]).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.entries().len(), 2);
        assert_eq!(map.get(&Value::string("b")), Some(&Value::string("2")));

        let extra = context.write("extra.tsv", "a\t1\textra\n");
        let error = call_fn(&context, "read_map", &[Value::file(&extra)]).unwrap_err();
        assert!(error.to_string().contains("more than 2 columns"));

        let narrow = context.write("narrow.tsv", "lonely\n");
        let error = call_fn(&context, "read_map", &[Value::file(&narrow)]).unwrap_err();
        assert!(error.to_string().contains("fewer than 2 columns"));

        let dup = context.write("dup.tsv", "a\t1\na\t2\n");
        let error = call_fn(&context, "read_map", &[Value::file(&dup)]).unwrap_err();
        assert!(error.to_string().contains("duplicate key"));
    }

    #[test]
    fn size_counts_defined_entries_only() {
        let context = TestContext::new();
        let ten = context.write("ten.bin", "0123456789");
        let twenty = context.write("twenty.bin", "01234567890123456789");

        // A null file has size zero
        let value = call_fn(&context, "size", &[Value::Null]).unwrap();
        assert_relative_eq!(value.unwrap_float(), 0.0);

        // Nulls inside an array are skipped
        let array = Value::Array(Array::new(
            Type::file().with_optional(true),
            vec![Value::file(&ten), Value::Null, Value::file(&twenty)],
        ));
        let value = call_fn(&context, "size", &[array.clone()]).unwrap();
        assert_relative_eq!(value.unwrap_float(), 30.0);

        // Unit conversion
        let value =
            call_fn(&context, "size", &[array, Value::string("KB")]).unwrap();
        assert_relative_eq!(value.unwrap_float(), 0.03);

        // Unknown units are an error
        let error =
            call_fn(&context, "size", &[Value::file(&ten), Value::string("parsecs")])
                .unwrap_err();
        assert!(error.to_string().contains("invalid storage unit"));

        // A value that was never file-shaped fails rather than sizing as 0
        let error = call_fn(&context, "size", &[Value::Int(3)]).unwrap_err();
        assert_eq!(error.kind(), "EvalError");
        assert!(
            error
                .to_string()
                .contains("cannot compute the size of a value of type `Int`")
        );
    }

    #[test]
    fn glob_is_confined_to_the_work_dir() {
        let context = TestContext::new();
        context.write("a.txt", "1");
        context.write("b.txt", "2");
        context.write("c.dat", "3");

        let value = call_fn(&context, "glob", &[Value::string("*.txt")]).unwrap();
        let names: Vec<String> = value
            .unwrap_array()
            .as_slice()
            .iter()
            .map(|v| {
                Path::new(v.unwrap_str())
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        assert_eq!(names, ["a.txt", "b.txt"]);

        let error = call_fn(&context, "glob", &[Value::string("../*")]).unwrap_err();
        assert!(error.to_string().contains("escapes the task working directory"));

        let error = call_fn(&context, "glob", &[Value::string("/etc/*")]).unwrap_err();
        assert!(error.to_string().contains("escapes the task working directory"));
    }

    #[test]
    fn zip_and_cross_products() {
        let context = TestContext::new();
        let left = Value::Array(Array::new(
            Type::int(),
            vec![Value::Int(1), Value::Int(2)],
        ));
        let right = Value::Array(Array::new(
            Type::string(),
            vec![Value::string("a"), Value::string("b")],
        ));

        let zipped = call_fn(&context, "zip", &[left.clone(), right.clone()]).unwrap();
        assert_eq!(
            zipped.unwrap_array().as_slice()[0],
            Value::Pair(Pair::new(Value::Int(1), Value::string("a")))
        );

        let crossed = call_fn(&context, "cross", &[left.clone(), right]).unwrap();
        assert_eq!(crossed.unwrap_array().len(), 4);

        let short = Value::Array(Array::new(Type::string(), vec![Value::string("x")]));
        let error = call_fn(&context, "zip", &[left, short]).unwrap_err();
        assert!(error.to_string().contains("mismatched lengths"));
    }

    #[test]
    fn write_then_read_round_trip() {
        let context = TestContext::new();
        let lines = Value::Array(Array::new(
            Type::string(),
            vec![Value::string("first"), Value::string("second")],
        ));

        let file = call_fn(&context, "write_lines", &[lines]).unwrap();
        let back = call_fn(&context, "read_lines", &[file]).unwrap();
        assert_eq!(
            back.unwrap_array().as_slice(),
            &[Value::string("first"), Value::string("second")]
        );
    }
}
