//! Command-line argument coercion and overload scoring.
//!
//! Raw argument strings are coerced to typed values by shape (integer, long,
//! double, boolean, else text). When arguments are present, the loader
//! scores each overload of a function name against them type-by-type and
//! binds the highest-scoring one as the canonical overload; ties go to the
//! earliest declaration.

use crate::{ir::TypeRef, value::Value};

/// Coerces a raw argument: integer-parse -> `Int`, long-parse -> `Long`,
/// double-parse -> `Double`, `"true"`/`"false"` (case-insensitive) ->
/// `Bool`, otherwise `Text`.
pub(crate) fn coerce_argument(raw: &str) -> Value {
    if let Ok(value) = raw.parse::<i32>() {
        return Value::Int(value);
    }
    if let Ok(value) = raw.parse::<i64>() {
        return Value::Long(value);
    }
    if let Ok(value) = raw.parse::<f64>() {
        return Value::Double(value);
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::Text(raw.into())
}

/// Scores an overload's parameter list against the raw arguments.
///
/// Overloads whose parameter count does not match the argument count can
/// never bind and score `i32::MIN`.
pub(crate) fn score_overload(args: &[String], param_types: &[&TypeRef]) -> i32 {
    if args.len() != param_types.len() {
        return i32::MIN;
    }
    args.iter()
        .zip(param_types)
        .map(|(arg, ty)| score_argument(arg, ty))
        .sum()
}

fn looks_integer(arg: &str) -> bool {
    arg.parse::<i64>().is_ok()
}

fn looks_boolean(arg: &str) -> bool {
    arg.eq_ignore_ascii_case("true") || arg.eq_ignore_ascii_case("false")
}

fn score_argument(arg: &str, ty: &TypeRef) -> i32 {
    match ty {
        TypeRef::TypeName { name } => match name.as_str() {
            "Int" => {
                if looks_integer(arg) {
                    3
                } else {
                    0
                }
            }
            "Bool" => {
                if looks_boolean(arg) {
                    3
                } else {
                    0
                }
            }
            _ => 1,
        },
        TypeRef::TypeVar { .. } => 1,
        TypeRef::Option { inner } | TypeRef::Maybe { inner } => {
            if arg.eq_ignore_ascii_case("null") || arg.eq_ignore_ascii_case("none") {
                2
            } else {
                1 + score_argument(arg, inner)
            }
        }
        TypeRef::ListT { .. } => {
            if arg.starts_with('[') && arg.ends_with(']') {
                3
            } else if arg.contains(',') || arg.contains(';') {
                2
            } else {
                1
            }
        }
        TypeRef::MapT { .. } => {
            if arg.starts_with('{') && arg.ends_with('}') {
                3
            } else if arg.contains(':') {
                2
            } else {
                0
            }
        }
        TypeRef::Result { .. } => {
            if (arg.starts_with('{') && arg.ends_with('}')) || arg.starts_with("Ok(") || arg.starts_with("Err(") {
                2
            } else {
                0
            }
        }
        TypeRef::FuncType { .. } => {
            if arg.contains("lambda") || arg.contains("function") || arg.contains("->") || arg.contains("=>") {
                3
            } else {
                0
            }
        }
        TypeRef::PiiType { base, .. } => score_argument(arg, base),
        TypeRef::TypeApp { base, args } => {
            let base_score = score_argument(arg, base);
            let best_arg = args.iter().map(|ty| score_argument(arg, ty)).max().unwrap_or(0);
            base_score.max(best_arg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_name(name: &str) -> TypeRef {
        TypeRef::TypeName { name: name.to_owned() }
    }

    #[test]
    fn coercion_by_shape() {
        assert_eq!(coerce_argument("42"), Value::Int(42));
        assert_eq!(coerce_argument("4200000000"), Value::Long(4_200_000_000));
        assert_eq!(coerce_argument("2.5"), Value::Double(2.5));
        assert_eq!(coerce_argument("TRUE"), Value::Bool(true));
        assert_eq!(coerce_argument("hello"), Value::Text("hello".into()));
    }

    #[test]
    fn int_params_prefer_integer_arguments() {
        let int_ty = type_name("Int");
        let text_ty = type_name("Text");
        assert_eq!(score_argument("41", &int_ty), 3);
        assert_eq!(score_argument("forty-one", &int_ty), 0);
        assert_eq!(score_argument("forty-one", &text_ty), 1);
    }

    #[test]
    fn option_scores_inner_when_not_null() {
        let ty = TypeRef::Option {
            inner: Box::new(type_name("Int")),
        };
        assert_eq!(score_argument("null", &ty), 2);
        assert_eq!(score_argument("7", &ty), 4);
    }

    #[test]
    fn list_and_map_shapes() {
        let list_ty = TypeRef::ListT {
            element: Box::new(type_name("Int")),
        };
        assert_eq!(score_argument("[1,2]", &list_ty), 3);
        assert_eq!(score_argument("1,2", &list_ty), 2);
        assert_eq!(score_argument("1", &list_ty), 1);

        let map_ty = TypeRef::MapT {
            key: Box::new(type_name("Text")),
            value: Box::new(type_name("Int")),
        };
        assert_eq!(score_argument("{a: 1}", &map_ty), 3);
        assert_eq!(score_argument("a:1", &map_ty), 2);
        assert_eq!(score_argument("a", &map_ty), 0);
    }

    #[test]
    fn arity_mismatch_disqualifies() {
        let int_ty = type_name("Int");
        assert_eq!(score_overload(&["1".to_owned(), "2".to_owned()], &[&int_ty]), i32::MIN);
    }
}
