use chrono::Utc;
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::StdRng;
use rand::Rng;
use uuid::Uuid;

use crate::engine::error::EngineError;

/// Closed set of value producers a template's `args` field can reference.
/// Each is validated once at build time; after that, generation never fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeneratorSpec {
    RandBool,
    RandIntRange(i64, i64),
    RandFloat64InRange(f64, f64),
    RandUuid,
    RandStrRange(usize, usize),
    GetTimestampNow,
}

impl GeneratorSpec {
    /// Build-time arity/range validation. Never panics; all failures surface
    /// as `EngineError::Build`.
    pub fn validate(self) -> Result<Self, EngineError> {
        match self {
            GeneratorSpec::RandIntRange(min, max) => {
                if min < 0 || min >= max {
                    return Err(EngineError::Build(format!(
                        "randIntRange({min},{max}): requires 0 <= min < max"
                    )));
                }
            }
            GeneratorSpec::RandFloat64InRange(min, max) => {
                if !min.is_finite() || !max.is_finite() || min >= max {
                    return Err(EngineError::Build(format!(
                        "randFloat64InRange({min},{max}): requires finite min < max"
                    )));
                }
            }
            GeneratorSpec::RandStrRange(min, max) => {
                if min > max {
                    return Err(EngineError::Build(format!(
                        "randStrRange({min},{max}): requires min <= max"
                    )));
                }
            }
            GeneratorSpec::RandBool | GeneratorSpec::RandUuid | GeneratorSpec::GetTimestampNow => {}
        }
        Ok(self)
    }

    /// Produce one value. Each call is independent of any other call site —
    /// callers supply their own thread-local RNG so no seed dependency
    /// serializes threads.
    pub fn generate(&self, rng: &mut StdRng) -> GeneratedValue {
        match *self {
            GeneratorSpec::RandBool => GeneratedValue::Bool(rng.gen_bool(0.5)),
            GeneratorSpec::RandIntRange(min, max) => GeneratedValue::Int(rng.gen_range(min..max)),
            GeneratorSpec::RandFloat64InRange(min, max) => {
                GeneratedValue::Float(rng.gen_range(min..max))
            }
            GeneratorSpec::RandUuid => GeneratedValue::Uuid(Uuid::new_v4()),
            GeneratorSpec::RandStrRange(min, max) => {
                let len = if min == max { min } else { rng.gen_range(min..=max) };
                GeneratedValue::Str(Alphanumeric.sample_string(rng, len))
            }
            GeneratorSpec::GetTimestampNow => {
                GeneratedValue::Timestamp(Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string())
            }
        }
    }
}

/// A single generated value, tagged by source so text-mode rendering knows
/// how to quote it and bind-mode conversion knows how to type it.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Uuid(Uuid),
    Timestamp(String),
}

impl GeneratedValue {
    /// Render for direct substitution into SQL text, properly quoted.
    pub fn render_text(&self) -> String {
        match self {
            GeneratedValue::Bool(b) => b.to_string(),
            GeneratedValue::Int(i) => i.to_string(),
            GeneratedValue::Float(f) => format!("{f}"),
            GeneratedValue::Str(s) => format!("'{}'", s.replace('\'', "''")),
            GeneratedValue::Uuid(u) => format!("'{u}'"),
            GeneratedValue::Timestamp(t) => format!("'{t}'"),
        }
    }
}

/// Parses the closed set of generator invocations from a `StatementConfig.args`
/// string, e.g. `"randIntRange(1,100), randUUID(), getTimestampNow()"`.
pub fn parse_generators(args: &str) -> Result<Vec<GeneratorSpec>, EngineError> {
    split_top_level(args)
        .into_iter()
        .map(parse_one)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(GeneratorSpec::validate)
        .collect()
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                result.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = s[start..].trim();
    if !tail.is_empty() {
        result.push(tail);
    }
    result
}

fn parse_one(invocation: &str) -> Result<GeneratorSpec, EngineError> {
    let open = invocation
        .find('(')
        .ok_or_else(|| EngineError::Build(format!("malformed generator invocation {invocation:?}")))?;
    if !invocation.ends_with(')') {
        return Err(EngineError::Build(format!(
            "malformed generator invocation {invocation:?}"
        )));
    }
    let name = invocation[..open].trim();
    let inner = invocation[open + 1..invocation.len() - 1].trim();
    let parts: Vec<&str> = if inner.is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(str::trim).collect()
    };

    match name {
        "randBool" => expect_arity(name, &parts, 0).map(|_| GeneratorSpec::RandBool),
        "randUUID" => expect_arity(name, &parts, 0).map(|_| GeneratorSpec::RandUuid),
        "getTimestampNow" => expect_arity(name, &parts, 0).map(|_| GeneratorSpec::GetTimestampNow),
        "randIntRange" => {
            expect_arity(name, &parts, 2)?;
            let min = parse_int(name, parts[0])?;
            let max = parse_int(name, parts[1])?;
            Ok(GeneratorSpec::RandIntRange(min, max))
        }
        "randFloat64InRange" => {
            expect_arity(name, &parts, 2)?;
            let min = parse_float(name, parts[0])?;
            let max = parse_float(name, parts[1])?;
            Ok(GeneratorSpec::RandFloat64InRange(min, max))
        }
        "randStrRange" => {
            expect_arity(name, &parts, 2)?;
            let min = parse_usize(name, parts[0])?;
            let max = parse_usize(name, parts[1])?;
            Ok(GeneratorSpec::RandStrRange(min, max))
        }
        other => Err(EngineError::Build(format!("undefined generator {other:?}"))),
    }
}

fn expect_arity(name: &str, parts: &[&str], n: usize) -> Result<(), EngineError> {
    if parts.len() != n {
        return Err(EngineError::Build(format!(
            "{name}: expected {n} argument(s), got {}",
            parts.len()
        )));
    }
    Ok(())
}

fn parse_int(name: &str, s: &str) -> Result<i64, EngineError> {
    s.parse()
        .map_err(|_| EngineError::Build(format!("{name}: invalid integer argument {s:?}")))
}

fn parse_float(name: &str, s: &str) -> Result<f64, EngineError> {
    let v: f64 = s
        .parse()
        .map_err(|_| EngineError::Build(format!("{name}: invalid float argument {s:?}")))?;
    if !v.is_finite() {
        return Err(EngineError::Build(format!(
            "{name}: argument {s:?} must be finite (no NaN/Inf)"
        )));
    }
    Ok(v)
}

fn parse_usize(name: &str, s: &str) -> Result<usize, EngineError> {
    s.parse()
        .map_err(|_| EngineError::Build(format!("{name}: invalid integer argument {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_generator_kinds() {
        let specs = parse_generators(
            "randBool(), randIntRange(1,100), randFloat64InRange(0.0,1.0), randUUID(), randStrRange(5,10), getTimestampNow()",
        )
        .unwrap();
        assert_eq!(specs.len(), 6);
        assert_eq!(specs[0], GeneratorSpec::RandBool);
        assert_eq!(specs[1], GeneratorSpec::RandIntRange(1, 100));
        assert_eq!(specs[2], GeneratorSpec::RandFloat64InRange(0.0, 1.0));
        assert_eq!(specs[3], GeneratorSpec::RandUuid);
        assert_eq!(specs[4], GeneratorSpec::RandStrRange(5, 10));
        assert_eq!(specs[5], GeneratorSpec::GetTimestampNow);
    }

    #[test]
    fn rejects_invalid_int_range() {
        let err = parse_generators("randIntRange(10,1)").unwrap_err();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn rejects_negative_min() {
        let err = parse_generators("randIntRange(-1,10)").unwrap_err();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn rejects_nonfinite_float() {
        let err = parse_generators("randFloat64InRange(0.0,inf)").unwrap_err();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn rejects_unknown_generator() {
        let err = parse_generators("randNope()").unwrap_err();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = parse_generators("randIntRange(1)").unwrap_err();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn quotes_strings_and_uuids_for_text_mode() {
        let val = GeneratedValue::Str("it's ok".to_string());
        assert_eq!(val.render_text(), "'it''s ok'");
    }
}
