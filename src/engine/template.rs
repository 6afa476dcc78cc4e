use crate::config::DbDriver;
use crate::engine::error::EngineError;
use crate::engine::generator::{parse_generators, GeneratorSpec};

/// Whether a compiled query reads or mutates rows; decides which `SqlClient`
/// method the executor adapter calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    Read,
    Exec,
}

/// Output of the template compiler. Rendering after this point is infallible.
#[derive(Debug, Clone)]
pub enum CompiledQuery {
    /// No generators configured: the query is a fixed string re-submitted as
    /// text on every iteration.
    Text { sql: String, class: QueryClass },
    /// Generators configured: placeholders were replaced with driver-specific
    /// bind tokens once, and a prepared statement executes with the ordered
    /// argument tuple each iteration.
    Bind {
        sql: String,
        class: QueryClass,
        generators: Vec<GeneratorSpec>,
    },
}

impl CompiledQuery {
    pub fn class(&self) -> QueryClass {
        match self {
            CompiledQuery::Text { class, .. } => *class,
            CompiledQuery::Bind { class, .. } => *class,
        }
    }
}

/// Compiles a `query` template plus its `args` generator list into a
/// `CompiledQuery`. All parse errors, undefined generator names, arity
/// mismatches, and placeholder/generator-count mismatches surface here.
pub fn compile(query: &str, args: &str, driver: DbDriver) -> Result<CompiledQuery, EngineError> {
    let class = classify(query);

    if args.trim().is_empty() {
        if count_placeholders(query) > 0 {
            return Err(EngineError::Build(
                "query contains placeholders but no args were configured".to_string(),
            ));
        }
        return Ok(CompiledQuery::Text {
            sql: query.to_string(),
            class,
        });
    }

    let generators = parse_generators(args)?;
    let placeholder_count = count_placeholders(query);
    if placeholder_count != generators.len() {
        return Err(EngineError::Build(format!(
            "query has {placeholder_count} placeholder(s) but {} generator(s) were configured",
            generators.len()
        )));
    }

    let sql = rewrite_placeholders(query, driver);
    Ok(CompiledQuery::Bind { sql, class, generators })
}

/// Counts `?` placeholder tokens outside of single-quoted string literals.
fn count_placeholders(query: &str) -> usize {
    let mut count = 0;
    let mut in_string = false;
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                if in_string && chars.peek() == Some(&'\'') {
                    // escaped quote inside a literal
                    chars.next();
                } else {
                    in_string = !in_string;
                }
            }
            '?' if !in_string => count += 1,
            _ => {}
        }
    }
    count
}

/// Replaces each `?` placeholder (outside string literals) with the
/// driver-appropriate bind token, in order.
fn rewrite_placeholders(query: &str, driver: DbDriver) -> String {
    let mut out = String::with_capacity(query.len());
    let mut in_string = false;
    let mut index = 0usize;
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                out.push(c);
                if in_string && chars.peek() == Some(&'\'') {
                    out.push(chars.next().unwrap());
                } else {
                    in_string = !in_string;
                }
            }
            '?' if !in_string => match driver {
                DbDriver::Postgres => {
                    index += 1;
                    out.push_str(&format!("${index}"));
                }
                DbDriver::Mysql => out.push('?'),
            },
            _ => out.push(c),
        }
    }
    out
}

/// Strips `--` line comments and nestable `/* */` block comments, then
/// inspects the first keyword to classify the statement. A `WITH` clause is
/// classified `Read` only if a top-level `SELECT` appears in its body;
/// otherwise it defaults to `Exec`.
fn classify(query: &str) -> QueryClass {
    let stripped = strip_comments(query);
    let mut words = stripped.split_whitespace();
    match words.next().map(str::to_uppercase).as_deref() {
        Some("SELECT") => QueryClass::Read,
        Some("WITH") => {
            if contains_top_level_select(&stripped) {
                QueryClass::Read
            } else {
                QueryClass::Exec
            }
        }
        Some("INSERT") | Some("UPDATE") | Some("DELETE") => QueryClass::Exec,
        _ => QueryClass::Exec,
    }
}

fn contains_top_level_select(stripped: &str) -> bool {
    let mut depth = 0i32;
    let mut word = String::new();
    for c in stripped.chars() {
        match c {
            '(' => {
                depth += 1;
                word.clear();
            }
            ')' => {
                depth -= 1;
                word.clear();
            }
            c if c.is_alphanumeric() || c == '_' => word.push(c),
            _ => {
                if depth == 0 && word.eq_ignore_ascii_case("select") {
                    return true;
                }
                word.clear();
            }
        }
    }
    depth == 0 && word.eq_ignore_ascii_case("select")
}

fn strip_comments(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    let mut block_depth = 0i32;
    while let Some(c) = chars.next() {
        if block_depth > 0 {
            if c == '/' && chars.peek() == Some(&'*') {
                chars.next();
                block_depth += 1;
            } else if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                block_depth -= 1;
            }
            continue;
        }
        if c == '-' && chars.peek() == Some(&'-') {
            chars.next();
            for c2 in chars.by_ref() {
                if c2 == '\n' {
                    out.push('\n');
                    break;
                }
            }
            continue;
        }
        if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            block_depth = 1;
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_mode_with_no_generators() {
        let compiled = compile("SELECT 1", "", DbDriver::Postgres).unwrap();
        match compiled {
            CompiledQuery::Text { sql, class } => {
                assert_eq!(sql, "SELECT 1");
                assert_eq!(class, QueryClass::Read);
            }
            _ => panic!("expected text mode"),
        }
    }

    #[test]
    fn rejects_placeholder_without_args() {
        let err = compile("SELECT * FROM t WHERE id = ?", "", DbDriver::Postgres).unwrap_err();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn bind_mode_postgres_placeholders() {
        let compiled = compile(
            "INSERT INTO t (a,b) VALUES (?,?)",
            "randIntRange(1,100), randUUID()",
            DbDriver::Postgres,
        )
        .unwrap();
        match compiled {
            CompiledQuery::Bind { sql, class, generators } => {
                assert_eq!(sql, "INSERT INTO t (a,b) VALUES ($1,$2)");
                assert_eq!(class, QueryClass::Exec);
                assert_eq!(generators.len(), 2);
            }
            _ => panic!("expected bind mode"),
        }
    }

    #[test]
    fn bind_mode_mysql_placeholders_stay_question_marks() {
        let compiled = compile(
            "SELECT * FROM t WHERE id = ?",
            "randIntRange(1,100)",
            DbDriver::Mysql,
        )
        .unwrap();
        match compiled {
            CompiledQuery::Bind { sql, .. } => assert_eq!(sql, "SELECT * FROM t WHERE id = ?"),
            _ => panic!("expected bind mode"),
        }
    }

    #[test]
    fn rejects_placeholder_generator_count_mismatch() {
        let err = compile(
            "INSERT INTO t (a,b) VALUES (?,?)",
            "randIntRange(1,100)",
            DbDriver::Postgres,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn classifies_with_select_body_as_read() {
        let class = classify("WITH x AS (SELECT 1) SELECT * FROM x");
        assert_eq!(class, QueryClass::Read);
    }

    #[test]
    fn classifies_insert_as_exec_and_strips_comments() {
        let class = classify("-- comment\n/* block */ INSERT INTO t VALUES (1)");
        assert_eq!(class, QueryClass::Exec);
    }
}
