// ABOUTME: SQL safety gate with a literal-aware tokenizer
// ABOUTME: Enforces single-statement read-only SELECT policy and row caps
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 SiamGate Project

//! # SQL Safety Gate
//!
//! Nothing the model emits is trusted. Generated SQL is tokenized with full
//! quote, dollar-quote and comment awareness before any rule runs, so a
//! `DROP` hidden inside a string literal does not trip the gate and a `DROP`
//! outside one always does. The gate enforces:
//!
//! - exactly one statement (separators detected outside literals)
//! - a leading `SELECT` (or a CTE whose terminal statement is a `SELECT`)
//! - no write/DDL keywords anywhere outside literals
//! - no references to catalog schemas or schemas outside the allow-list
//! - a row cap, injected as a `LIMIT` when the query lacks a tight one
//! - parameter placeholders matching the supplied parameter list

use std::collections::HashSet;

use crate::errors::{AppError, AppResult, ErrorCode};

/// Keywords that immediately disqualify a query
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "CREATE", "GRANT", "REVOKE",
    "COPY", "CALL", "DO", "VACUUM", "ANALYZE", "LOCK",
];

/// Catalog schemas that are never queryable through the gateway
const CATALOG_SCHEMAS: &[&str] = &["pg_catalog", "information_schema"];

/// Token kinds produced by the SQL scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare word: keyword or identifier
    Word,
    /// Double-quoted identifier
    QuotedIdent,
    /// String literal (single-quoted or dollar-quoted)
    StringLit,
    /// Numeric literal
    Number,
    /// Positional parameter placeholder (`$1`)
    Param,
    /// Any other single character
    Symbol,
}

/// A lexed SQL token
#[derive(Debug, Clone)]
pub struct Token {
    /// Kind of token
    pub kind: TokenKind,
    /// Token text; quoted identifiers keep their inner text, parameters
    /// keep their index digits, string literals are collapsed to `''`
    pub text: String,
}

impl Token {
    fn word(text: &str) -> Self {
        Self {
            kind: TokenKind::Word,
            text: text.to_owned(),
        }
    }

    /// Case-insensitive keyword comparison for bare words
    #[must_use]
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }
}

/// Tokenize SQL with literal and comment awareness
///
/// # Errors
///
/// `SqlRejected` for unterminated strings, identifiers or comments; a
/// query the scanner cannot fully classify is never executed.
pub fn tokenize(sql: &str) -> AppResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_ascii_whitespace() {
            i += 1;
        } else if c == '-' && bytes.get(i + 1) == Some(&b'-') {
            // Line comment
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if c == '/' && bytes.get(i + 1) == Some(&b'*') {
            i = skip_block_comment(sql, i)?;
        } else if c == '\'' {
            i = scan_single_quoted(sql, i)?;
            tokens.push(Token {
                kind: TokenKind::StringLit,
                text: "''".to_owned(),
            });
        } else if c == '"' {
            let (end, inner) = scan_double_quoted(sql, i)?;
            i = end;
            tokens.push(Token {
                kind: TokenKind::QuotedIdent,
                text: inner,
            });
        } else if c == '$' {
            i = scan_dollar(sql, i, &mut tokens)?;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_alphanumeric()
                    || bytes[i] == b'.'
                    || bytes[i] == b'_')
            {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Number,
                text: sql[start..i].to_owned(),
            });
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            tokens.push(Token::word(&sql[start..i]));
        } else {
            tokens.push(Token {
                kind: TokenKind::Symbol,
                text: c.to_string(),
            });
            i += c.len_utf8();
        }
    }

    Ok(tokens)
}

fn skip_block_comment(sql: &str, start: usize) -> AppResult<usize> {
    let bytes = sql.as_bytes();
    let mut depth = 0_u32;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Ok(i);
            }
        } else {
            i += 1;
        }
    }
    Err(reject("unterminated block comment"))
}

fn scan_single_quoted(sql: &str, start: usize) -> AppResult<usize> {
    let bytes = sql.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                // '' escapes a quote inside the literal
                if bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                } else {
                    return Ok(i + 1);
                }
            }
            // Conservative: a backslash consumes the next character, which
            // over-rejects some standard-conforming strings but never
            // under-lexes an E-string.
            b'\\' => i += 2,
            _ => i += 1,
        }
    }
    Err(reject("unterminated string literal"))
}

fn scan_double_quoted(sql: &str, start: usize) -> AppResult<(usize, String)> {
    let bytes = sql.as_bytes();
    let mut inner = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if bytes.get(i + 1) == Some(&b'"') {
                inner.push('"');
                i += 2;
            } else {
                return Ok((i + 1, inner));
            }
        } else {
            inner.push(bytes[i] as char);
            i += 1;
        }
    }
    Err(reject("unterminated quoted identifier"))
}

fn scan_dollar(sql: &str, start: usize, tokens: &mut Vec<Token>) -> AppResult<usize> {
    let bytes = sql.as_bytes();

    // $N positional parameter
    if bytes
        .get(start + 1)
        .is_some_and(|b| (*b as char).is_ascii_digit())
    {
        let mut i = start + 1;
        while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
            i += 1;
        }
        tokens.push(Token {
            kind: TokenKind::Param,
            text: sql[start + 1..i].to_owned(),
        });
        return Ok(i);
    }

    // $tag$ ... $tag$ dollar-quoted string
    let mut tag_end = start + 1;
    while tag_end < bytes.len()
        && ((bytes[tag_end] as char).is_ascii_alphanumeric() || bytes[tag_end] == b'_')
    {
        tag_end += 1;
    }
    if bytes.get(tag_end) == Some(&b'$') {
        let delimiter = &sql[start..=tag_end];
        let body_start = tag_end + 1;
        if let Some(close) = sql[body_start..].find(delimiter) {
            tokens.push(Token {
                kind: TokenKind::StringLit,
                text: "''".to_owned(),
            });
            return Ok(body_start + close + delimiter.len());
        }
        return Err(reject("unterminated dollar-quoted string"));
    }

    // Lone dollar sign
    tokens.push(Token {
        kind: TokenKind::Symbol,
        text: "$".to_owned(),
    });
    Ok(start + 1)
}

fn reject(message: &str) -> AppError {
    AppError::new(ErrorCode::SqlRejected, message.to_owned())
}

/// A query that passed every gate rule
#[derive(Debug, Clone)]
pub struct GatedQuery {
    /// Final SQL, with the row cap injected when needed
    pub sql: String,
    /// Number of positional parameters the SQL expects
    pub param_count: usize,
    /// Tables referenced in FROM/JOIN position, for the source footer
    pub referenced_tables: Vec<String>,
}

/// The safety gate for one tenant
#[derive(Debug, Clone)]
pub struct SafetyGate {
    allowed_schemas: HashSet<String>,
    max_rows: usize,
}

impl SafetyGate {
    /// Create a gate with the tenant's schema allow-list and row cap
    #[must_use]
    pub fn new(allowed_schemas: impl IntoIterator<Item = String>, max_rows: usize) -> Self {
        Self {
            allowed_schemas: allowed_schemas
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
            max_rows,
        }
    }

    /// Validate generated SQL against the policy and inject the row cap
    ///
    /// The returned SQL fetches up to `max_rows + 1` rows so the caller can
    /// distinguish "exactly at the cap" from "truncated".
    ///
    /// # Errors
    ///
    /// `SqlRejected`, `DisallowedStatement` or `ForbiddenSchema` naming the
    /// violated rule.
    pub fn check(&self, sql: &str, param_count: usize) -> AppResult<GatedQuery> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err(reject("empty statement"));
        }

        let tokens = tokenize(trimmed)?;
        if tokens.is_empty() {
            return Err(reject("empty statement"));
        }

        check_single_statement(&tokens)?;
        check_select_only(&tokens)?;
        check_forbidden_keywords(&tokens)?;
        check_literal_placeholders(&tokens)?;
        let analysis = analyze_relations(&tokens);
        self.check_schemas(&tokens, &analysis)?;
        check_params(&tokens, param_count)?;

        let sql = self.apply_row_cap(trimmed, &tokens);

        Ok(GatedQuery {
            sql,
            param_count,
            referenced_tables: analysis.relations,
        })
    }

    /// Maximum rows the gate allows a result to carry
    #[must_use]
    pub const fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Reject catalog access anywhere, disallowed schemas on every relation
    /// reference, and dotted qualifiers that name neither a declared
    /// relation/alias nor an allowed schema.
    ///
    /// Relation qualifiers are grammatically schemas, so the allow-list
    /// applies to them unconditionally; an alias can never shadow one.
    fn check_schemas(&self, tokens: &[Token], analysis: &RelationAnalysis) -> AppResult<()> {
        for (index, token) in tokens.iter().enumerate() {
            if !is_ident(token) {
                continue;
            }
            let qualifier = token.text.to_lowercase();

            if CATALOG_SCHEMAS.contains(&qualifier.as_str()) || qualifier.starts_with("pg_") {
                return Err(AppError::new(
                    ErrorCode::ForbiddenSchema,
                    format!("reference to system schema '{qualifier}' is not permitted"),
                ));
            }

            // Only the head of a dotted chain is a qualifier
            let dotted = is_symbol(tokens.get(index + 1), ".")
                && !(index > 0 && is_symbol(tokens.get(index - 1), "."));
            if !dotted {
                continue;
            }

            if analysis.relation_qualifiers.contains(&index) {
                if !self.allowed_schemas.contains(&qualifier) {
                    return Err(AppError::new(
                        ErrorCode::ForbiddenSchema,
                        format!("schema '{qualifier}' is outside the tenant allow-list"),
                    ));
                }
            } else if !analysis.known_names.contains(&qualifier)
                && !self.allowed_schemas.contains(&qualifier)
            {
                return Err(AppError::new(
                    ErrorCode::ForbiddenSchema,
                    format!(
                        "qualifier '{qualifier}' names neither a referenced relation nor an allowed schema"
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Ensure the final SQL cannot return more than `max_rows + 1` rows
    fn apply_row_cap(&self, sql: &str, tokens: &[Token]) -> String {
        let fetch_limit = self.max_rows + 1;
        let body = strip_trailing_semicolon(sql);

        match top_level_limit(tokens) {
            Some(limit) if limit <= self.max_rows => body.to_owned(),
            Some(_) => format!("SELECT * FROM ({body}) AS capped_rows LIMIT {fetch_limit}"),
            None => format!("SELECT * FROM ({body}) AS capped_rows LIMIT {fetch_limit}"),
        }
    }
}

fn check_single_statement(tokens: &[Token]) -> AppResult<()> {
    let mut seen_semicolon = false;
    for token in tokens {
        if seen_semicolon {
            return Err(AppError::new(
                ErrorCode::SqlRejected,
                "multiple statements are not permitted",
            ));
        }
        if token.kind == TokenKind::Symbol && token.text == ";" {
            seen_semicolon = true;
        }
    }
    Ok(())
}

fn check_select_only(tokens: &[Token]) -> AppResult<()> {
    let first = &tokens[0];
    if !(first.is_keyword("SELECT") || first.is_keyword("WITH")) {
        return Err(AppError::new(
            ErrorCode::DisallowedStatement,
            format!("statement must begin with SELECT, found '{}'", first.text),
        ));
    }
    if !tokens.iter().any(|t| t.is_keyword("SELECT")) {
        return Err(AppError::new(
            ErrorCode::DisallowedStatement,
            "no SELECT found in statement",
        ));
    }
    Ok(())
}

fn check_forbidden_keywords(tokens: &[Token]) -> AppResult<()> {
    for token in tokens {
        if token.kind != TokenKind::Word {
            continue;
        }
        for forbidden in FORBIDDEN_KEYWORDS {
            if token.text.eq_ignore_ascii_case(forbidden) {
                return Err(AppError::new(
                    ErrorCode::DisallowedStatement,
                    format!("{forbidden} is not permitted"),
                ));
            }
        }
    }
    Ok(())
}

/// Keywords that terminate a FROM list and can never be relation aliases
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT",
    "ON", "USING", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "NATURAL", "WINDOW",
    "FETCH", "FOR", "TABLESAMPLE", "SELECT",
];

fn is_ident(token: &Token) -> bool {
    matches!(token.kind, TokenKind::Word | TokenKind::QuotedIdent)
}

fn is_symbol(token: Option<&Token>, text: &str) -> bool {
    token.map_or(false, |t| t.kind == TokenKind::Symbol && t.text == text)
}

fn is_clause_keyword(token: &Token) -> bool {
    token.kind == TokenKind::Word
        && CLAUSE_KEYWORDS
            .iter()
            .any(|k| token.text.eq_ignore_ascii_case(k))
}

fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0_i32;
    for (index, token) in tokens.iter().enumerate().skip(open) {
        if token.kind == TokenKind::Symbol {
            match token.text.as_str() {
                "(" => depth += 1,
                ")" => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(index);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Parse state of one parenthesis level's FROM list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListMode {
    Idle,
    ExpectRelation,
    AfterRelation,
}

/// What the relation scan learned about a statement
#[derive(Debug, Default)]
struct RelationAnalysis {
    /// Relation references in FROM/JOIN position, in order, deduplicated
    relations: Vec<String>,
    /// Token indexes of schema qualifiers on those relation references
    relation_qualifiers: HashSet<usize>,
    /// Names legal as dotted qualifiers in expressions: relation base
    /// names, declared aliases and CTE names
    known_names: HashSet<String>,
}

/// Walk FROM/JOIN lists (including comma joins and subqueries) collecting
/// relation references, their schema qualifiers, aliases and CTE names
fn analyze_relations(tokens: &[Token]) -> RelationAnalysis {
    let mut analysis = RelationAnalysis::default();

    // CTE names: `name [(columns)] AS (` declares a relation-like name
    for (index, token) in tokens.iter().enumerate() {
        if !is_ident(token) {
            continue;
        }
        let mut next = index + 1;
        if is_symbol(tokens.get(next), "(") {
            match matching_paren(tokens, next) {
                Some(close) => next = close + 1,
                None => continue,
            }
        }
        if tokens.get(next).map_or(false, |t| t.is_keyword("AS"))
            && is_symbol(tokens.get(next + 1), "(")
        {
            analysis.known_names.insert(token.text.to_lowercase());
        }
    }

    // One mode per parenthesis depth so a subquery cannot leak list state
    let mut modes: Vec<ListMode> = vec![ListMode::Idle];
    let mut index = 0;
    while index < tokens.len() {
        let token = &tokens[index];
        let depth = modes.len() - 1;

        if is_symbol(Some(token), "(") {
            if modes[depth] == ListMode::ExpectRelation {
                // Subquery as relation; the alias after its closing paren
                // belongs to this level
                modes[depth] = ListMode::AfterRelation;
            }
            modes.push(ListMode::Idle);
            index += 1;
        } else if is_symbol(Some(token), ")") {
            if modes.len() > 1 {
                modes.pop();
            }
            index += 1;
        } else if is_symbol(Some(token), ",") {
            if modes[depth] == ListMode::AfterRelation {
                modes[depth] = ListMode::ExpectRelation;
            }
            index += 1;
        } else if token.is_keyword("FROM") || token.is_keyword("JOIN") {
            modes[depth] = ListMode::ExpectRelation;
            index += 1;
        } else if modes[depth] == ListMode::ExpectRelation && is_ident(token) {
            if token.is_keyword("LATERAL") || token.is_keyword("ONLY") {
                index += 1;
            } else if is_clause_keyword(token) {
                modes[depth] = ListMode::Idle;
                index += 1;
            } else {
                let first = token.text.to_lowercase();
                if is_symbol(tokens.get(index + 1), ".")
                    && tokens.get(index + 2).map_or(false, is_ident)
                {
                    let second = tokens[index + 2].text.to_lowercase();
                    analysis.relation_qualifiers.insert(index);
                    push_unique(&mut analysis.relations, format!("{first}.{second}"));
                    analysis.known_names.insert(second);
                    index += 3;
                } else {
                    push_unique(&mut analysis.relations, first.clone());
                    analysis.known_names.insert(first);
                    index += 1;
                }
                modes[depth] = ListMode::AfterRelation;
            }
        } else if modes[depth] == ListMode::AfterRelation && is_ident(token) {
            if token.is_keyword("AS") {
                index += 1;
            } else if is_clause_keyword(token) {
                modes[depth] = ListMode::Idle;
                index += 1;
            } else {
                analysis.known_names.insert(token.text.to_lowercase());
                index += 1;
            }
        } else {
            index += 1;
        }
    }

    analysis
}

fn push_unique(relations: &mut Vec<String>, name: String) {
    if !relations.contains(&name) {
        relations.push(name);
    }
}

/// Literal values in comparison or membership position must be `$n`
/// placeholders. Constant primitives elsewhere (LIMIT/OFFSET counts,
/// function arguments, select-list constants) stay legal.
fn check_literal_placeholders(tokens: &[Token]) -> AppResult<()> {
    for (index, token) in tokens.iter().enumerate() {
        if !matches!(token.kind, TokenKind::StringLit | TokenKind::Number) {
            continue;
        }
        if token.kind == TokenKind::Number
            && index > 0
            && (tokens[index - 1].is_keyword("LIMIT") || tokens[index - 1].is_keyword("OFFSET"))
        {
            continue;
        }
        if literal_in_value_position(tokens, index) {
            return Err(AppError::new(
                ErrorCode::SqlRejected,
                "literal values must be passed as $n parameter placeholders",
            ));
        }
    }
    Ok(())
}

fn is_comparison_symbol(token: &Token) -> bool {
    token.kind == TokenKind::Symbol && matches!(token.text.as_str(), "=" | "<" | ">")
}

fn literal_in_value_position(tokens: &[Token], index: usize) -> bool {
    if let Some(prev) = index.checked_sub(1).and_then(|i| tokens.get(i)) {
        if is_comparison_symbol(prev)
            || prev.is_keyword("LIKE")
            || prev.is_keyword("ILIKE")
            || prev.is_keyword("BETWEEN")
        {
            return true;
        }
        // Second bound of `BETWEEN <x> AND <literal>`
        if prev.is_keyword("AND")
            && index >= 3
            && tokens[index - 3].is_keyword("BETWEEN")
        {
            return true;
        }
    }
    if let Some(next) = tokens.get(index + 1) {
        if is_comparison_symbol(next) || next.is_keyword("LIKE") || next.is_keyword("ILIKE") {
            return true;
        }
    }
    inside_in_list(tokens, index)
}

/// Walk back over literals and commas; an opening paren preceded by IN
/// means this literal is a membership value
fn inside_in_list(tokens: &[Token], index: usize) -> bool {
    let mut cursor = index;
    while cursor > 0 {
        cursor -= 1;
        let token = &tokens[cursor];
        match token.kind {
            TokenKind::StringLit | TokenKind::Number | TokenKind::Param => {}
            TokenKind::Symbol if token.text == "," => {}
            TokenKind::Symbol if token.text == "(" => {
                return cursor > 0 && tokens[cursor - 1].is_keyword("IN");
            }
            _ => return false,
        }
    }
    false
}

/// Find a `LIMIT <n>` at parenthesis depth zero
fn top_level_limit(tokens: &[Token]) -> Option<usize> {
    let mut depth = 0_i32;
    for (index, token) in tokens.iter().enumerate() {
        match (token.kind, token.text.as_str()) {
            (TokenKind::Symbol, "(") => depth += 1,
            (TokenKind::Symbol, ")") => depth -= 1,
            _ => {}
        }
        if depth == 0 && token.is_keyword("LIMIT") {
            if let Some(next) = tokens.get(index + 1) {
                if next.kind == TokenKind::Number {
                    return next.text.parse().ok();
                }
            }
        }
    }
    None
}

fn strip_trailing_semicolon(sql: &str) -> &str {
    sql.trim_end().trim_end_matches(';').trim_end()
}

/// Placeholders must be contiguous from `$1` and match the parameter list
fn check_params(tokens: &[Token], param_count: usize) -> AppResult<()> {
    let mut max_index = 0_usize;
    for token in tokens {
        if token.kind == TokenKind::Param {
            let index: usize = token
                .text
                .parse()
                .map_err(|_| reject("invalid parameter placeholder"))?;
            if index == 0 {
                return Err(reject("parameter placeholders start at $1"));
            }
            max_index = max_index.max(index);
        }
    }
    if max_index != param_count {
        return Err(AppError::new(
            ErrorCode::SqlRejected,
            format!(
                "statement references {max_index} parameter(s) but {param_count} value(s) were supplied"
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SafetyGate {
        SafetyGate::new(vec!["public".to_owned()], 500)
    }

    #[test]
    fn plain_select_passes() {
        let gated = gate()
            .check("SELECT COUNT(*) FROM employees WHERE department = $1", 1)
            .unwrap();
        assert_eq!(gated.referenced_tables, vec!["employees"]);
        assert!(gated.sql.contains("LIMIT 501"));
    }

    #[test]
    fn multiple_statements_rejected() {
        let err = gate()
            .check("DROP TABLE employees; SELECT 1", 0)
            .unwrap_err();
        assert!(matches!(
            err.code,
            ErrorCode::SqlRejected | ErrorCode::DisallowedStatement
        ));
    }

    #[test]
    fn write_keywords_rejected() {
        for sql in [
            "INSERT INTO employees VALUES (1)",
            "SELECT 1; DELETE FROM employees",
            "WITH x AS (UPDATE employees SET salary = 0 RETURNING id) SELECT * FROM x",
        ] {
            assert!(gate().check(sql, 0).is_err(), "should reject: {sql}");
        }
    }

    #[test]
    fn forbidden_keyword_inside_literal_is_fine() {
        let gated = gate()
            .check("SELECT 'please DROP me a line' AS note FROM notes", 0)
            .unwrap();
        assert_eq!(gated.referenced_tables, vec!["notes"]);
    }

    #[test]
    fn dollar_quoted_literal_hides_keywords() {
        let gated = gate()
            .check("SELECT $tag$DELETE everything$tag$ AS label FROM notes", 0)
            .unwrap();
        assert_eq!(gated.referenced_tables, vec!["notes"]);
    }

    #[test]
    fn comment_hidden_statement_rejected() {
        // The comment is skipped, leaving a bare second statement
        let err = gate().check("SELECT 1 /* ; */ ; DROP TABLE x", 0).unwrap_err();
        assert!(matches!(
            err.code,
            ErrorCode::SqlRejected | ErrorCode::DisallowedStatement
        ));
    }

    #[test]
    fn catalog_access_rejected() {
        let err = gate()
            .check("SELECT * FROM pg_catalog.pg_tables", 0)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenSchema);

        let err = gate()
            .check("SELECT * FROM information_schema.tables", 0)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenSchema);
    }

    #[test]
    fn foreign_schema_rejected_but_alias_allowed() {
        let err = gate()
            .check("SELECT * FROM secret_schema.users", 0)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenSchema);

        // e.department is an alias-qualified column, not a schema reference
        let gated = gate()
            .check("SELECT e.department FROM employees e WHERE e.salary > $1", 1)
            .unwrap();
        assert_eq!(gated.referenced_tables, vec!["employees"]);
    }

    #[test]
    fn comma_joined_forbidden_schema_rejected() {
        let err = gate()
            .check(
                "SELECT * FROM employees, secret_schema.salaries \
                 WHERE employees.id = secret_schema.salaries.emp_id",
                0,
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenSchema);
    }

    #[test]
    fn comma_joined_allowed_schemas_pass() {
        let gated = gate()
            .check(
                "SELECT * FROM public.employees, public.departments \
                 WHERE public.employees.dept_id = public.departments.id",
                0,
            )
            .unwrap();
        assert_eq!(
            gated.referenced_tables,
            vec!["public.employees", "public.departments"]
        );
    }

    #[test]
    fn alias_cannot_shadow_a_schema() {
        // Declaring an alias named like the schema must not smuggle the
        // relation reference past the allow-list
        let err = gate()
            .check(
                "SELECT * FROM employees AS secret_schema, secret_schema.users",
                0,
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenSchema);
    }

    #[test]
    fn unknown_expression_qualifier_rejected() {
        let err = gate()
            .check("SELECT mystery.value FROM employees", 0)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ForbiddenSchema);
    }

    #[test]
    fn table_and_cte_names_usable_as_qualifiers() {
        let gated = gate()
            .check("SELECT employees.name FROM employees", 0)
            .unwrap();
        assert_eq!(gated.referenced_tables, vec!["employees"]);

        gate()
            .check(
                "WITH totals AS (SELECT department, COUNT(*) AS headcount \
                 FROM employees GROUP BY department) \
                 SELECT totals.headcount FROM totals",
                0,
            )
            .unwrap();
    }

    #[test]
    fn subquery_alias_usable_as_qualifier() {
        let gated = gate()
            .check(
                "SELECT top_paid.name FROM (SELECT name FROM employees LIMIT 5) AS top_paid",
                0,
            )
            .unwrap();
        assert_eq!(gated.referenced_tables, vec!["employees"]);
    }

    #[test]
    fn embedded_string_literal_rejected() {
        let err = gate()
            .check("SELECT COUNT(*) FROM employees WHERE department = 'IT'", 0)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SqlRejected);
    }

    #[test]
    fn embedded_numeric_comparison_rejected() {
        let err = gate()
            .check("SELECT * FROM employees WHERE salary > 50000", 0)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SqlRejected);
    }

    #[test]
    fn in_list_literals_rejected() {
        let err = gate()
            .check("SELECT * FROM employees WHERE department IN ('IT', 'HR')", 0)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SqlRejected);
    }

    #[test]
    fn between_literals_rejected() {
        let err = gate()
            .check(
                "SELECT * FROM employees WHERE hire_date BETWEEN '2024-01-01' AND '2024-12-31'",
                0,
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SqlRejected);
    }

    #[test]
    fn parameterized_filters_still_pass() {
        gate()
            .check(
                "SELECT * FROM employees WHERE department = $1 AND salary BETWEEN $2 AND $3",
                3,
            )
            .unwrap();
    }

    #[test]
    fn constant_function_arguments_allowed() {
        gate()
            .check(
                "SELECT date_trunc('month', hire_date) AS month_start FROM employees \
                 GROUP BY 1 ORDER BY 1 LIMIT 12",
                0,
            )
            .unwrap();
    }

    #[test]
    fn non_select_rejected() {
        let err = gate().check("EXPLAIN SELECT 1", 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::DisallowedStatement);
    }

    #[test]
    fn cte_select_passes() {
        let gated = gate()
            .check(
                "WITH it AS (SELECT * FROM employees WHERE department = $1) \
                 SELECT COUNT(*) FROM it",
                1,
            )
            .unwrap();
        assert!(gated.sql.starts_with("SELECT * FROM (WITH it AS"));
    }

    #[test]
    fn tight_limit_is_kept() {
        let gated = gate().check("SELECT * FROM employees LIMIT 20", 0).unwrap();
        assert_eq!(gated.sql, "SELECT * FROM employees LIMIT 20");
    }

    #[test]
    fn loose_limit_is_capped() {
        let gated = gate()
            .check("SELECT * FROM employees LIMIT 99999", 0)
            .unwrap();
        assert!(gated.sql.contains("AS capped_rows LIMIT 501"));
    }

    #[test]
    fn inner_limit_does_not_count_as_cap() {
        let gated = gate()
            .check("SELECT * FROM (SELECT * FROM employees LIMIT 5) AS top_five", 0)
            .unwrap();
        assert!(gated.sql.contains("AS capped_rows LIMIT 501"));
    }

    #[test]
    fn param_count_mismatch_rejected() {
        let err = gate()
            .check("SELECT * FROM employees WHERE department = $1 AND role = $2", 1)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SqlRejected);
    }

    #[test]
    fn trailing_semicolon_tolerated() {
        let gated = gate().check("SELECT COUNT(*) FROM employees;", 0).unwrap();
        assert!(!gated.sql.contains(';'));
    }

    #[test]
    fn unterminated_literal_rejected() {
        let err = gate().check("SELECT * FROM t WHERE a = 'oops", 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::SqlRejected);
    }

    #[test]
    fn join_tables_collected() {
        let gated = gate()
            .check(
                "SELECT e.name, d.name FROM employees e JOIN departments d ON e.dept_id = d.id",
                0,
            )
            .unwrap();
        assert_eq!(gated.referenced_tables, vec!["employees", "departments"]);
    }
}
