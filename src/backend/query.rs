//! Table query builder
//!
//! A backend-neutral description of a row query: column selection,
//! equality and `ilike` filters, ordering and an inclusive row range.
//! Backends translate it into their own dialect; [`TableQuery::to_query_pairs`]
//! produces the PostgREST form.

/// Row filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: String },
    /// Any of `columns ILIKE pattern`
    OrIlike { columns: Vec<String>, pattern: String },
}

/// Sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Query against one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    pub table: String,
    /// Comma-separated column list; `None` selects all columns
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    /// Inclusive row range `(from, to)`
    pub range: Option<(u64, u64)>,
    pub limit: Option<u64>,
}

impl TableQuery {
    /// Start a query on `table`
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Eq {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Match rows where any of `columns` matches `pattern` case-insensitively
    ///
    /// `pattern` uses SQL `LIKE` syntax: `%` and `_` are wildcards and `\`
    /// escapes the next character.
    pub fn or_ilike(mut self, columns: &[&str], pattern: impl Into<String>) -> Self {
        self.filters.push(Filter::OrIlike {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            pattern: pattern.into(),
        });
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    /// Restrict to rows `from..=to`
    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.range = Some((from, to.max(from)));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Offset and row count after combining `range` and `limit`
    pub fn window(&self) -> (u64, Option<u64>) {
        match (self.range, self.limit) {
            (Some((from, to)), Some(limit)) => (from, Some((to - from + 1).min(limit))),
            (Some((from, to)), None) => (from, Some(to - from + 1)),
            (None, limit) => (0, limit),
        }
    }

    /// PostgREST query string parameters (unencoded)
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        pairs.push((
            "select".to_string(),
            self.columns.clone().unwrap_or_else(|| "*".to_string()),
        ));

        for filter in &self.filters {
            match filter {
                Filter::Eq { column, value } => {
                    pairs.push((column.clone(), format!("eq.{value}")));
                }
                Filter::OrIlike { columns, pattern } => {
                    let quoted = quote_value(pattern);
                    let alternatives: Vec<String> = columns
                        .iter()
                        .map(|c| format!("{c}.ilike.{quoted}"))
                        .collect();
                    pairs.push(("or".to_string(), format!("({})", alternatives.join(","))));
                }
            }
        }

        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|o| {
                    let dir = if o.ascending { "asc" } else { "desc" };
                    format!("{}.{dir}", o.column)
                })
                .collect();
            pairs.push(("order".to_string(), order.join(",")));
        }

        let (offset, limit) = self.window();
        if offset > 0 {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        if let Some(limit) = limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }

        pairs
    }
}

/// Double-quote a value for a PostgREST logical filter, escaping `"` and `\`
fn quote_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Escape `LIKE` metacharacters so `text` matches literally
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Evaluate a `LIKE` pattern against `text`, ignoring case
pub fn ilike_matches(pattern: &str, text: &str) -> bool {
    #[derive(Debug, Clone, Copy)]
    enum Token {
        Any,
        One,
        Lit(char),
    }

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Lit(chars.next().unwrap_or('\\')),
            c => Token::Lit(c),
        });
    }

    let text: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();
    let eq = |p: char, t: char| p.to_lowercase().eq(std::iter::once(t));

    // reachable[j]: pattern prefix matches text[..j]
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;
    for token in tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            Token::Any => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= reachable[j];
                    next[j] = seen;
                }
            }
            Token::One => {
                for j in 1..=text.len() {
                    next[j] = reachable[j - 1];
                }
            }
            Token::Lit(p) => {
                for j in 1..=text.len() {
                    next[j] = reachable[j - 1] && eq(p, text[j - 1]);
                }
            }
        }
        reachable = next;
    }
    reachable[text.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off"), r"50\%\_off");
        assert_eq!(escape_like(r"a\b"), r"a\\b");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_ilike_matches() {
        assert!(ilike_matches("%rust%", "The RUST Book"));
        assert!(!ilike_matches("%rust%", "golang"));
        assert!(ilike_matches("a_c", "ABC"));
        assert!(!ilike_matches("a_c", "ac"));
        assert!(ilike_matches(&format!("%{}%", escape_like("50%")), "save 50% now"));
        assert!(!ilike_matches(&format!("%{}%", escape_like("50%")), "save 500 now"));
        assert!(!ilike_matches(&format!("%{}%", escape_like("a_c")), "abc"));
        assert!(ilike_matches("%", ""));
    }

    #[test]
    fn test_postgrest_pairs() {
        let query = TableQuery::from("read_records")
            .select("url,status")
            .eq("url", "https://example.com/a")
            .or_ilike(&["title", "domain"], r"%a\_b%")
            .order("last_read_at", false)
            .range(10, 20);

        let pairs = query.to_query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("select".to_string(), "url,status".to_string()),
                ("url".to_string(), "eq.https://example.com/a".to_string()),
                (
                    "or".to_string(),
                    r#"(title.ilike."%a\\_b%",domain.ilike."%a\\_b%")"#.to_string()
                ),
                ("order".to_string(), "last_read_at.desc".to_string()),
                ("offset".to_string(), "10".to_string()),
                ("limit".to_string(), "11".to_string()),
            ]
        );
    }

    #[test]
    fn test_window_combines_range_and_limit() {
        assert_eq!(TableQuery::from("t").limit(1).window(), (0, Some(1)));
        assert_eq!(TableQuery::from("t").range(5, 9).limit(2).window(), (5, Some(2)));
        assert_eq!(TableQuery::from("t").window(), (0, None));
    }
}
