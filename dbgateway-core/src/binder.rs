//! Rewrites the gateway's `@name` bind tokens (§4.1, §4.4) into whatever
//! positional placeholder syntax a driver's wire protocol expects, keeping
//! the order in which names first (and repeatedly) appear.

/// A driver's positional placeholder dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL: `$1`, `$2`, ...
    Dollar,
    /// MySQL: `?` for every occurrence.
    QuestionMark,
    /// MSSQL (tiberius): `@P1`, `@P2`, ...
    AtP,
}

/// Replaces every `@identifier` token in `sql` with `style`'s positional
/// placeholder, returning the rewritten SQL and the bind names in the order
/// their placeholders appear (one entry per occurrence, including repeats).
pub fn rewrite_named_params(sql: &str, style: PlaceholderStyle) -> (String, Vec<String>) {
    let mut out = String::with_capacity(sql.len());
    let mut names = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut n = 0usize;

    while let Some(c) = chars.next() {
        if c != '@' {
            out.push(c);
            continue;
        }

        let mut ident = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                ident.push(next);
                chars.next();
            } else {
                break;
            }
        }

        if ident.is_empty() {
            out.push('@');
            continue;
        }

        n += 1;
        match style {
            PlaceholderStyle::Dollar => out.push_str(&format!("${n}")),
            PlaceholderStyle::QuestionMark => out.push('?'),
            PlaceholderStyle::AtP => out.push_str(&format!("@P{n}")),
        }
        names.push(ident);
    }

    (out, names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_style_numbers_sequentially() {
        let (sql, names) = rewrite_named_params("SELECT * FROM t WHERE a = @x AND b = @y", PlaceholderStyle::Dollar);
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn question_mark_style_ignores_name() {
        let (sql, names) = rewrite_named_params("WHERE a = @x AND b = @x", PlaceholderStyle::QuestionMark);
        assert_eq!(sql, "WHERE a = ? AND b = ?");
        assert_eq!(names, vec!["x", "x"]);
    }

    #[test]
    fn bare_at_sign_without_identifier_is_left_alone() {
        let (sql, names) = rewrite_named_params("user@host", PlaceholderStyle::Dollar);
        assert_eq!(sql, "user@host");
        assert!(names.is_empty());
    }

    #[test]
    fn atp_style_for_mssql() {
        let (sql, names) = rewrite_named_params("WHERE id = @id", PlaceholderStyle::AtP);
        assert_eq!(sql, "WHERE id = @P1");
        assert_eq!(names, vec!["id"]);
    }
}
