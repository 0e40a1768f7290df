//! Translates a whitelisted set of request parameters into SQL fragments
//! (§4.4): a `WHERE` clause, an `ORDER BY` clause and an engine-appropriate
//! pagination clause, all using named bind parameters.
//!
//! Modeled on `sqlx_core::query_builder::QueryBuilder`'s push-based API —
//! accumulate into a buffer rather than format a whole statement at once —
//! but pushing named parameters into a [`Params`] bag instead of a
//! `DB::Arguments`, since the bound values cross the [`DbConnection`] trait
//! object boundary rather than a concrete driver's argument encoder.
//!
//! [`DbConnection`]: dbgateway_core::connection::DbConnection

use std::collections::HashSet;

use dbgateway_core::{Engine, ParamValue, Params};

/// A comparison operator accepted in a `field[op]=value` token (§4.4 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    In,
    Nn,
}

impl FilterOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "like" => Some(Self::Like),
            "in" => Some(Self::In),
            "nn" => Some(Self::Nn),
            _ => None,
        }
    }

    fn sql_operator(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::In | Self::Nn => "",
        }
    }
}

/// One parsed `field=value` or `field[op]=value` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

/// The parsed, whitelist-filtered form of a list endpoint's query string
/// (§4.4): filters, sort order and pagination, stripped of anything not on
/// the caller's whitelist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortField>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Parses raw `(key, value)` query pairs per the §4.4 token grammar,
/// dropping (and logging) any field not present in `whitelist`. `whitelist`
/// holds bare field names — never SQL, never the `[op]` suffix.
pub fn parse_query_params(raw: &[(String, String)], whitelist: &HashSet<&str>) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();

    for (key, value) in raw {
        match key.as_str() {
            "_sort" => parsed.sort = parse_sort(value, whitelist),
            "_limit" => match value.parse::<i64>() {
                Ok(n) if n >= 0 => parsed.limit = Some(n),
                _ => tracing::warn!(value, "ignoring non-numeric or negative _limit"),
            },
            "_offset" => match value.parse::<i64>() {
                Ok(n) if n >= 0 => parsed.offset = Some(n),
                _ => tracing::warn!(value, "ignoring non-numeric or negative _offset"),
            },
            key => {
                let (field, op) = split_field_and_op(key);
                if !whitelist.contains(field) {
                    tracing::warn!(field, "dropping filter on non-whitelisted field");
                    continue;
                }
                let Some(op) = op else {
                    tracing::warn!(field, operator = %key, "dropping filter with unknown operator");
                    continue;
                };
                parsed.filters.push(Filter { field: field.to_owned(), op, value: value.clone() });
            }
        }
    }

    parsed
}

fn split_field_and_op(key: &str) -> (&str, Option<FilterOp>) {
    match key.strip_suffix(']').and_then(|s| s.split_once('[')) {
        Some((field, op)) => (field, FilterOp::parse(op)),
        None => (key, Some(FilterOp::Eq)),
    }
}

fn parse_sort(value: &str, whitelist: &HashSet<&str>) -> Vec<SortField> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|token| {
            let (field, direction) = if let Some(rest) = token.strip_prefix('-') {
                (rest, SortDirection::Desc)
            } else if let Some(rest) = token.strip_prefix('+') {
                (rest, SortDirection::Asc)
            } else if let Some(rest) = token.strip_suffix("_desc") {
                (rest, SortDirection::Desc)
            } else if let Some(rest) = token.strip_suffix("_asc") {
                (rest, SortDirection::Asc)
            } else {
                (token, SortDirection::Asc)
            };

            if whitelist.contains(field) {
                Some(SortField { field: field.to_owned(), direction })
            } else {
                tracing::warn!(field, "dropping sort on non-whitelisted field");
                None
            }
        })
        .collect()
}

/// A built statement fragment set: the pieces a driver adapter appends, in
/// order, after `SELECT ... FROM <table>` (§4.4).
#[derive(Debug, Clone, Default)]
pub struct BuiltQuery {
    pub where_clause: Option<String>,
    pub order_clause: Option<String>,
    pub pagination_clause: Option<String>,
    pub params: Params,
}

/// Builds [`BuiltQuery`] fragments from a [`ParsedQuery`], quoting
/// identifiers for `engine` and choosing that engine's pagination dialect.
pub struct QueryBuilder {
    engine: Engine,
}

impl QueryBuilder {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn build(&self, parsed: &ParsedQuery) -> BuiltQuery {
        let mut params = Params::new();
        let mut bind_index = 0usize;
        let mut next_bind = |value: ParamValue, params: &mut Params| -> String {
            let name = format!("p{bind_index}");
            params.insert(name.clone(), value);
            bind_index += 1;
            format!("@{name}")
        };

        let where_clause = self.build_where(&parsed.filters, &mut params, &mut next_bind);
        let order_clause = self.build_order(&parsed.sort);
        let pagination_clause = self.build_pagination(parsed, order_clause.is_some());

        BuiltQuery { where_clause, order_clause, pagination_clause, params }
    }

    fn build_where(
        &self,
        filters: &[Filter],
        params: &mut Params,
        next_bind: &mut impl FnMut(ParamValue, &mut Params) -> String,
    ) -> Option<String> {
        if filters.is_empty() {
            return None;
        }

        let mut clauses = Vec::with_capacity(filters.len());
        for filter in filters {
            let ident = self.engine.quote_identifier(&filter.field);
            let clause = match filter.op {
                FilterOp::Nn => format!("{ident} IS NOT NULL"),
                FilterOp::In => {
                    let placeholders: Vec<String> = filter
                        .value
                        .split(',')
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(|v| next_bind(ParamValue::Text(v.to_owned()), params))
                        .collect();
                    if placeholders.is_empty() {
                        continue;
                    }
                    format!("{ident} IN ({})", placeholders.join(", "))
                }
                op => {
                    let placeholder = next_bind(ParamValue::Text(filter.value.clone()), params);
                    format!("{ident} {} {placeholder}", op.sql_operator())
                }
            };
            clauses.push(clause);
        }

        if clauses.is_empty() {
            None
        } else {
            Some(format!("WHERE {}", clauses.join(" AND ")))
        }
    }

    fn build_order(&self, sort: &[SortField]) -> Option<String> {
        if sort.is_empty() {
            return None;
        }
        let parts: Vec<String> = sort
            .iter()
            .map(|s| {
                let ident = self.engine.quote_identifier(&s.field);
                match s.direction {
                    SortDirection::Asc => format!("{ident} ASC"),
                    SortDirection::Desc => format!("{ident} DESC"),
                }
            })
            .collect();
        Some(format!("ORDER BY {}", parts.join(", ")))
    }

    /// Pagination dialect per §4.4: MSSQL needs an `ORDER BY` before
    /// `OFFSET ... FETCH NEXT`, falling back to a no-op ordering when the
    /// caller didn't request a sort.
    fn build_pagination(&self, parsed: &ParsedQuery, has_order: bool) -> Option<String> {
        let (limit, offset) = match (parsed.limit, parsed.offset) {
            (None, None) => return None,
            (limit, offset) => (limit.unwrap_or(i64::MAX), offset.unwrap_or(0)),
        };

        match self.engine {
            Engine::Mssql => {
                let order_fallback = if has_order { String::new() } else { "ORDER BY (SELECT 1) ".to_owned() };
                if limit == i64::MAX {
                    Some(format!("{order_fallback}OFFSET {offset} ROWS"))
                } else {
                    Some(format!("{order_fallback}OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY"))
                }
            }
            Engine::Postgres | Engine::Mysql | Engine::Unknown => {
                if limit == i64::MAX {
                    Some(format!("OFFSET {offset}"))
                } else {
                    Some(format!("LIMIT {limit} OFFSET {offset}"))
                }
            }
        }
    }
}
