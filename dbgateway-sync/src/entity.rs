//! The fixed entity set the sync engine knows about (§4.5, §6.2) and the
//! field-coercion rules applied to each entity's payload items.

use serde_json::Value as JsonValue;
use time::format_description::well_known::Iso8601;
use time::OffsetDateTime;

use dbgateway_core::ParamValue;

/// One of the four batched-upsert entities exposed under `/sync/{...}`
/// (§4.5, §6.1). `customers` is a fifth persisted table but is reached only
/// through the plain CRUD endpoints, never through the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEntityKind {
    Tables,
    Orders,
    OrderItems,
    Products,
}

impl SyncEntityKind {
    /// Parses the `{tables|orders|orderitems|products}` path segment from
    /// `POST /sync/{entity}` (§6.1).
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "tables" => Some(Self::Tables),
            "orders" => Some(Self::Orders),
            "orderitems" => Some(Self::OrderItems),
            "products" => Some(Self::Products),
            _ => None,
        }
    }

    /// The payload's required top-level array key (§4.5.1), identical to
    /// the path segment.
    pub fn array_key(self) -> &'static str {
        match self {
            Self::Tables => "tables",
            Self::Orders => "orders",
            Self::OrderItems => "orderitems",
            Self::Products => "products",
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            Self::Tables => "tables",
            Self::Orders => "orders",
            Self::OrderItems => "orderitems",
            Self::Products => "products",
        }
    }

    /// The non-`id`, non-`LastSync` columns this entity upserts, and how to
    /// coerce each one out of an arbitrary JSON payload item (§4.5 field
    /// coercion rules).
    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            Self::Tables => &[
                FieldSpec { name: "name", kind: FieldKind::Text, default: FieldDefault::Text("") },
                FieldSpec { name: "capacity", kind: FieldKind::Int, default: FieldDefault::Int(0) },
                FieldSpec { name: "location", kind: FieldKind::Text, default: FieldDefault::Text("") },
            ],
            Self::Products => &[
                FieldSpec { name: "name", kind: FieldKind::Text, default: FieldDefault::Text("") },
                FieldSpec { name: "price", kind: FieldKind::Float, default: FieldDefault::Float(0.0) },
                FieldSpec { name: "available", kind: FieldKind::Bool, default: FieldDefault::Bool(true) },
                FieldSpec { name: "category", kind: FieldKind::Text, default: FieldDefault::Text("") },
            ],
            Self::Orders => &[
                FieldSpec { name: "customer_id", kind: FieldKind::Int, default: FieldDefault::Int(0) },
                FieldSpec { name: "status", kind: FieldKind::Text, default: FieldDefault::Text("pending") },
                FieldSpec { name: "total", kind: FieldKind::Float, default: FieldDefault::Float(0.0) },
            ],
            Self::OrderItems => &[
                FieldSpec { name: "order_id", kind: FieldKind::Int, default: FieldDefault::Int(0) },
                FieldSpec { name: "product_id", kind: FieldKind::Int, default: FieldDefault::Int(0) },
                FieldSpec { name: "quantity", kind: FieldKind::Int, default: FieldDefault::Int(1) },
                FieldSpec { name: "unit_price", kind: FieldKind::Float, default: FieldDefault::Float(0.0) },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Text,
    Bool,
    DateTime,
}

#[derive(Debug, Clone, Copy)]
pub enum FieldDefault {
    Int(i64),
    Float(f64),
    Text(&'static str),
    Bool(bool),
    Now,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub default: FieldDefault,
}

fn resolve_default(default: FieldDefault) -> ParamValue {
    match default {
        FieldDefault::Int(v) => ParamValue::Int(v),
        FieldDefault::Float(v) => ParamValue::Float(v),
        FieldDefault::Text(v) => ParamValue::Text(v.to_owned()),
        FieldDefault::Bool(v) => ParamValue::Bool(v),
        FieldDefault::Now => ParamValue::DateTime(OffsetDateTime::now_utc()),
    }
}

/// Coerces one payload field per §4.5's tolerance rules: numeric fields
/// accept string-encoded numbers, datetimes accept ISO-8601 strings, and any
/// value that won't coerce falls back to the field's default with a warning
/// rather than failing the whole item.
pub fn coerce_field(value: Option<&JsonValue>, spec: &FieldSpec) -> ParamValue {
    let Some(value) = value else { return resolve_default(spec.default) };

    match spec.kind {
        FieldKind::Int => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
            .map(ParamValue::Int)
            .unwrap_or_else(|| {
                tracing::warn!(field = spec.name, ?value, "non-integer value, using default");
                resolve_default(spec.default)
            }),
        FieldKind::Float => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
            .map(ParamValue::Float)
            .unwrap_or_else(|| {
                tracing::warn!(field = spec.name, ?value, "non-numeric value, using default");
                resolve_default(spec.default)
            }),
        FieldKind::Bool => value.as_bool().map(ParamValue::Bool).unwrap_or_else(|| {
            tracing::warn!(field = spec.name, ?value, "non-boolean value, using default");
            resolve_default(spec.default)
        }),
        FieldKind::Text => value.as_str().map(|s| ParamValue::Text(s.to_owned())).unwrap_or_else(|| {
            tracing::warn!(field = spec.name, ?value, "non-string value, using default");
            resolve_default(spec.default)
        }),
        FieldKind::DateTime => value
            .as_str()
            .and_then(|s| OffsetDateTime::parse(s, &Iso8601::DEFAULT).ok())
            .map(ParamValue::DateTime)
            .unwrap_or_else(|| {
                tracing::warn!(field = spec.name, ?value, "unparseable datetime, using default");
                resolve_default(spec.default)
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_segment_roundtrips_to_array_key() {
        let kind = SyncEntityKind::from_path_segment("orderitems").unwrap();
        assert_eq!(kind.array_key(), "orderitems");
        assert_eq!(kind.table_name(), "orderitems");
    }

    #[test]
    fn unknown_path_segment_is_none() {
        assert!(SyncEntityKind::from_path_segment("widgets").is_none());
    }

    #[test]
    fn string_encoded_integer_coerces() {
        let spec = FieldSpec { name: "capacity", kind: FieldKind::Int, default: FieldDefault::Int(0) };
        let v = coerce_field(Some(&json!("4")), &spec);
        assert_eq!(v, ParamValue::Int(4));
    }

    #[test]
    fn unparseable_integer_falls_back_to_default() {
        let spec = FieldSpec { name: "capacity", kind: FieldKind::Int, default: FieldDefault::Int(2) };
        let v = coerce_field(Some(&json!("not-a-number")), &spec);
        assert_eq!(v, ParamValue::Int(2));
    }

    #[test]
    fn missing_field_uses_default() {
        let spec = FieldSpec { name: "available", kind: FieldKind::Bool, default: FieldDefault::Bool(true) };
        assert_eq!(coerce_field(None, &spec), ParamValue::Bool(true));
    }
}
