use crate::error::SqlEngineError;
use crate::params::{BoundParameters, ParamKey, ParamValue};
use crate::types::RowValues;

use super::{ArraySlot, ParamDescriptor, ParsedTemplate};

/// Positional SQL and values for one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<RowValues>,
}

/// Resolve every template slot against `params`.
///
/// Slot `n` (1-based) takes a positional binding for `n` first and falls back to
/// the descriptor's name. Like parameters are escaped and wrapped, `[n]` slots pick
/// one element of a bound sequence and `[]` slots expand to one placeholder per
/// element for this execution only.
///
/// # Errors
/// Returns [`SqlEngineError::Binding`] for a missing parameter, a sequence bound to a
/// scalar slot, an out-of-range subscript, an empty IN-list, or a non-text like value.
pub fn bind_template(
    template: &ParsedTemplate,
    params: &BoundParameters,
) -> Result<BoundStatement, SqlEngineError> {
    let mut values = Vec::with_capacity(template.descriptors().len());
    let mut widths = Vec::with_capacity(template.descriptors().len());

    for (slot, descriptor) in template.descriptors().iter().enumerate() {
        let bound = params
            .get(&ParamKey::Index(slot + 1))
            .or_else(|| params.get_named(&descriptor.name))
            .ok_or_else(|| {
                SqlEngineError::Binding(format!(
                    "no value bound for parameter :{} (placeholder {})",
                    descriptor.name,
                    slot + 1
                ))
            })?;

        let slot_values = resolve_slot(descriptor, bound, template.escape_char())?;
        widths.push(slot_values.len());
        values.extend(slot_values);
    }

    let sql = if template.has_deferred_arrays() {
        let mut widths = widths.into_iter();
        template.expand_with(|_| widths.next().unwrap_or(1))
    } else {
        template.sql().to_string()
    };

    Ok(BoundStatement { sql, values })
}

fn resolve_slot(
    descriptor: &ParamDescriptor,
    bound: &ParamValue,
    escape: char,
) -> Result<Vec<RowValues>, SqlEngineError> {
    let name = &descriptor.name;
    let values = match (descriptor.array, bound) {
        (None, ParamValue::List(_)) => {
            return Err(SqlEngineError::Binding(format!(
                "sequence bound to scalar parameter :{name}"
            )));
        }
        (None, other) => vec![scalar(other)],
        (Some(ArraySlot::Index(idx)), ParamValue::List(items)) => {
            let item = items.get(idx).ok_or_else(|| {
                SqlEngineError::Binding(format!(
                    "subscript {idx} out of range for :{name} ({} elements)",
                    items.len()
                ))
            })?;
            vec![item.clone()]
        }
        (Some(ArraySlot::Index(idx)), _) => {
            return Err(SqlEngineError::Binding(format!(
                "parameter :{name}[{idx}] requires a sequence value"
            )));
        }
        (Some(ArraySlot::Deferred), ParamValue::List(items)) => {
            if items.is_empty() {
                return Err(SqlEngineError::Binding(format!(
                    "array parameter :{name}[] bound to an empty sequence"
                )));
            }
            items.clone()
        }
        (Some(ArraySlot::Deferred), other) => vec![scalar(other)],
    };

    if !descriptor.is_like() {
        return Ok(values);
    }
    values
        .into_iter()
        .map(|value| match value {
            RowValues::Text(text) => Ok(RowValues::Text(descriptor.wrap_like(&text, escape))),
            RowValues::Null => Ok(RowValues::Null),
            other => Err(SqlEngineError::Binding(format!(
                "like parameter :{name} requires text, got {}",
                other.render()
            ))),
        })
        .collect()
}

fn scalar(value: &ParamValue) -> RowValues {
    match value {
        ParamValue::Value(v) => v.clone(),
        ParamValue::Stream(marker) => marker.to_row_value(),
        // Lists are handled by the caller before reaching here.
        ParamValue::List(items) => items.first().cloned().unwrap_or(RowValues::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::StreamMarker;

    #[test]
    fn binds_like_parameter_with_wildcards() {
        let t = ParsedTemplate::parse("SELECT * FROM T WHERE ID = :id AND NAME LIKE :%name%")
            .unwrap();
        let mut params = BoundParameters::new();
        params.set("id", 5_i64).set("name", "ab");
        let bound = bind_template(&t, &params).unwrap();
        assert_eq!(
            bound.values,
            vec![RowValues::Int(5), RowValues::Text("%ab%".into())]
        );
    }

    #[test]
    fn escapes_wildcards_inside_like_values() {
        let t = ParsedTemplate::parse("WHERE a LIKE :a%").unwrap();
        let params: BoundParameters = [("a", "50%_off")].into_iter().collect();
        let bound = bind_template(&t, &params).unwrap();
        assert_eq!(bound.values, vec![RowValues::Text("50\\%\\_off%".into())]);
    }

    #[test]
    fn reproduces_bind_order_from_names() {
        let t = ParsedTemplate::parse("INSERT INTO t VALUES (:c, :a, :b, :a)").unwrap();
        let params: BoundParameters =
            [("a", 1_i64), ("b", 2), ("c", 3)].into_iter().collect();
        let bound = bind_template(&t, &params).unwrap();
        assert_eq!(
            bound.values,
            vec![
                RowValues::Int(3),
                RowValues::Int(1),
                RowValues::Int(2),
                RowValues::Int(1)
            ]
        );
    }

    #[test]
    fn positional_binding_overrides_name() {
        let t = ParsedTemplate::parse("WHERE a = :a AND b = :b").unwrap();
        let mut params = BoundParameters::new();
        params.set("a", 1_i64).set("b", 2_i64).set_index(2, 20_i64);
        let bound = bind_template(&t, &params).unwrap();
        assert_eq!(bound.values, vec![RowValues::Int(1), RowValues::Int(20)]);
    }

    #[test]
    fn missing_parameter_is_a_binding_error() {
        let t = ParsedTemplate::parse("WHERE a = :a AND b = :b").unwrap();
        let params: BoundParameters = [("a", 1_i64)].into_iter().collect();
        let err = bind_template(&t, &params).unwrap_err();
        assert!(matches!(err, SqlEngineError::Binding(msg) if msg.contains(":b")));
    }

    #[test]
    fn expands_in_clause_per_execution() {
        let t = ParsedTemplate::parse("SELECT * FROM t WHERE id IN (:ids[]) AND k = :k").unwrap();
        let mut params = BoundParameters::new();
        params
            .set(
                "ids",
                vec![RowValues::Int(1), RowValues::Int(2), RowValues::Int(3)],
            )
            .set("k", "x");
        let bound = bind_template(&t, &params).unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE id IN (?, ?, ?) AND k = ?");
        assert_eq!(bound.values.len(), 4);
        assert_eq!(t.sql(), "SELECT * FROM t WHERE id IN (?) AND k = ?");
    }

    #[test]
    fn fixed_subscript_picks_element() {
        let t = ParsedTemplate::parse("WHERE lo = :r[0] AND hi = :r[1]").unwrap();
        let mut params = BoundParameters::new();
        params.set("r", vec![RowValues::Int(10), RowValues::Int(20)]);
        let bound = bind_template(&t, &params).unwrap();
        assert_eq!(bound.values, vec![RowValues::Int(10), RowValues::Int(20)]);

        let t = ParsedTemplate::parse("WHERE x = :r[5]").unwrap();
        assert!(bind_template(&t, &params).is_err());
    }

    #[test]
    fn rejects_list_on_scalar_and_empty_in_list() {
        let t = ParsedTemplate::parse("WHERE a = :a").unwrap();
        let mut params = BoundParameters::new();
        params.set("a", vec![RowValues::Int(1)]);
        assert!(bind_template(&t, &params).is_err());

        let t = ParsedTemplate::parse("WHERE a IN (:a[])").unwrap();
        let mut params = BoundParameters::new();
        params.set("a", Vec::<RowValues>::new());
        assert!(bind_template(&t, &params).is_err());
    }

    #[test]
    fn streams_are_materialized_for_the_driver() {
        let t = ParsedTemplate::parse("INSERT INTO f (body) VALUES (:body)").unwrap();
        let mut params = BoundParameters::new();
        params.set("body", StreamMarker::new(b"abc".to_vec()));
        let bound = bind_template(&t, &params).unwrap();
        assert_eq!(bound.values, vec![RowValues::Blob(b"abc".to_vec())]);
    }
}
