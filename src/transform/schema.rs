use crate::config::SourceKind;
use crate::model::{CanonicalSchema, RawTable};

use super::utils::normalize_header;

/// For each canonical column, the index of the raw column feeding it.
/// Derived columns and unmatched optional columns hold `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub slots: Vec<Option<usize>>,
}

/// Map the table's headers onto the canonical schema. A canonical column
/// binds to the first header (in file order) that, once normalised, equals
/// its name, one of its aliases, or an alias the source kind declares for it.
///
/// Returns the names of the required columns that could not be bound.
pub fn bind(
    table: &RawTable,
    schema: &CanonicalSchema,
    kind: Option<&SourceKind>,
) -> Result<Binding, Vec<String>> {
    let headers: Vec<String> = table.columns.iter().map(|h| normalize_header(h)).collect();

    let mut slots = Vec::with_capacity(schema.columns.len());
    let mut missing = Vec::new();
    for col in &schema.columns {
        if col.is_derived() {
            slots.push(None);
            continue;
        }
        let mut names: Vec<String> = std::iter::once(&col.name)
            .chain(col.aliases.iter())
            .map(|n| normalize_header(n))
            .collect();
        if let Some(kind) = kind {
            names.extend(
                kind.columns
                    .iter()
                    .filter(|(_, target)| **target == col.name)
                    .map(|(alias, _)| normalize_header(alias)),
            );
        }

        let idx = headers
            .iter()
            .position(|h| !h.is_empty() && names.iter().any(|n| n == h));
        if idx.is_none() && col.required {
            missing.push(col.name.clone());
        }
        slots.push(idx);
    }

    if missing.is_empty() {
        Ok(Binding { slots })
    } else {
        Err(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnSpec, ColumnType, Derivation};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn table(columns: &[&str]) -> RawTable {
        RawTable {
            source: "t.csv".into(),
            path: "t.csv".into(),
            modified: Utc::now(),
            sheet: None,
            kind: "k".into(),
            week: None,
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    fn schema() -> CanonicalSchema {
        let mut id = ColumnSpec::new("SHIPMENT_NUMBER", ColumnType::Text, true);
        id.aliases = vec!["Shipment Number".into()];
        CanonicalSchema {
            columns: vec![
                id,
                ColumnSpec::new("DAYS", ColumnType::NumericRange, true),
                ColumnSpec::new("MOVE", ColumnType::Text, false),
                ColumnSpec::derived("SOURCE", ColumnType::Text, Derivation::SourceFile),
            ],
        }
    }

    #[test]
    fn binds_by_normalised_name_and_alias() {
        let t = table(&["  days ", "Extra", "shipment  number"]);
        let b = bind(&t, &schema(), None).unwrap();
        assert_eq!(b.slots, vec![Some(2), Some(0), None, None]);
    }

    #[test]
    fn kind_aliases_apply_only_with_their_kind() {
        let kind = SourceKind {
            name: "LS_Template".into(),
            match_any: vec!["ls template".into()],
            columns: BTreeMap::from([
                ("Booking number".to_string(), "SHIPMENT_NUMBER".to_string()),
                ("Days since Gated Out".to_string(), "DAYS".to_string()),
                ("Process".to_string(), "MOVE".to_string()),
            ]),
        };
        let t = table(&["Booking number", "Days since Gated Out", "Process"]);
        let b = bind(&t, &schema(), Some(&kind)).unwrap();
        assert_eq!(b.slots, vec![Some(0), Some(1), Some(2), None]);

        let missing = bind(&t, &schema(), None).unwrap_err();
        assert_eq!(missing, vec!["SHIPMENT_NUMBER", "DAYS"]);
    }

    #[test]
    fn first_matching_header_wins() {
        let t = table(&["DAYS", "Days"]);
        let mut s = schema();
        s.columns[0].required = false;
        let b = bind(&t, &s, None).unwrap();
        assert_eq!(b.slots[1], Some(0));
    }
}
