//! Column identifier cleaning and renaming.

use indexmap::IndexMap;

/// Clean a raw column name into a warehouse identifier.
///
/// Lowercases, collapses every run of non-alphanumeric characters into a
/// single `_` and trims leading/trailing underscores. Dotted paths from
/// flattened documents come out joined by `_`.
///
/// ```
/// use tidewater::transform::columns::clean_identifier;
///
/// assert_eq!(clean_identifier(" WITHDRAWAL AMT "), "withdrawal_amt");
/// assert_eq!(clean_identifier("trade.price.usd"), "trade_price_usd");
/// ```
pub fn clean_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Maps source column names to target column names.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapper {
    rename: IndexMap<String, String>,
}

impl ColumnMapper {
    pub fn new(rename: &IndexMap<String, String>) -> Self {
        Self {
            rename: rename.clone(),
        }
    }

    /// Explicit rename if configured, cleaned identifier otherwise.
    pub fn target_name(&self, raw: &str) -> String {
        match self.rename.get(raw) {
            Some(name) => name.clone(),
            None => clean_identifier(raw),
        }
    }

    /// Best-effort inverse: the source column that maps to `target`.
    ///
    /// Only explicit renames can be inverted; otherwise the target name is
    /// assumed to be the source name.
    pub fn source_name(&self, target: &str) -> String {
        self.rename
            .iter()
            .find(|(_, to)| to.as_str() == target)
            .map(|(from, _)| from.clone())
            .unwrap_or_else(|| target.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_bank_columns() {
        let cases = [
            ("Account No", "account_no"),
            ("DATE", "date"),
            ("TRANSACTION DETAILS", "transaction_details"),
            ("CHIP USED", "chip_used"),
            ("VALUE DATE", "value_date"),
            (" WITHDRAWAL AMT ", "withdrawal_amt"),
            (" DEPOSIT AMT ", "deposit_amt"),
            ("BALANCE AMT", "balance_amt"),
        ];
        for (raw, expected) in cases {
            assert_eq!(clean_identifier(raw), expected, "cleaning {raw:?}");
        }
    }

    #[test]
    fn test_clean_edge_cases() {
        assert_eq!(clean_identifier("_id.$oid"), "id_oid");
        assert_eq!(clean_identifier("a--b__c"), "a_b_c");
        assert_eq!(clean_identifier("???"), "");
    }

    #[test]
    fn test_mapper_prefers_explicit_rename() {
        let mut rename = IndexMap::new();
        rename.insert("Account No".to_string(), "account_number".to_string());
        let mapper = ColumnMapper::new(&rename);

        assert_eq!(mapper.target_name("Account No"), "account_number");
        assert_eq!(mapper.target_name("BALANCE AMT"), "balance_amt");
        assert_eq!(mapper.source_name("account_number"), "Account No");
        assert_eq!(mapper.source_name("id"), "id");
    }
}
