use serde::{Deserialize, Serialize};

/// The user-visible outcome of an import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub files_added: u64,
    pub files_already_added: u64,
    /// Files dropped because identical content was already in flight through
    /// the import stage when they finished hashing.
    pub files_deduped: u64,
    pub files_ignored: u64,
    pub files_failed: u64,
    pub files_processed: u64,
    pub total_size: u64,
    pub average_size: u64,
}

impl ImportSummary {
    /// Computed once at pipeline shutdown.
    pub fn finalize_average(&mut self) {
        self.average_size = if self.files_added == 0 {
            0
        } else {
            self.total_size / self.files_added
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_guards_division_by_zero() {
        let mut summary = ImportSummary::default();
        summary.finalize_average();
        assert_eq!(summary.average_size, 0);

        summary.files_added = 4;
        summary.total_size = 10;
        summary.finalize_average();
        assert_eq!(summary.average_size, 2);
    }

    #[test]
    fn serializes_with_camel_case_names() {
        let summary = ImportSummary {
            files_added: 1,
            files_deduped: 2,
            ..ImportSummary::default()
        };
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["filesAdded"], 1);
        assert_eq!(json["filesDeduped"], 2);
        assert!(json.get("files_added").is_none());
    }
}
