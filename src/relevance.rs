use crate::models::TenderRecord;

/// Case-insensitive keyword gate over title, buyer, category and description.
/// With no keywords every record is relevant.
#[derive(Debug, Clone, Default)]
pub struct RelevanceFilter {
    keywords: Vec<String>,
}

impl RelevanceFilter {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.keywords.is_empty()
    }

    pub fn is_relevant(&self, record: &TenderRecord) -> bool {
        if self.keywords.is_empty() {
            return true;
        }

        let haystack = [
            Some(record.title.as_str()),
            record.buyer.as_deref(),
            record.category.as_deref(),
            record.description.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

        self.keywords.iter().any(|k| haystack.contains(k.as_str()))
    }

    /// Split into (relevant, dropped count), keeping order.
    pub fn apply(&self, records: Vec<TenderRecord>) -> (Vec<TenderRecord>, usize) {
        let before = records.len();
        let kept: Vec<TenderRecord> = records.into_iter().filter(|r| self.is_relevant(r)).collect();
        let dropped = before - kept.len();
        (kept, dropped)
    }
}
