//! Caption text for a memorial post.

use crate::record::{CasualtyRecord, Gender};
use serde::{Deserialize, Serialize};
use time::macros::format_description;

/// Hashtags appended after the person's own name tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    pub hashtags: Vec<String>,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        let hashtags = [
            "לזכרם",
            "חרבותברזל",
            "נופליחרבותברזל",
            "haravotbarzel",
            "יוםהזיכרון",
            "יוםהזכרוןהתשפד",
            "יוםהזיכרון2023",
            "חללזכרונות",
            "lezichram",
            "YomHazikaron",
            "lsraelRemembers",
            "memorialday",
            "standwithisrael",
        ];
        Self {
            hashtags: hashtags.iter().map(|tag| tag.to_string()).collect(),
        }
    }
}

/// Builds the full caption: a one-line remembrance, a dotted spacer and the
/// hashtag line.
pub fn build_caption(record: &CasualtyRecord, config: &CaptionConfig) -> String {
    format!(
        "{}\n{}\n{}",
        remembrance_line(record),
        spacer(),
        hashtag_line(record, config)
    )
}

fn remembrance_line(record: &CasualtyRecord) -> String {
    let female = record.gender == Some(Gender::Female);
    let suffix = if female { "ה" } else { "" };
    let possessive = if female { "ה" } else { "ו" };

    let mut words = vec![record.full_name.clone(), "ז\"ל,".to_string()];
    if let Some(date) = record.date_of_death() {
        let formatted = date
            .format(format_description!("[day]/[month]/[year]"))
            .unwrap_or_else(|_| date.to_string());
        words.push(format!("נפל{suffix}"));
        words.push("בתאריך".to_string());
        words.push(format!("{formatted},"));
    }
    if let Some(city) = record.grave_city.as_deref().filter(|city| !city.is_empty()) {
        words.push(format!("מקום מנוחת{possessive}"));
        words.push(format!("{city},"));
    }
    words.push(format!("הותיר{suffix}"));
    words.push(format!("אחרי{possessive}"));
    words.push("חלל מלא בזכרונות! 🕯️".to_string());
    words.join(" ")
}

// Keeps the hashtags below the "more" fold of the caption.
fn spacer() -> &'static str {
    ".\n\n.\n\n.\n\n.\n\n"
}

fn hashtag_line(record: &CasualtyRecord, config: &CaptionConfig) -> String {
    std::iter::once(record.full_name.replace(' ', ""))
        .chain(config.hashtags.iter().cloned())
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<_>>()
        .join(" ")
}
