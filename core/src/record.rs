//! Casualty records as stored in the batch file.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

/// Wall-clock time a record was tested or published, second precision.
pub type Timestamp = PrimitiveDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "M")]
    Male,
}

/// One fallen person tracked from collection through publication.
///
/// Field names on disk follow the collector's JSON layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualtyRecord {
    #[serde(rename = "data_url")]
    pub source_url: String,
    pub full_name: String,
    #[serde(default)]
    pub degree: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub living_city: Option<String>,
    #[serde(default)]
    pub grave_city: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<Gender>,
    /// `YYYY-MM-DD`.
    #[serde(rename = "date_of_death_str", default)]
    pub date_of_death: Option<String>,
    #[serde(rename = "post_main_image", default)]
    pub main_image: Option<PathBuf>,
    /// Own photo first, then externally sourced images.
    #[serde(rename = "post_additional_images", default)]
    pub candidate_images: Vec<PathBuf>,
    #[serde(rename = "post_path", default)]
    pub rendered_post: Option<PathBuf>,
    #[serde(rename = "post_caption", default)]
    pub caption: Option<String>,
    #[serde(rename = "post_tested", default, with = "stamp")]
    pub tested_at: Option<Timestamp>,
    #[serde(rename = "post_published", default, with = "stamp")]
    pub published_at: Option<Timestamp>,
}

impl CasualtyRecord {
    pub fn new(source_url: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            full_name: full_name.into(),
            degree: String::new(),
            department: None,
            living_city: None,
            grave_city: None,
            age: None,
            gender: None,
            date_of_death: None,
            main_image: None,
            candidate_images: Vec::new(),
            rendered_post: None,
            caption: None,
            tested_at: None,
            published_at: None,
        }
    }

    /// Source URL without its transport scheme. The collection step uses it
    /// to match a record across re-scrapes; publishing never reads it.
    pub fn normalized_source_url(&self) -> &str {
        let url = self.source_url.as_str();
        url.strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url)
    }

    pub fn date_of_death(&self) -> Option<Date> {
        let raw = self.date_of_death.as_deref()?;
        Date::parse(raw, format_description!("[year]-[month]-[day]")).ok()
    }
}

impl Display for CasualtyRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.full_name)
    }
}

/// Timestamps are written as `YYYY-MM-DD HH:MM:SS`; an unset one is `false`.
pub(crate) mod stamp {
    use super::Timestamp;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::FormatItem;
    use time::macros::format_description;

    pub(crate) const FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Text(String),
    }

    pub fn serialize<S>(value: &Option<Timestamp>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(timestamp) => {
                let text = timestamp.format(FORMAT).map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&text)
            }
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None | Some(Raw::Flag(false)) => Ok(None),
            Some(Raw::Flag(true)) => Err(D::Error::custom(
                "expected a timestamp or false, found true",
            )),
            Some(Raw::Text(text)) => Timestamp::parse(&text, FORMAT)
                .map(Some)
                .map_err(|error| D::Error::custom(format!("invalid timestamp {text:?}: {error}"))),
        }
    }
}
