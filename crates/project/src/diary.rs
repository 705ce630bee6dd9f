//! Date-folder layout for diary entries: `Diary/year/month/day/entry`.
//! 日記的日期資料夾配置：`Diary/年/月/日/日記`。

use chrono::{Datelike, NaiveDateTime};
use serde_json::json;

/// Title of the root folder holding every diary entry.
/// 存放所有日記的根資料夾標題。
pub const DIARY_ROOT_FOLDER: &str = "Diary";

/// Tag attached to every diary entry.
pub const DIARY_TAG: &str = "diary";

const ZODIAC_ANIMALS: [&str; 12] = [
    "Rat", "Ox", "Tiger", "Rabbit", "Dragon", "Snake", "Horse", "Goat", "Monkey", "Rooster",
    "Dog", "Pig",
];

/// Folder titles and entry title for a diary written at a given moment.
/// 指定時間所寫日記的資料夾與標題。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiaryPath {
    pub year: String,
    pub month: String,
    pub day: String,
    pub title: String,
}

impl DiaryPath {
    pub fn at(time: NaiveDateTime) -> Self {
        Self {
            year: format!("year-{}-{}", time.year(), zodiac_animal(time.year())),
            month: time.format("month-%m-%B").to_string(),
            day: time.format("day-%d-%A").to_string(),
            title: time.format("diary-%Y%m%d-%H-%M-%S").to_string(),
        }
    }

    /// Folder titles from the diary root down to the day.
    pub fn folders(&self) -> [&str; 4] {
        [DIARY_ROOT_FOLDER, &self.year, &self.month, &self.day]
    }
}

/// Zodiac animal of the lunar cycle, counted from 1900 (Rat).
pub fn zodiac_animal(year: i32) -> &'static str {
    ZODIAC_ANIMALS[(year - 1900).rem_euclid(12) as usize]
}

/// Rich-text body of a fresh entry: a dated heading and an empty paragraph.
/// 新日記的富文字內容：日期標題與一個空段落。
pub fn diary_body(time: NaiveDateTime) -> String {
    json!({
        "root": {
            "type": "root",
            "children": [
                {
                    "type": "heading",
                    "tag": "h2",
                    "children": [
                        { "type": "text", "text": time.format("%A, %B %-d, %Y").to_string() }
                    ]
                },
                { "type": "paragraph", "children": [] }
            ]
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn new_year_noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|date| date.and_hms_opt(12, 0, 0))
            .unwrap()
    }

    #[test]
    fn folders_follow_year_month_day() {
        let path = DiaryPath::at(new_year_noon());
        assert_eq!(
            path.folders(),
            ["Diary", "year-2024-Dragon", "month-01-January", "day-01-Monday"]
        );
        assert_eq!(path.title, "diary-20240101-12-00-00");
    }

    #[test]
    fn zodiac_cycles_every_twelve_years() {
        assert_eq!(zodiac_animal(1900), "Rat");
        assert_eq!(zodiac_animal(2025), "Snake");
        assert_eq!(zodiac_animal(1899), "Pig");
    }

    #[test]
    fn body_is_rich_text_with_dated_heading() {
        let body: serde_json::Value = serde_json::from_str(&diary_body(new_year_noon())).unwrap();
        assert_eq!(
            body["root"]["children"][0]["children"][0]["text"],
            "Monday, January 1, 2024"
        );
    }
}
