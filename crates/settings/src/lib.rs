//! User preferences for Quire: autosave timing, editor cache size and search tuning.
//! Quire 的使用者偏好設定：自動儲存時間、編輯器快取大小與搜尋參數。

pub mod preferences;

pub use preferences::{
    AutosavePreferences, EditorPreferences, Preferences, PreferencesError, PreferencesStore,
    SearchPreferences,
};
