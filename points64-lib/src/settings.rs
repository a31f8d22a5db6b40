use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use derive_new::new;
use tokio::fs::read_to_string;
use toml_edit::{Formatted, Item, Value};
use tracing::error;

const AUTO_PATCH: &str = "auto-patch";
const RESTORE_FILE_A_FLAGS: &str = "restore-file-a-flags";
const SKIP_INTRO: &str = "skip-intro";
const SAVED_FILE_A_FLAGS: &str = "saved-file-a-flags";

/// User settings persisted next to the executable. A missing or malformed
/// file behaves as empty; write failures are logged, never propagated.
#[derive(new)]
pub struct SettingsRepo {
    path: PathBuf,
}

impl SettingsRepo {
    async fn load(&self) -> toml_edit::DocumentMut {
        read_to_string(&self.path)
            .await
            .unwrap_or_default()
            .parse()
            .unwrap_or_default()
    }

    async fn read_bool(&self, key: &str) -> Option<bool> {
        self.load().await.get(key).and_then(|item| item.as_bool())
    }

    async fn read_string(&self, key: &str) -> Option<String> {
        self.load()
            .await
            .get(key)
            .and_then(|item| item.as_str())
            .map(|value| value.to_owned())
    }

    async fn write_item(&self, key: &str, item: Item) {
        let mut doc = self.load().await;
        if let Some(existing) = doc.as_table_mut().get_mut(key) {
            *existing = item;
        } else {
            let _ = doc.insert(key, item);
        }
        doc.sort_values();
        if let Err(err) = tokio::fs::write(&self.path, doc.to_string()).await {
            error!("{}", err);
        }
    }

    async fn write_bool(&self, key: &str, value: bool) {
        self.write_item(key, Item::Value(Value::Boolean(Formatted::new(value))))
            .await;
    }

    async fn write_string(&self, key: &str, value: String) {
        self.write_item(key, Item::Value(Value::String(Formatted::new(value))))
            .await;
    }

    pub async fn auto_patch(&self) -> bool {
        self.read_bool(AUTO_PATCH).await.unwrap_or(true)
    }
    pub async fn set_auto_patch(&self, value: bool) {
        self.write_bool(AUTO_PATCH, value).await;
    }

    pub async fn restore_file_a_flags(&self) -> bool {
        self.read_bool(RESTORE_FILE_A_FLAGS).await.unwrap_or(true)
    }
    pub async fn set_restore_file_a_flags(&self, value: bool) {
        self.write_bool(RESTORE_FILE_A_FLAGS, value).await;
    }

    pub async fn skip_intro(&self) -> bool {
        self.read_bool(SKIP_INTRO).await.unwrap_or(false)
    }
    pub async fn set_skip_intro(&self, value: bool) {
        self.write_bool(SKIP_INTRO, value).await;
    }

    pub async fn saved_file_a_flags(&self) -> Option<Vec<u8>> {
        let encoded = self.read_string(SAVED_FILE_A_FLAGS).await?;
        BASE64.decode(encoded).ok()
    }
    pub async fn set_saved_file_a_flags(&self, flags: &[u8]) {
        self.write_string(SAVED_FILE_A_FLAGS, BASE64.encode(flags))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_file_path;

    #[tokio::test]
    async fn defaults_without_a_file() {
        let repo = SettingsRepo::new(temp_file_path("settings"));
        assert!(repo.auto_patch().await);
        assert!(repo.restore_file_a_flags().await);
        assert!(!repo.skip_intro().await);
        assert_eq!(repo.saved_file_a_flags().await, None);
    }

    #[tokio::test]
    async fn booleans_round_trip() {
        let repo = SettingsRepo::new(temp_file_path("settings"));
        repo.set_auto_patch(false).await;
        repo.set_skip_intro(true).await;
        assert!(!repo.auto_patch().await);
        assert!(repo.skip_intro().await);
        assert!(repo.restore_file_a_flags().await);
    }

    #[tokio::test]
    async fn flags_blob_round_trips_as_base64() {
        let repo = SettingsRepo::new(temp_file_path("settings"));
        let flags = vec![0x00, 0x01, 0xfe, 0xff];
        repo.set_saved_file_a_flags(&flags).await;
        assert_eq!(repo.saved_file_a_flags().await, Some(flags));
    }
}
